use std::fmt;
use std::sync::{Arc, RwLock};

use echo_model::{Cell, Mutation};

use crate::batch::BatchScope;
use crate::collection::{decode_element, Binding, OrderedCollection};
use crate::error::{DbError, DbResult};
use crate::object::EchoObject;
use crate::value::Property;

/// Index-addressable ordered collection.
#[derive(Clone)]
pub struct EchoArray {
    binding: Arc<RwLock<Binding>>,
}

impl EchoArray {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub(crate) fn bound(owner: EchoObject, path: Vec<String>) -> Self {
        Self {
            binding: Arc::new(RwLock::new(Binding::Bound { owner, path })),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.target().is_some()
    }

    pub fn owner(&self) -> Option<EchoObject> {
        self.target().map(|(owner, _)| owner)
    }

    fn target(&self) -> Option<(EchoObject, Vec<String>)> {
        match &*self.binding.read().expect("collection lock poisoned") {
            Binding::Bound { owner, path } => Some((owner.clone(), path.clone())),
            Binding::Unbound(_) => None,
        }
    }

    fn with_buffer<R>(&self, f: impl FnOnce(&mut Vec<Property>) -> R) -> Option<R> {
        match &mut *self.binding.write().expect("collection lock poisoned") {
            Binding::Unbound(buffer) => Some(f(buffer)),
            Binding::Bound { .. } => None,
        }
    }

    /// Bind to `(owner, path)`: the field is set to an empty container,
    /// then each current element is appended. The two steps are separate
    /// writes.
    pub(crate) fn bind(&self, owner: &EchoObject, path: Vec<String>) -> DbResult<()> {
        let values = self.to_vec();
        *self.binding.write().expect("collection lock poisoned") = Binding::Bound {
            owner: owner.clone(),
            path: path.clone(),
        };
        owner.apply_mutations(vec![Mutation::set(path.clone(), Cell::Array(Vec::new()))])?;
        for value in values {
            let cell = owner.encode_value(&value)?;
            owner.apply_mutations(vec![Mutation::ArrayPush {
                path: path.clone(),
                values: vec![cell],
            }])?;
        }
        Ok(())
    }

    /// Container-creating operation for a bound field that is absent.
    fn ensure_container(owner: &EchoObject, path: &[String]) -> DbResult<Option<Mutation>> {
        Ok(match owner.read_cell(path)? {
            None => Some(Mutation::set(path.to_vec(), Cell::Array(Vec::new()))),
            Some(_) => None,
        })
    }
}

fn cells(owner: &EchoObject, path: &[String]) -> Vec<Cell> {
    match owner.read_cell(path) {
        Ok(Some(Cell::Array(items))) => items,
        _ => Vec::new(),
    }
}

impl OrderedCollection for EchoArray {
    fn len(&self) -> usize {
        match self.target() {
            Some((owner, path)) => cells(&owner, &path).len(),
            None => self.with_buffer(|b| b.len()).unwrap_or(0),
        }
    }

    fn get(&self, index: usize) -> Property {
        match self.target() {
            Some((owner, path)) => cells(&owner, &path)
                .get(index)
                .map(|c| decode_element(&owner, c))
                .unwrap_or_default(),
            None => self
                .with_buffer(|b| b.get(index).cloned())
                .flatten()
                .unwrap_or_default(),
        }
    }

    fn set(&self, index: usize, value: Property) -> DbResult<()> {
        let len = self.len();
        if index > len {
            return Err(DbError::IndexOutOfBounds { index, len });
        }
        if index == len {
            return self.push(vec![value]).map(|_| ());
        }
        match self.target() {
            Some((owner, path)) => {
                let _scope = BatchScope::open(&owner);
                let cell = owner.encode_value(&value)?;
                owner.apply_mutations(vec![
                    Mutation::ArrayDelete {
                        path: path.clone(),
                        index,
                        count: 1,
                    },
                    Mutation::ArrayInsert {
                        path,
                        index,
                        values: vec![cell],
                    },
                ])?;
            }
            None => {
                self.with_buffer(|b| b[index] = value);
            }
        }
        Ok(())
    }

    fn push(&self, values: Vec<Property>) -> DbResult<usize> {
        match self.target() {
            Some((owner, path)) => {
                let _scope = BatchScope::open(&owner);
                let encoded = values
                    .iter()
                    .map(|v| owner.encode_value(v))
                    .collect::<DbResult<Vec<_>>>()?;
                let mut ops: Vec<Mutation> =
                    Self::ensure_container(&owner, &path)?.into_iter().collect();
                ops.push(Mutation::ArrayPush {
                    path: path.clone(),
                    values: encoded,
                });
                owner.apply_mutations(ops)?;
                Ok(cells(&owner, &path).len())
            }
            None => Ok(self
                .with_buffer(|b| {
                    b.extend(values);
                    b.len()
                })
                .unwrap_or(0)),
        }
    }

    fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Property>,
    ) -> DbResult<Vec<Property>> {
        match self.target() {
            Some((owner, path)) => {
                let _scope = BatchScope::open(&owner);
                let current = cells(&owner, &path);
                let start = start.min(current.len());
                let end = start.saturating_add(delete_count).min(current.len());
                let removed = current[start..end]
                    .iter()
                    .map(|c| decode_element(&owner, c))
                    .collect();

                let mut ops: Vec<Mutation> =
                    Self::ensure_container(&owner, &path)?.into_iter().collect();
                if end > start {
                    ops.push(Mutation::ArrayDelete {
                        path: path.clone(),
                        index: start,
                        count: end - start,
                    });
                }
                if !items.is_empty() {
                    let values = items
                        .iter()
                        .map(|v| owner.encode_value(v))
                        .collect::<DbResult<Vec<_>>>()?;
                    ops.push(Mutation::ArrayInsert {
                        path,
                        index: start,
                        values,
                    });
                }
                owner.apply_mutations(ops)?;
                Ok(removed)
            }
            None => Ok(self
                .with_buffer(|b| {
                    let start = start.min(b.len());
                    let end = start.saturating_add(delete_count).min(b.len());
                    b.splice(start..end, items).collect()
                })
                .unwrap_or_default()),
        }
    }

    fn to_vec(&self) -> Vec<Property> {
        match self.target() {
            Some((owner, path)) => cells(&owner, &path)
                .iter()
                .map(|c| decode_element(&owner, c))
                .collect(),
            None => self.with_buffer(|b| b.clone()).unwrap_or_default(),
        }
    }
}

impl Default for EchoArray {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Property>> for EchoArray {
    fn from(values: Vec<Property>) -> Self {
        Self {
            binding: Arc::new(RwLock::new(Binding::Unbound(values))),
        }
    }
}

impl FromIterator<Property> for EchoArray {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl PartialEq for EchoArray {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.binding, &other.binding)
    }
}

impl fmt::Debug for EchoArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some((owner, path)) => f
                .debug_struct("EchoArray")
                .field("owner", &owner.id())
                .field("path", &path.join("."))
                .finish(),
            None => f.debug_tuple("EchoArray").field(&self.to_vec()).finish(),
        }
    }
}
