use std::fmt;
use std::sync::{Arc, RwLock};

use echo_model::{Cell, LinkedList, Mutation, NodeId};

use crate::batch::BatchScope;
use crate::collection::{decode_element, Binding, OrderedCollection};
use crate::error::{DbError, DbResult};
use crate::object::EchoObject;
use crate::value::Property;

/// Ordered collection kept as a linked list in the store.
///
/// Positional access walks the list, so `get`, `set` and `splice` are O(n).
/// `splice` only inserts; a non-zero `delete_count` is rejected.
#[derive(Clone)]
pub struct OrderedSet {
    binding: Arc<RwLock<Binding>>,
}

impl OrderedSet {
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

    pub(crate) fn bind(&self, owner: &EchoObject, path: Vec<String>) -> DbResult<()> {
        let values = self.to_vec();
        *self.binding.write().expect("collection lock poisoned") = Binding::Bound {
            owner: owner.clone(),
            path: path.clone(),
        };
        owner.apply_mutations(vec![Mutation::set(
            path.clone(),
            Cell::List(LinkedList::new()),
        )])?;
        if !values.is_empty() {
            self.push(values)?;
        }
        Ok(())
    }

    /// Operations linking `values` one after another, starting after
    /// `anchor`. A missing container is created first.
    fn insert_ops(
        owner: &EchoObject,
        path: &[String],
        anchor: impl FnOnce(&LinkedList) -> Option<NodeId>,
        values: &[Property],
    ) -> DbResult<Vec<Mutation>> {
        let mut ops = Vec::with_capacity(values.len() + 1);
        let list = match owner.read_cell(path)? {
            Some(Cell::List(list)) => list,
            _ => {
                ops.push(Mutation::set(path.to_vec(), Cell::List(LinkedList::new())));
                LinkedList::new()
            }
        };
        let mut after = anchor(&list);
        let mut next = list.next_node_id().0;
        for value in values {
            let node = NodeId(next);
            ops.push(Mutation::ListInsert {
                path: path.to_vec(),
                after,
                node,
                value: owner.encode_value(value)?,
            });
            after = Some(node);
            next += 1;
        }
        Ok(ops)
    }
}

fn list(owner: &EchoObject, path: &[String]) -> LinkedList {
    match owner.read_cell(path) {
        Ok(Some(Cell::List(list))) => list,
        _ => LinkedList::new(),
    }
}

impl OrderedCollection for OrderedSet {
    fn len(&self) -> usize {
        match self.target() {
            Some((owner, path)) => list(&owner, &path).len(),
            None => self.with_buffer(|b| b.len()).unwrap_or(0),
        }
    }

    fn get(&self, index: usize) -> Property {
        match self.target() {
            Some((owner, path)) => {
                let list = list(&owner, &path);
                list.node_at(index)
                    .and_then(|node| list.get(node))
                    .map(|c| decode_element(&owner, c))
                    .unwrap_or_default()
            }
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
                let current = list(&owner, &path);
                let Some(node) = current.node_at(index) else {
                    return Err(DbError::IndexOutOfBounds { index, len });
                };
                let previous = index.checked_sub(1).and_then(|i| current.node_at(i));
                owner.apply_mutations(vec![
                    Mutation::ListRemove {
                        path: path.clone(),
                        node,
                    },
                    Mutation::ListInsert {
                        path,
                        after: previous,
                        node: current.next_node_id(),
                        value: owner.encode_value(&value)?,
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
                let ops = Self::insert_ops(
                    &owner,
                    &path,
                    |list| list.node_ids().last().copied(),
                    &values,
                )?;
                owner.apply_mutations(ops)?;
                Ok(list(&owner, &path).len())
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
        if delete_count > 0 {
            return Err(DbError::DeleteCountUnsupported(delete_count));
        }
        match self.target() {
            Some((owner, path)) => {
                let _scope = BatchScope::open(&owner);
                let ops = Self::insert_ops(
                    &owner,
                    &path,
                    |list| {
                        let start = start.min(list.len());
                        start.checked_sub(1).and_then(|i| list.node_at(i))
                    },
                    &items,
                )?;
                owner.apply_mutations(ops)?;
            }
            None => {
                self.with_buffer(|b| {
                    let start = start.min(b.len());
                    b.splice(start..start, items);
                });
            }
        }
        Ok(Vec::new())
    }

    fn to_vec(&self) -> Vec<Property> {
        match self.target() {
            Some((owner, path)) => list(&owner, &path)
                .values()
                .into_iter()
                .map(|c| decode_element(&owner, c))
                .collect(),
            None => self.with_buffer(|b| b.clone()).unwrap_or_default(),
        }
    }
}

impl Default for OrderedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Property>> for OrderedSet {
    fn from(values: Vec<Property>) -> Self {
        Self {
            binding: Arc::new(RwLock::new(Binding::Unbound(values))),
        }
    }
}

impl FromIterator<Property> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl PartialEq for OrderedSet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.binding, &other.binding)
    }
}

impl fmt::Debug for OrderedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some((owner, path)) => f
                .debug_struct("OrderedSet")
                .field("owner", &owner.id())
                .field("path", &path.join("."))
                .finish(),
            None => f.debug_tuple("OrderedSet").field(&self.to_vec()).finish(),
        }
    }
}
