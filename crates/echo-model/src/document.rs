use std::collections::BTreeMap;

use echo_types::{ObjectMeta, Reference};
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::{ModelError, ModelResult};
use crate::mutation::Mutation;

/// Model type of document items (typed objects and expandos).
pub const MODEL_DOCUMENT: &str = "dxos:model/document";

/// Model type of text items.
pub const MODEL_TEXT: &str = "dxos:model/text";

/// Serialized state of one item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub data: BTreeMap<String, Cell>,
    pub meta: ObjectMeta,
    pub type_ref: Option<Reference>,
    pub deleted: bool,
}

impl DocumentSnapshot {
    pub fn to_json(&self) -> ModelResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ModelError::Serialization(e.to_string()))
    }

    pub fn from_json(value: serde_json::Value) -> ModelResult<Self> {
        serde_json::from_value(value).map_err(|e| ModelError::Serialization(e.to_string()))
    }
}

/// State machine for a single document item.
///
/// Mutations apply synchronously. A batch of mutations is applied to a
/// copy first, so a failing mutation leaves the state untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentState {
    data: BTreeMap<String, Cell>,
    meta: ObjectMeta,
    type_ref: Option<Reference>,
    deleted: bool,
    version: u64,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DocumentSnapshot) -> Self {
        Self {
            data: snapshot.data,
            meta: snapshot.meta,
            type_ref: snapshot.type_ref,
            deleted: snapshot.deleted,
            version: 0,
        }
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            data: self.data.clone(),
            meta: self.meta.clone(),
            type_ref: self.type_ref.clone(),
            deleted: self.deleted,
        }
    }

    /// Number of mutation batches applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn data(&self) -> &BTreeMap<String, Cell> {
        &self.data
    }

    pub fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    pub fn type_ref(&self) -> Option<&Reference> {
        self.type_ref.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Cell at `path`, walking nested records.
    pub fn get(&self, path: &[String]) -> Option<&Cell> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(first)?;
        for key in rest {
            current = current.as_record()?.get(key)?;
        }
        Some(current)
    }

    /// Apply mutations as one unit.
    pub fn apply(&mut self, mutations: &[Mutation]) -> ModelResult<()> {
        let mut next = self.clone();
        for mutation in mutations {
            next.apply_one(mutation)?;
        }
        next.version += 1;
        *self = next;
        Ok(())
    }

    fn apply_one(&mut self, mutation: &Mutation) -> ModelResult<()> {
        match mutation {
            Mutation::Set { path, value } => {
                let (last, parents) = split_path(path)?;
                let record = self.record_mut(parents, true)?;
                record.insert(last.clone(), value.clone());
            }
            Mutation::Delete { path } => {
                let (last, parents) = split_path(path)?;
                if let Ok(record) = self.record_mut(parents, false) {
                    record.remove(last);
                }
            }
            Mutation::ArrayInsert {
                path,
                index,
                values,
            } => {
                let items = self.array_mut(path)?;
                let at = (*index).min(items.len());
                items.splice(at..at, values.iter().cloned());
            }
            Mutation::ArrayDelete { path, index, count } => {
                let items = self.array_mut(path)?;
                let start = (*index).min(items.len());
                let end = start.saturating_add(*count).min(items.len());
                items.drain(start..end);
            }
            Mutation::ArrayPush { path, values } => {
                self.array_mut(path)?.extend(values.iter().cloned());
            }
            Mutation::ListInsert {
                path,
                after,
                node,
                value,
            } => {
                let list = self.list_mut(path)?;
                if !list.insert_after(*after, *node, value.clone()) {
                    return Err(ModelError::invalid_path(
                        path,
                        format!("cannot link node {node} after {after:?}"),
                    ));
                }
            }
            Mutation::ListRemove { path, node } => {
                let list = self.list_mut(path)?;
                if !list.remove(*node) {
                    return Err(ModelError::invalid_path(path, format!("no node {node}")));
                }
            }
            Mutation::AddMetaKey(key) => self.meta.keys.push(key.clone()),
            Mutation::SetType(type_ref) => self.type_ref = type_ref.clone(),
            Mutation::SetDeleted(deleted) => self.deleted = *deleted,
        }
        Ok(())
    }

    fn record_mut(
        &mut self,
        path: &[String],
        create: bool,
    ) -> ModelResult<&mut BTreeMap<String, Cell>> {
        let mut record = &mut self.data;
        for (depth, key) in path.iter().enumerate() {
            if create && !record.contains_key(key) {
                record.insert(key.clone(), Cell::empty_record());
            }
            record = match record.get_mut(key) {
                Some(Cell::Record(inner)) => inner,
                Some(_) => {
                    return Err(ModelError::invalid_path(
                        &path[..=depth],
                        "not a nested record",
                    ))
                }
                None => return Err(ModelError::invalid_path(&path[..=depth], "missing")),
            };
        }
        Ok(record)
    }

    fn cell_mut(&mut self, path: &[String]) -> ModelResult<&mut Cell> {
        let (last, parents) = split_path(path)?;
        self.record_mut(parents, false)?
            .get_mut(last)
            .ok_or_else(|| ModelError::invalid_path(path, "missing"))
    }

    fn array_mut(&mut self, path: &[String]) -> ModelResult<&mut Vec<Cell>> {
        match self.cell_mut(path)? {
            Cell::Array(items) => Ok(items),
            _ => Err(ModelError::invalid_path(path, "not an indexed collection")),
        }
    }

    fn list_mut(&mut self, path: &[String]) -> ModelResult<&mut crate::cell::LinkedList> {
        match self.cell_mut(path)? {
            Cell::List(list) => Ok(list),
            _ => Err(ModelError::invalid_path(path, "not a linked collection")),
        }
    }
}

fn split_path(path: &[String]) -> ModelResult<(&String, &[String])> {
    path.split_last()
        .ok_or_else(|| ModelError::invalid_path(path, "empty path"))
}
