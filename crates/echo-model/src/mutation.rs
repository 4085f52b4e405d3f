use echo_types::{ForeignKey, Reference};
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, NodeId};

/// Primitive operation on a single item.
///
/// Paths address the item's data record; each segment is a record key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Assign a cell, creating intermediate records as needed.
    Set { path: Vec<String>, value: Cell },
    /// Remove a key.
    Delete { path: Vec<String> },
    /// Insert into an indexed collection; `index` is clamped to its length.
    ArrayInsert {
        path: Vec<String>,
        index: usize,
        values: Vec<Cell>,
    },
    /// Delete a range from an indexed collection; the range is clamped.
    ArrayDelete {
        path: Vec<String>,
        index: usize,
        count: usize,
    },
    /// Append to an indexed collection.
    ArrayPush { path: Vec<String>, values: Vec<Cell> },
    /// Link a new node into a linked collection.
    ListInsert {
        path: Vec<String>,
        after: Option<NodeId>,
        node: NodeId,
        value: Cell,
    },
    /// Unlink a node from a linked collection.
    ListRemove { path: Vec<String>, node: NodeId },
    /// Append a foreign key to the item's metadata.
    AddMetaKey(ForeignKey),
    /// Replace the item's type reference.
    SetType(Option<Reference>),
    /// Set or clear the deletion marker.
    SetDeleted(bool),
}

impl Mutation {
    pub fn set(path: Vec<String>, value: Cell) -> Self {
        Self::Set { path, value }
    }

    /// Data path touched by this mutation, if any.
    pub fn path(&self) -> Option<&[String]> {
        match self {
            Self::Set { path, .. }
            | Self::Delete { path }
            | Self::ArrayInsert { path, .. }
            | Self::ArrayDelete { path, .. }
            | Self::ArrayPush { path, .. }
            | Self::ListInsert { path, .. }
            | Self::ListRemove { path, .. } => Some(path),
            Self::AddMetaKey(_) | Self::SetType(_) | Self::SetDeleted(_) => None,
        }
    }
}

/// Accumulates primitive operations into one logical change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationBuilder {
    mutations: Vec<Mutation>,
}

impl MutationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: Vec<String>, value: Cell) -> Self {
        self.mutations.push(Mutation::Set { path, value });
        self
    }

    pub fn delete(mut self, path: Vec<String>) -> Self {
        self.mutations.push(Mutation::Delete { path });
        self
    }

    pub fn array_insert(mut self, path: Vec<String>, index: usize, values: Vec<Cell>) -> Self {
        self.mutations.push(Mutation::ArrayInsert {
            path,
            index,
            values,
        });
        self
    }

    pub fn array_delete(mut self, path: Vec<String>, index: usize, count: usize) -> Self {
        self.mutations.push(Mutation::ArrayDelete { path, index, count });
        self
    }

    pub fn array_push(mut self, path: Vec<String>, values: Vec<Cell>) -> Self {
        self.mutations.push(Mutation::ArrayPush { path, values });
        self
    }

    pub fn list_insert(
        mut self,
        path: Vec<String>,
        after: Option<NodeId>,
        node: NodeId,
        value: Cell,
    ) -> Self {
        self.mutations.push(Mutation::ListInsert {
            path,
            after,
            node,
            value,
        });
        self
    }

    pub fn list_remove(mut self, path: Vec<String>, node: NodeId) -> Self {
        self.mutations.push(Mutation::ListRemove { path, node });
        self
    }

    pub fn push(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn build(self) -> Vec<Mutation> {
        self.mutations
    }
}
