use std::collections::BTreeMap;
use std::fmt;

use echo_types::{Reference, Scalar};
use serde::{Deserialize, Serialize};

/// Identifier of a node within a [`LinkedList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Structural tag of a stored cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellKind {
    Scalar,
    Reference,
    /// Directly indexable ordered container.
    IndexedCollection,
    /// Neighbor-pointer ordered list.
    LinkedCollection,
    NestedRecord,
}

/// A stored attribute value, tagged with its kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Scalar(Scalar),
    Reference(Reference),
    Array(Vec<Cell>),
    List(LinkedList),
    Record(BTreeMap<String, Cell>),
}

impl Cell {
    pub fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    pub fn empty_record() -> Self {
        Self::Record(BTreeMap::new())
    }

    pub fn kind(&self) -> CellKind {
        match self {
            Self::Scalar(_) => CellKind::Scalar,
            Self::Reference(_) => CellKind::Reference,
            Self::Array(_) => CellKind::IndexedCollection,
            Self::List(_) => CellKind::LinkedCollection,
            Self::Record(_) => CellKind::NestedRecord,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Cell>> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Elements of either ordered container kind, in order.
    pub fn ordered_values(&self) -> Option<Vec<&Cell>> {
        match self {
            Self::Array(items) => Some(items.iter().collect()),
            Self::List(list) => Some(list.values()),
            _ => None,
        }
    }

    /// Walk `path` through nested records.
    pub fn lookup(&self, path: &[String]) -> Option<&Cell> {
        let mut current = self;
        for key in path {
            current = current.as_record()?.get(key)?;
        }
        Some(current)
    }
}

impl From<Scalar> for Cell {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<Reference> for Cell {
    fn from(value: Reference) -> Self {
        Self::Reference(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct ListNode {
    value: Cell,
    next: Option<NodeId>,
}

/// Ordered list kept as neighbor pointers.
///
/// Positional access walks the list from the head, so it is O(n).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedList {
    head: Option<NodeId>,
    nodes: BTreeMap<NodeId, ListNode>,
    next_id: u64,
}

impl LinkedList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id that the next inserted node should use.
    pub fn next_node_id(&self) -> NodeId {
        NodeId(self.next_id)
    }

    /// Node ids in list order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            match self.nodes.get(&id) {
                Some(node) => {
                    ids.push(id);
                    cursor = node.next;
                }
                None => break,
            }
        }
        ids
    }

    /// Values in list order.
    pub fn values(&self) -> Vec<&Cell> {
        self.node_ids()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).map(|n| &n.value))
            .collect()
    }

    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        self.node_ids().get(index).copied()
    }

    pub fn get(&self, node: NodeId) -> Option<&Cell> {
        self.nodes.get(&node).map(|n| &n.value)
    }

    /// Link `node` after `after`, or at the head when `after` is `None`.
    /// Returns `false` if `after` is unknown or `node` already exists.
    pub fn insert_after(&mut self, after: Option<NodeId>, node: NodeId, value: Cell) -> bool {
        if self.nodes.contains_key(&node) {
            return false;
        }
        let next = match after {
            None => self.head.replace(node),
            Some(prev) => match self.nodes.get_mut(&prev) {
                Some(prev_node) => prev_node.next.replace(node),
                None => return false,
            },
        };
        self.nodes.insert(node, ListNode { value, next });
        self.next_id = self.next_id.max(node.0 + 1);
        true
    }

    /// Unlink and drop `node`. Returns `false` if it is not in the list.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let Some(removed) = self.nodes.remove(&node) else {
            return false;
        };
        if self.head == Some(node) {
            self.head = removed.next;
            return true;
        }
        if let Some(prev) = self.nodes.values_mut().find(|n| n.next == Some(node)) {
            prev.next = removed.next;
        }
        true
    }
}
