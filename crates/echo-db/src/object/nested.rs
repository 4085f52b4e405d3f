use std::fmt;

use echo_model::Cell;

use crate::error::DbResult;
use crate::object::EchoObject;
use crate::value::Property;

/// View of a nested record inside a live object.
///
/// Reads and writes go through the owner, so the view follows the
/// owner's lifecycle.
#[derive(Clone)]
pub struct NestedObject {
    owner: EchoObject,
    path: Vec<String>,
}

impl NestedObject {
    pub(crate) fn new(owner: EchoObject, path: Vec<String>) -> Self {
        Self { owner, path }
    }

    pub fn owner(&self) -> &EchoObject {
        &self.owner
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn child(&self, key: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(key.to_string());
        path
    }

    pub fn get(&self, key: &str) -> Property {
        let path = self.child(key);
        match self.owner.read_cell(&path) {
            Ok(cell) => self.owner.decode(None, cell, path),
            Err(_) => Property::Undefined,
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Property>) -> DbResult<()> {
        self.owner.set_at(self.child(key), value.into())
    }

    pub fn keys(&self) -> Vec<String> {
        match self.raw_cell() {
            Ok(Some(Cell::Record(fields))) => fields.into_keys().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn raw_cell(&self) -> DbResult<Option<Cell>> {
        self.owner.read_cell(&self.path)
    }
}

impl PartialEq for NestedObject {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.path == other.path
    }
}

impl fmt::Debug for NestedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedObject")
            .field("owner", &self.owner.id())
            .field("path", &self.path.join("."))
            .finish()
    }
}
