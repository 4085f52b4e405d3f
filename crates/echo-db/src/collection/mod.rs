//! Ordered collections bound to an owner object and property path.
//!
//! Both variants start as a local buffer and delegate to their owner once
//! bound. Live objects are stored as references and resolved on read.
//!
//! - [`EchoArray`] -- index-addressable
//! - [`OrderedSet`] -- linked-order; cannot delete within `splice`

mod array;
mod ordered_set;

use echo_model::Cell;

use crate::error::DbResult;
use crate::object::EchoObject;
use crate::value::Property;

pub use array::EchoArray;
pub use ordered_set::OrderedSet;

pub(crate) enum Binding {
    Unbound(Vec<Property>),
    Bound { owner: EchoObject, path: Vec<String> },
}

/// Sequence contract shared by both collection variants.
pub trait OrderedCollection {
    fn len(&self) -> usize;

    /// Element at `index`, or undefined past the end.
    fn get(&self, index: usize) -> Property;

    /// Replace the element at `index`. `index == len` appends.
    fn set(&self, index: usize, value: Property) -> DbResult<()>;

    /// Append, returning the new length.
    fn push(&self, values: Vec<Property>) -> DbResult<usize>;

    /// Remove `delete_count` elements at `start` and insert `items` there.
    /// Returns the removed elements.
    fn splice(&self, start: usize, delete_count: usize, items: Vec<Property>)
        -> DbResult<Vec<Property>>;

    fn to_vec(&self) -> Vec<Property>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a signed index; negative counts from the end.
    fn at(&self, index: isize) -> Property {
        let len = self.len() as isize;
        let index = if index < 0 { len + index } else { index };
        if index < 0 {
            return Property::Undefined;
        }
        self.get(index as usize)
    }

    fn index_of(&self, value: &Property) -> Option<usize> {
        self.to_vec().iter().position(|v| v == value)
    }

    fn contains(&self, value: &Property) -> bool {
        self.index_of(value).is_some()
    }

    fn iter(&self) -> std::vec::IntoIter<Property> {
        self.to_vec().into_iter()
    }
}

/// Decode a stored element. References resolve through the owner.
pub(crate) fn decode_element(owner: &EchoObject, cell: &Cell) -> Property {
    match cell {
        Cell::Scalar(scalar) => Property::from_scalar(scalar),
        Cell::Reference(reference) => owner.resolve_reference(reference),
        Cell::Array(items) => Property::List(items.iter().map(|c| decode_element(owner, c)).collect()),
        Cell::List(list) => Property::List(
            list.values()
                .into_iter()
                .map(|c| decode_element(owner, c))
                .collect(),
        ),
        Cell::Record(fields) => Property::Record(
            fields
                .iter()
                .map(|(k, c)| (k.clone(), decode_element(owner, c)))
                .collect(),
        ),
    }
}
