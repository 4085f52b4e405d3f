use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use echo_types::{Reference, Scalar};
use serde_json::Value as JsonValue;

use crate::collection::{EchoArray, OrderedSet};
use crate::object::{EchoObject, NestedObject};

/// An attribute value as seen through a live object.
///
/// Reads produce bound views (`Array`, `OrderedSet`, `Nested`) and resolved
/// objects. Writes accept the same variants plus the plain `List` and
/// `Record` shapes, which are materialized field by field.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Property {
    /// Absent attribute. Assigning it deletes the key.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Object(EchoObject),
    /// A reference that is not resolved to an object.
    Reference(Reference),
    Array(EchoArray),
    OrderedSet(OrderedSet),
    List(Vec<Property>),
    Record(BTreeMap<String, Property>),
    Nested(NestedObject),
}

impl Property {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Property>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn record<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        Self::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn from_scalar(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => Self::Null,
            Scalar::Bool(b) => Self::Bool(*b),
            Scalar::Number(n) => Self::Number(*n),
            Scalar::String(s) => Self::String(s.clone()),
            Scalar::Date(d) => Self::Date(*d),
        }
    }

    /// Leaf value, for the scalar variants.
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Null => Some(Scalar::Null),
            Self::Bool(b) => Some(Scalar::Bool(*b)),
            Self::Number(n) => Some(Scalar::Number(*n)),
            Self::String(s) => Some(Scalar::String(s.clone())),
            Self::Date(d) => Some(Scalar::Date(*d)),
            _ => None,
        }
    }

    /// Plain JSON to a writable value. `{"@id": ..}` becomes a reference.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            JsonValue::String(s) => Self::String(s.clone()),
            JsonValue::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => {
                if let (1, Some(JsonValue::String(id))) = (map.len(), map.get("@id")) {
                    return Self::Reference(Reference::new(id.clone(), None, None));
                }
                Self::Record(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&EchoObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&EchoArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_ordered_set(&self) -> Option<&OrderedSet> {
        match self {
            Self::OrderedSet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&NestedObject> {
        match self {
            Self::Nested(n) => Some(n),
            _ => None,
        }
    }

    /// Elements of any ordered variant.
    pub fn elements(&self) -> Option<Vec<Property>> {
        use crate::collection::OrderedCollection;
        match self {
            Self::List(items) => Some(items.clone()),
            Self::Array(a) => Some(a.to_vec()),
            Self::OrderedSet(s) => Some(s.to_vec()),
            _ => None,
        }
    }

    /// Whether `actual` satisfies this expected value in a property filter.
    ///
    /// Objects compare by id, so an expected reference matches the object
    /// it points to. Ordered values compare element-wise and expected
    /// records match when every listed key matches.
    pub fn matches(&self, actual: &Property) -> bool {
        match (self, actual) {
            (Self::Object(e), Self::Object(a)) => e.id() == a.id(),
            (Self::Reference(r), Self::Object(a)) => r.object_id() == Some(a.id()),
            (Self::Record(expected), Self::Nested(nested)) => expected
                .iter()
                .all(|(k, v)| v.matches(&nested.get(k))),
            (Self::Record(expected), Self::Record(actual)) => expected
                .iter()
                .all(|(k, v)| v.matches(actual.get(k).unwrap_or(&Self::Undefined))),
            _ => match (self.elements(), actual.elements()) {
                (Some(expected), Some(actual)) => {
                    expected.len() == actual.len()
                        && expected.iter().zip(&actual).all(|(e, a)| e.matches(a))
                }
                _ => self == actual,
            },
        }
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Property {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for Property {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<usize> for Property {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Property {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Scalar> for Property {
    fn from(value: Scalar) -> Self {
        Self::from_scalar(&value)
    }
}

impl From<EchoObject> for Property {
    fn from(value: EchoObject) -> Self {
        Self::Object(value)
    }
}

impl From<&EchoObject> for Property {
    fn from(value: &EchoObject) -> Self {
        Self::Object(value.clone())
    }
}

impl From<Reference> for Property {
    fn from(value: Reference) -> Self {
        Self::Reference(value)
    }
}

impl From<EchoArray> for Property {
    fn from(value: EchoArray) -> Self {
        Self::Array(value)
    }
}

impl From<OrderedSet> for Property {
    fn from(value: OrderedSet) -> Self {
        Self::OrderedSet(value)
    }
}

impl From<NestedObject> for Property {
    fn from(value: NestedObject) -> Self {
        Self::Nested(value)
    }
}

impl From<Vec<Property>> for Property {
    fn from(value: Vec<Property>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, Property>> for Property {
    fn from(value: BTreeMap<String, Property>) -> Self {
        Self::Record(value)
    }
}

impl<T: Into<Property>> From<Option<T>> for Property {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Undefined)
    }
}
