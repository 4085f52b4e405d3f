use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use echo_types::{ForeignKey, ObjectId, Reference};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::object::EchoObject;
use crate::query::QueryOptions;
use crate::value::Property;

pub type Predicate = Arc<dyn Fn(&EchoObject) -> bool + Send + Sync>;

/// Filter tree node.
///
/// Leaf criteria at one node are conjunctive. A non-empty `or` replaces
/// them: the node then matches if any branch does. `not` inverts the node's
/// result after the visibility and model gates have admitted the object.
#[derive(Clone, Default)]
pub struct Filter {
    pub type_ref: Option<Reference>,
    /// Every listed key must match the object's current value. A key mapped
    /// to [`Property::Undefined`] matches an absent attribute.
    pub properties: BTreeMap<String, Property>,
    pub object_ids: Option<Vec<ObjectId>>,
    /// Reserved; evaluating it fails with
    /// [`DbError::TextSearchUnsupported`].
    pub text: Option<String>,
    /// The object must carry at least one of these keys.
    pub meta_keys: Vec<ForeignKey>,
    pub predicate: Option<Predicate>,
    pub not: bool,
    pub and: Vec<Filter>,
    pub or: Vec<Filter>,
    pub options: QueryOptions,
}

impl Filter {
    /// Every object the options admit.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn nothing() -> Self {
        Self {
            not: true,
            ..Self::default()
        }
    }

    /// Objects whose type reference names `typename`.
    pub fn typename(typename: impl Into<String>) -> Self {
        Self::type_ref(Reference::from_legacy_typename(typename))
    }

    pub fn type_ref(reference: Reference) -> Self {
        Self {
            type_ref: Some(reference),
            ..Self::default()
        }
    }

    pub fn properties<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn predicate(predicate: impl Fn(&EchoObject) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Some(Arc::new(predicate)),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn ids(ids: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            object_ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn foreign_keys(keys: impl IntoIterator<Item = ForeignKey>) -> Self {
        Self {
            meta_keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Inverse of `filter` over the objects its options admit.
    pub fn not(filter: Filter) -> Self {
        Self {
            not: !filter.not,
            ..filter
        }
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self {
            and: filters.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Matches if any of `filters` does; an empty disjunction matches
    /// nothing.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        let or: Vec<Filter> = filters.into_iter().collect();
        if or.is_empty() {
            return Self::nothing();
        }
        Self {
            or,
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the options on this node, and on every `and`/`or` branch
    /// when `recursive`.
    pub fn set_options(&mut self, options: QueryOptions, recursive: bool) {
        if recursive {
            for sub in self.and.iter_mut().chain(self.or.iter_mut()) {
                sub.set_options(options.clone(), true);
            }
        }
        self.options = options;
    }

    /// Whether a text leaf appears anywhere in the tree.
    pub fn uses_text(&self) -> bool {
        self.text.is_some() || self.and.iter().chain(&self.or).any(Filter::uses_text)
    }

    /// Build from a JSON source: `null` matches all, a string is a text
    /// filter, an array is a conjunction, and an object is a property
    /// filter whose `__typename`/`@type` key names the type and whose `id`
    /// key (which must stand alone) selects by id.
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::all()),
            JsonValue::String(text) => Ok(Self::text(text.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<DbResult<Vec<_>>>()
                .map(Self::and),
            JsonValue::Object(map) => {
                let mut filter = Self::default();
                for (key, value) in map {
                    match key.as_str() {
                        "id" => {
                            if map.len() > 1 {
                                return Err(invalid("`id` cannot be combined with other keys"));
                            }
                            filter.object_ids = Some(json_ids(value)?);
                        }
                        "__typename" | "@type" => {
                            let typename = value
                                .as_str()
                                .ok_or_else(|| invalid("typename must be a string"))?;
                            filter.type_ref = Some(Reference::from_legacy_typename(typename));
                        }
                        _ => {
                            filter.properties.insert(key.clone(), Property::from_json(value));
                        }
                    }
                }
                Ok(filter)
            }
            other => Err(invalid(&format!("unsupported JSON value {other}"))),
        }
    }
}

fn json_ids(value: &JsonValue) -> DbResult<Vec<ObjectId>> {
    let parse = |v: &JsonValue| -> DbResult<ObjectId> {
        let hex = v.as_str().ok_or_else(|| invalid("ids must be strings"))?;
        Ok(ObjectId::from_hex(hex)?)
    };
    match value {
        JsonValue::Array(items) => items.iter().map(parse).collect(),
        single => Ok(vec![parse(single)?]),
    }
}

fn invalid(reason: &str) -> DbError {
    warn!(reason, "filter source rejected");
    DbError::InvalidFilterSource(reason.to_string())
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Filter");
        if let Some(type_ref) = &self.type_ref {
            s.field("type_ref", type_ref);
        }
        if !self.properties.is_empty() {
            s.field("properties", &self.properties);
        }
        if let Some(ids) = &self.object_ids {
            s.field("object_ids", ids);
        }
        if let Some(text) = &self.text {
            s.field("text", text);
        }
        if !self.meta_keys.is_empty() {
            s.field("meta_keys", &self.meta_keys);
        }
        if self.predicate.is_some() {
            s.field("predicate", &"<fn>");
        }
        if self.not {
            s.field("not", &true);
        }
        if !self.and.is_empty() {
            s.field("and", &self.and);
        }
        if !self.or.is_empty() {
            s.field("or", &self.or);
        }
        s.field("options", &self.options).finish()
    }
}

/// Anything a query accepts as its filter.
#[derive(Clone)]
pub enum FilterSource {
    All,
    Filter(Filter),
    Predicate(Predicate),
    Text(String),
    Properties(BTreeMap<String, Property>),
    /// Conjunction of sources.
    And(Vec<FilterSource>),
    Json(JsonValue),
}

impl FilterSource {
    pub fn predicate(predicate: impl Fn(&EchoObject) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    pub fn properties<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        Self::Filter(Filter::properties(properties))
    }

    /// Build the filter. When `options` is given it is applied to the root,
    /// and to every sub-filter when `inherit` is set.
    pub fn into_filter(self, options: Option<QueryOptions>, inherit: bool) -> DbResult<Filter> {
        let mut filter = match self {
            Self::All => Filter::all(),
            Self::Filter(filter) => filter,
            Self::Predicate(predicate) => Filter {
                predicate: Some(predicate),
                ..Filter::default()
            },
            Self::Text(text) => Filter::text(text),
            Self::Properties(properties) => Filter {
                properties,
                ..Filter::default()
            },
            Self::And(sources) => Filter::and(
                sources
                    .into_iter()
                    .map(|s| s.into_filter(None, inherit))
                    .collect::<DbResult<Vec<_>>>()?,
            ),
            Self::Json(value) => Filter::from_json(&value)?,
        };
        if let Some(options) = options {
            filter.set_options(options, inherit);
        }
        Ok(filter)
    }
}

impl fmt::Debug for FilterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Properties(p) => f.debug_tuple("Properties").field(p).finish(),
            Self::And(sources) => f.debug_tuple("And").field(sources).finish(),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

impl From<Filter> for FilterSource {
    fn from(filter: Filter) -> Self {
        Self::Filter(filter)
    }
}

impl From<&str> for FilterSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FilterSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<JsonValue> for FilterSource {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

impl From<BTreeMap<String, Property>> for FilterSource {
    fn from(properties: BTreeMap<String, Property>) -> Self {
        Self::Properties(properties)
    }
}

impl From<Vec<FilterSource>> for FilterSource {
    fn from(sources: Vec<FilterSource>) -> Self {
        Self::And(sources)
    }
}
