use std::fmt;

use echo_types::Scalar;
use serde::{Deserialize, Serialize};

/// Value kind of a declared field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar,
    String,
    Number,
    Boolean,
    Date,
    /// Rich text; pre-populated with an empty string on construction.
    Text,
    Reference,
    Record,
    Array,
}

impl FieldKind {
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Text => "text",
            Self::Reference => "reference",
            Self::Record => "record",
            Self::Array => "array",
        };
        f.write_str(name)
    }
}

/// Storage representation used for array fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Directly indexable ordered container.
    #[default]
    Indexed,
    /// Neighbor-pointer ordered list (deprecated).
    Linked,
}

/// A field as declared by its owning type, before linking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Scalar>,
    /// Referenced typename, for reference fields and arrays of references.
    pub reference: Option<String>,
    pub collection: CollectionKind,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            reference: None,
            collection: CollectionKind::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn record(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Record)
    }

    /// Reference to an object of type `typename`.
    pub fn reference(name: impl Into<String>, typename: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldKind::Reference);
        field.reference = Some(typename.into());
        field
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Array)
    }

    /// Array of references to objects of type `typename`.
    pub fn array_of(name: impl Into<String>, typename: impl Into<String>) -> Self {
        let mut field = Self::array(name);
        field.reference = Some(typename.into());
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Scalar>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn linked(mut self) -> Self {
        self.collection = CollectionKind::Linked;
        self
    }
}

/// A type as contributed during the registration phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub typename: String,
    pub version: String,
    pub fields: Vec<FieldDefinition>,
}

impl TypeDefinition {
    pub fn new(typename: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            version: version.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }
}

/// Implemented by hand-written concrete types to contribute their
/// definition to a registry.
pub trait SchemaType {
    const TYPENAME: &'static str;
    const VERSION: &'static str = "0.1.0";

    fn fields() -> Vec<FieldDefinition>;

    fn definition() -> TypeDefinition {
        TypeDefinition {
            typename: Self::TYPENAME.to_string(),
            version: Self::VERSION.to_string(),
            fields: Self::fields(),
        }
    }
}
