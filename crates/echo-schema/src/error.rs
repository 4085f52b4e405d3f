/// Errors produced by the schema registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    /// `link()` was invoked on a registry that is already linked.
    #[error("schema registry is already linked")]
    AlreadyLinked,

    /// The registry has not been linked yet.
    #[error("schema registry is not linked")]
    NotLinked,

    /// A typename was registered twice, or both sides of a merge define it.
    #[error("duplicate typename: {0}")]
    DuplicateTypename(String),

    /// A field references a typename that was never registered.
    #[error("field {typename}.{field} references unknown type {target}")]
    UnresolvedReference {
        typename: String,
        field: String,
        target: String,
    },

    /// No type with this name is registered.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Registration was attempted after linking.
    #[error("cannot register {0}: registry is frozen")]
    Frozen(String),
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
