use echo_model::ModelError;
use echo_schema::SchemaError;
use echo_types::{ObjectId, SpaceKey, TypeError};

/// Errors from the object layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The object is already bound to a database.
    #[error("object {0} is already bound to a database")]
    AlreadyBound(ObjectId),

    /// The object is not bound to this database.
    #[error("object {0} is not in this database")]
    NotInDatabase(ObjectId),

    /// A detached object of this model cannot be snapshotted.
    #[error("no snapshot codec for model {0}")]
    MissingSnapshotCodec(String),

    /// Free-text filtering is reserved.
    #[error("text search is not supported")]
    TextSearchUnsupported,

    #[error("invalid filter source: {0}")]
    InvalidFilterSource(String),

    /// The linked-order collection cannot delete during a positional insert.
    #[error("delete count {0} not supported by linked-order collections")]
    DeleteCountUnsupported(usize),

    #[error("index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("space {0} is already registered")]
    DuplicateSpace(SpaceKey),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for object layer operations.
pub type DbResult<T> = Result<T, DbError>;
