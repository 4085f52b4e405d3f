use echo_types::ObjectId;

/// Errors from backend and state machine operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    /// No item with this id exists in the backend.
    #[error("item not found: {0}")]
    ItemNotFound(ObjectId),

    /// An item with this id was already inserted.
    #[error("item already exists: {0}")]
    ItemExists(ObjectId),

    /// A mutation addressed a path that does not hold the expected container.
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The backend reported that a write could not be made durable.
    #[error("acknowledgement failed: {0}")]
    Acknowledgement(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ModelError {
    pub(crate) fn invalid_path(path: &[String], reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.join("."),
            reason: reason.into(),
        }
    }
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
