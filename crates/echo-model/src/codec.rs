use crate::document::{DocumentSnapshot, DocumentState, MODEL_DOCUMENT};
use crate::error::ModelResult;

/// Extracts and injects serialized state for one model type.
///
/// Cloning a detached object needs a codec for its model; models without
/// one cannot be cloned until they are bound.
pub trait SnapshotCodec: Send + Sync {
    fn model(&self) -> &'static str;

    fn encode(&self, state: &DocumentState) -> ModelResult<DocumentSnapshot>;

    fn decode(&self, snapshot: DocumentSnapshot) -> ModelResult<DocumentState>;
}

/// Codec for the document model.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentCodec;

impl SnapshotCodec for DocumentCodec {
    fn model(&self) -> &'static str {
        MODEL_DOCUMENT
    }

    fn encode(&self, state: &DocumentState) -> ModelResult<DocumentSnapshot> {
        Ok(state.snapshot())
    }

    fn decode(&self, snapshot: DocumentSnapshot) -> ModelResult<DocumentState> {
        Ok(DocumentState::from_snapshot(snapshot))
    }
}

static DOCUMENT_CODEC: DocumentCodec = DocumentCodec;

/// Look up the snapshot codec registered for `model`.
pub fn codec_for(model: &str) -> Option<&'static dyn SnapshotCodec> {
    match model {
        MODEL_DOCUMENT => Some(&DOCUMENT_CODEC),
        _ => None,
    }
}
