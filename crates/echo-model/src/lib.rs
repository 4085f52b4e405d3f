//! Backend boundary for ECHO live objects.
//!
//! The replicated storage that persists and syncs CRDT operations lives
//! outside this workspace. This crate defines what the object layer needs
//! from it, plus the pieces both sides share:
//!
//! - [`Cell`] -- explicitly tagged stored values (scalar, reference, ordered
//!   collection, nested record)
//! - [`Mutation`] / [`MutationBuilder`] -- primitive operations
//! - [`DocumentState`] -- the state machine that applies mutations; used by
//!   detached objects and by [`InMemoryBackend`]
//! - [`SnapshotCodec`] -- per-model snapshot extraction for cloning
//! - [`MutationReceipt`] / [`Acknowledgement`] -- write sequencing and
//!   durability confirmation
//! - [`Backend`] -- the item accessor, mutation, batch, query, and update
//!   event surface
//!
//! # Storage Backends
//!
//! - [`InMemoryBackend`] -- `HashMap`-based backend for tests and embedding

pub mod backend;
pub mod cell;
pub mod codec;
pub mod document;
pub mod error;
pub mod memory;
pub mod mutation;
pub mod receipt;

pub use backend::{
    Backend, DeletedVisibility, ItemInfo, ItemQuery, ListenerId, ModelAllowlist, UpdateEvent,
    UpdateListener,
};
pub use cell::{Cell, CellKind, LinkedList, NodeId};
pub use codec::{codec_for, DocumentCodec, SnapshotCodec};
pub use document::{DocumentSnapshot, DocumentState, MODEL_DOCUMENT, MODEL_TEXT};
pub use error::{ModelError, ModelResult};
pub use memory::{AckMode, BackendConfig, InMemoryBackend};
pub use mutation::{Mutation, MutationBuilder};
pub use receipt::{AckSender, AckState, Acknowledgement, MutationReceipt};
