//! Foundation types for ECHO, the reactive object layer of a local-first
//! graph database.
//!
//! Every other ECHO crate depends on `echo-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Client-generated, globally unique object identity
//! - [`SpaceKey`] -- Identity of a space (one backing store namespace)
//! - [`Reference`] -- Encoded pointer to another object, resolved lazily
//! - [`ObjectMeta`] / [`ForeignKey`] -- Per-object foreign-system keys
//! - [`Scalar`] -- Leaf values stored in object attributes

pub mod error;
pub mod identity;
pub mod meta;
pub mod reference;
pub mod scalar;

pub use error::TypeError;
pub use identity::{ObjectId, SpaceKey};
pub use meta::{ForeignKey, ObjectMeta};
pub use reference::{Reference, LEGACY_TYPE_HOST, PROTOCOL_PROTOBUF};
pub use scalar::Scalar;
