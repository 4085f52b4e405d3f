//! Schema registry for ECHO.
//!
//! Type definitions may reference each other in any order, so the registry
//! works in two phases:
//!
//! 1. **Register** -- every type contributes its [`TypeDefinition`]. Order
//!    does not matter and unknown referenced typenames are allowed.
//! 2. **Link** -- run exactly once by an explicit bootstrap call. Every
//!    field's referenced typename is resolved to a [`TypeHandle`] and the
//!    resulting [`SchemaDescriptor`] is frozen onto its registry entry.
//!
//! Linking twice is an error, as is merging registries that share a
//! typename.

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{CollectionKind, FieldDefinition, FieldKind, SchemaType, TypeDefinition};
pub use error::{SchemaError, SchemaResult};
pub use registry::{DeferGuard, LinkOutcome, LinkedField, SchemaDescriptor, SchemaRegistry, TypeHandle};
