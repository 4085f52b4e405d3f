//! Reactive object layer for ECHO.
//!
//! Application code works with [`EchoObject`]s: attribute bags that start
//! detached, holding state locally, and are bound to an [`EchoDatabase`]
//! when added. Once bound, every read and write goes through the
//! database's [`Backend`](echo_model::Backend).
//!
//! - [`EchoObject`] / [`TypedObject`] / [`Expando`] -- live objects
//! - [`EchoArray`] / [`OrderedSet`] -- ordered collections bound to an
//!   object property
//! - [`Filter`] / [`Query`] -- filter trees and live queries
//! - [`EchoDatabase`] -- one space: identity map, batches, subscriptions
//! - [`Hypergraph`] -- several spaces behind one query and subscription
//!   surface
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use echo_db::{EchoConfig, EchoDatabase, EchoObject, Filter};
//! use echo_model::InMemoryBackend;
//! use echo_types::SpaceKey;
//!
//! let db = EchoDatabase::new(
//!     Arc::new(InMemoryBackend::new(SpaceKey::random())),
//!     EchoConfig::default(),
//! );
//! let task = EchoObject::expando([("title", "write docs")]).unwrap();
//! db.add(&task).unwrap();
//!
//! let query = db.query(Filter::properties([("title", "write docs")]), None).unwrap();
//! assert_eq!(query.first(), Some(task));
//! ```

mod batch;
pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod object;
pub mod query;
pub mod subscription;
pub mod value;

pub use collection::{EchoArray, OrderedCollection, OrderedSet};
pub use config::EchoConfig;
pub use database::{AccessObserver, EchoDatabase};
pub use error::{DbError, DbResult};
pub use graph::{GraphQuery, Hypergraph};
pub use object::{
    clone_object, clone_typed, CloneOptions, EchoObject, Expando, NestedObject, ObjectCallback,
    TypedObject,
};
pub use query::{matches, Filter, FilterSource, MatchContext, Predicate, Query, QueryOptions};
pub use subscription::{SelectionEvent, SelectionSubscription, Subscription};
pub use value::Property;
