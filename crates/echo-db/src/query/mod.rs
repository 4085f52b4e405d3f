//! Filters and live queries.
//!
//! A [`Filter`] is a tree of leaf criteria combined with `and`, `or` and a
//! final `not`. [`matches`] evaluates it against one object; [`Query`]
//! evaluates it over a database and can be subscribed to.

mod filter;
mod matcher;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use echo_model::{DeletedVisibility, ModelAllowlist};
use echo_types::{ObjectId, SpaceKey};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::database::{DatabaseInner, EchoDatabase};
use crate::object::EchoObject;
use crate::subscription::Subscription;

pub use filter::{Filter, FilterSource, Predicate};
pub use matcher::{matches, type_matches, MatchContext};

/// Visibility, model and space options carried by every filter node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub deleted: DeletedVisibility,
    pub models: ModelAllowlist,
    /// Restrict to these spaces; `None` admits every space.
    pub spaces: Option<Vec<SpaceKey>>,
}

impl QueryOptions {
    pub fn show_deleted() -> Self {
        Self {
            deleted: DeletedVisibility::ShowAll,
            ..Self::default()
        }
    }

    pub fn deleted_only() -> Self {
        Self {
            deleted: DeletedVisibility::ShowDeletedOnly,
            ..Self::default()
        }
    }

    pub fn any_model(mut self) -> Self {
        self.models = ModelAllowlist::Any;
        self
    }

    pub fn admits_space(&self, space: &SpaceKey) -> bool {
        self.spaces.as_ref().map_or(true, |s| s.contains(space))
    }
}

/// Live query over one database.
#[derive(Clone, Debug)]
pub struct Query {
    db: EchoDatabase,
    filter: Filter,
}

impl Query {
    pub(crate) fn new(db: EchoDatabase, filter: Filter) -> Self {
        Self { db, filter }
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Matching objects in insertion order, evaluated now.
    pub fn objects(&self) -> Vec<EchoObject> {
        evaluate(self.db.inner(), &self.filter)
    }

    pub fn first(&self) -> Option<EchoObject> {
        self.objects().into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `callback` with the current results whenever a change batch
    /// touches an object that was, or now is, in the result set.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[EchoObject]) + Send + Sync + 'static,
    ) -> Subscription {
        let db: Weak<DatabaseInner> = Arc::downgrade(self.db.inner());
        let filter = self.filter.clone();
        let tracker = ResultTracker::new(&self.objects());
        self.db.on_update(move |event| {
            let Some(db) = db.upgrade() else { return };
            let current = evaluate(&db, &filter);
            if tracker.update(&event.item_ids, &current) {
                callback(&current);
            }
        })
    }
}

fn evaluate(db: &Arc<DatabaseInner>, filter: &Filter) -> Vec<EchoObject> {
    db.run_filter(filter).unwrap_or_else(|e| {
        warn!(space = %db.space_key().short_id(), error = %e, "query evaluation failed");
        Vec::new()
    })
}

/// Ids from the previous evaluation of a subscribed query.
pub(crate) struct ResultTracker {
    previous: Mutex<HashSet<ObjectId>>,
}

impl ResultTracker {
    pub(crate) fn new(initial: &[EchoObject]) -> Self {
        Self {
            previous: Mutex::new(initial.iter().map(|o| o.id()).collect()),
        }
    }

    /// Record `current`, returning whether any of `touched` was in the
    /// previous or the current result.
    pub(crate) fn update(&self, touched: &[ObjectId], current: &[EchoObject]) -> bool {
        let ids: HashSet<ObjectId> = current.iter().map(|o| o.id()).collect();
        let mut previous = self.previous.lock().expect("query lock poisoned");
        let hit = touched
            .iter()
            .any(|id| previous.contains(id) || ids.contains(id));
        *previous = ids;
        hit
    }
}
