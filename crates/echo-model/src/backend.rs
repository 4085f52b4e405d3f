use std::sync::Arc;

use echo_types::{ObjectId, ObjectMeta, Reference, SpaceKey};
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::document::{DocumentSnapshot, MODEL_DOCUMENT};
use crate::error::ModelResult;
use crate::mutation::{Mutation, MutationBuilder};
use crate::receipt::MutationReceipt;

/// Which items a query admits with respect to the deletion marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletedVisibility {
    #[default]
    Hide,
    ShowAll,
    ShowDeletedOnly,
}

impl DeletedVisibility {
    pub fn admits(self, deleted: bool) -> bool {
        match self {
            Self::Hide => !deleted,
            Self::ShowAll => true,
            Self::ShowDeletedOnly => deleted,
        }
    }
}

/// Which backing model types a query admits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelAllowlist {
    /// Only the configured default model.
    #[default]
    Default,
    Only(Vec<String>),
    /// Wildcard.
    Any,
}

impl ModelAllowlist {
    pub fn admits(&self, model: &str, default_model: &str) -> bool {
        match self {
            Self::Default => model == default_model,
            Self::Only(models) => models.iter().any(|m| m == model),
            Self::Any => true,
        }
    }
}

/// Options for [`Backend::query`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemQuery {
    pub deleted: DeletedVisibility,
    pub models: ModelAllowlist,
    pub default_model: String,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            deleted: DeletedVisibility::Hide,
            models: ModelAllowlist::Default,
            default_model: MODEL_DOCUMENT.to_string(),
        }
    }
}

impl ItemQuery {
    /// Every item regardless of deletion or model.
    pub fn everything() -> Self {
        Self {
            deleted: DeletedVisibility::ShowAll,
            models: ModelAllowlist::Any,
            ..Self::default()
        }
    }

    pub fn admits(&self, item: &ItemInfo) -> bool {
        self.deleted.admits(item.deleted) && self.models.admits(&item.model, &self.default_model)
    }
}

/// Item-level system state, without data.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemInfo {
    pub id: ObjectId,
    pub model: String,
    pub deleted: bool,
    pub type_ref: Option<Reference>,
    pub meta: ObjectMeta,
}

/// One committed change batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEvent {
    pub space_key: SpaceKey,
    /// Items touched, in first-touch order, without duplicates.
    pub item_ids: Vec<ObjectId>,
    pub seq: u64,
}

impl UpdateEvent {
    pub fn touches(&self, id: &ObjectId) -> bool {
        self.item_ids.contains(id)
    }
}

pub type UpdateListener = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Handle returned by [`Backend::on_update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Replicated item store for one space.
///
/// Implementations must satisfy:
/// - Writes are visible to the next read on the calling thread, before
///   their acknowledgement resolves.
/// - Update listeners run synchronously before the write returns, or at
///   batch commit when a batch is open, and never under an internal lock.
/// - A batch emits one [`UpdateEvent`] at commit covering every touched
///   item, and none if nothing was touched.
/// - `query` returns items in insertion order.
pub trait Backend: Send + Sync {
    fn space_key(&self) -> SpaceKey;

    /// Create an item from an initial snapshot.
    fn insert(
        &self,
        id: ObjectId,
        model: &str,
        snapshot: DocumentSnapshot,
    ) -> ModelResult<MutationReceipt>;

    fn contains(&self, id: &ObjectId) -> bool;

    /// Cell at `path` within the item's data. An empty path returns the
    /// whole data record.
    fn get(&self, id: &ObjectId, path: &[String]) -> ModelResult<Option<Cell>>;

    fn set(&self, id: &ObjectId, path: Vec<String>, value: Cell) -> ModelResult<MutationReceipt> {
        self.mutate(id, vec![Mutation::set(path, value)])
    }

    fn item(&self, id: &ObjectId) -> ModelResult<ItemInfo>;

    fn snapshot(&self, id: &ObjectId) -> ModelResult<DocumentSnapshot>;

    /// Apply mutations to one item as a single write.
    fn mutate(&self, id: &ObjectId, mutations: Vec<Mutation>) -> ModelResult<MutationReceipt>;

    fn builder(&self) -> MutationBuilder {
        MutationBuilder::new()
    }

    /// Open a batch. Returns `true` only if this call opened it; the
    /// caller that opened a batch is the one that commits it.
    fn begin_batch(&self) -> bool;

    fn commit_batch(&self);

    fn in_batch(&self) -> bool;

    fn query(&self, query: &ItemQuery) -> Vec<ItemInfo>;

    fn on_update(&self, listener: UpdateListener) -> ListenerId;

    /// Returns `true` if the listener was registered.
    fn off_update(&self, id: ListenerId) -> bool;
}
