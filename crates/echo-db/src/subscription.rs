use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use echo_model::UpdateEvent;
use echo_types::{ObjectId, SpaceKey};

use crate::object::EchoObject;

pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Callbacks keyed by registration id, called in registration order.
pub(crate) struct ListenerSet<E: ?Sized> {
    entries: RwLock<Vec<(u64, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E: ?Sized> ListenerSet<E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, callback: Callback<E>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .expect("listener lock poisoned")
            .push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().expect("listener lock poisoned");
        let before = entries.len();
        entries.retain(|(eid, _)| *eid != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().expect("listener lock poisoned").len()
    }

    /// Call every listener. The lock is released before the first call so
    /// listeners may subscribe, unsubscribe, or write.
    pub(crate) fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Registration handle. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub(crate) fn from_set<E: ?Sized + 'static>(set: &Arc<ListenerSet<E>>, id: u64) -> Self {
        let set = Arc::downgrade(set);
        Self::new(move || {
            if let Some(set) = set.upgrade() {
                set.remove(id);
            }
        })
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Delivered to a selection subscriber when a change batch touched at
/// least one selected object.
#[derive(Clone, Debug)]
pub struct SelectionEvent {
    pub space_key: SpaceKey,
    /// Selected objects the batch touched, in batch order.
    pub updated: Vec<EchoObject>,
}

pub type SelectionCallback = Callback<SelectionEvent>;

struct SelectionEntry {
    selection: HashSet<ObjectId>,
    callback: SelectionCallback,
}

/// Id-scoped subscriptions. A callback fires only for batches touching
/// an id in its selection; an empty selection never fires.
pub(crate) struct SelectionTable {
    entries: RwLock<BTreeMap<u64, SelectionEntry>>,
    next_id: AtomicU64,
}

impl SelectionTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn create(self: &Arc<Self>, callback: SelectionCallback) -> SelectionSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().expect("subscription lock poisoned").insert(
            id,
            SelectionEntry {
                selection: HashSet::new(),
                callback,
            },
        );
        SelectionSubscription {
            table: Arc::downgrade(self),
            id,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().expect("subscription lock poisoned").len()
    }

    fn update(&self, id: u64, selection: HashSet<ObjectId>) {
        if let Some(entry) = self
            .entries
            .write()
            .expect("subscription lock poisoned")
            .get_mut(&id)
        {
            entry.selection = selection;
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .write()
            .expect("subscription lock poisoned")
            .remove(&id);
    }

    /// Fire every subscriber whose selection the event touched.
    pub(crate) fn dispatch(
        &self,
        event: &UpdateEvent,
        resolve: &dyn Fn(&ObjectId) -> Option<EchoObject>,
    ) {
        let hits: Vec<(SelectionCallback, Vec<ObjectId>)> = {
            let entries = self.entries.read().expect("subscription lock poisoned");
            entries
                .values()
                .filter_map(|entry| {
                    let touched: Vec<ObjectId> = event
                        .item_ids
                        .iter()
                        .filter(|id| entry.selection.contains(id))
                        .copied()
                        .collect();
                    (!touched.is_empty()).then(|| (entry.callback.clone(), touched))
                })
                .collect()
        };
        for (callback, ids) in hits {
            let selection_event = SelectionEvent {
                space_key: event.space_key,
                updated: ids.iter().filter_map(resolve).collect(),
            };
            callback(&selection_event);
        }
    }
}

/// Handle to a selection subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes it"]
pub struct SelectionSubscription {
    table: Weak<SelectionTable>,
    id: u64,
}

impl SelectionSubscription {
    /// Replace the selection.
    pub fn update(&self, ids: impl IntoIterator<Item = ObjectId>) {
        if let Some(table) = self.table.upgrade() {
            table.update(self.id, ids.into_iter().collect());
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SelectionSubscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self.id);
        }
    }
}

impl fmt::Debug for SelectionSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionSubscription")
            .field("id", &self.id)
            .finish()
    }
}
