use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use echo_types::{ObjectId, SpaceKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Backend, ItemInfo, ItemQuery, ListenerId, UpdateEvent, UpdateListener};
use crate::cell::Cell;
use crate::document::{DocumentSnapshot, DocumentState};
use crate::error::{ModelError, ModelResult};
use crate::mutation::Mutation;
use crate::receipt::{AckSender, Acknowledgement, MutationReceipt};

/// When acknowledgements issued by [`InMemoryBackend`] resolve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Durable on return.
    #[default]
    Immediate,
    /// Pending until [`InMemoryBackend::confirm_pending`] or
    /// [`InMemoryBackend::fail_pending`] is called.
    Deferred,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub ack_mode: AckMode,
}

struct Item {
    model: String,
    doc: DocumentState,
}

impl Item {
    fn info(&self, id: ObjectId) -> ItemInfo {
        ItemInfo {
            id,
            model: self.model.clone(),
            deleted: self.doc.is_deleted(),
            type_ref: self.doc.type_ref().cloned(),
            meta: self.doc.meta().clone(),
        }
    }
}

#[derive(Default)]
struct BackendState {
    items: HashMap<ObjectId, Item>,
    order: Vec<ObjectId>,
    seq: u64,
    /// Items touched by the open batch, if one is open.
    batch: Option<Vec<ObjectId>>,
    pending: Vec<AckSender>,
}

/// In-memory, HashMap-based backend for one space.
///
/// Intended for tests and embedding. State is held behind a `RwLock`;
/// listeners are called after the lock is released so they may read
/// the backend.
pub struct InMemoryBackend {
    space_key: SpaceKey,
    config: BackendConfig,
    state: RwLock<BackendState>,
    listeners: RwLock<Vec<(ListenerId, UpdateListener)>>,
    next_listener: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(space_key: SpaceKey) -> Self {
        Self::with_config(space_key, BackendConfig::default())
    }

    pub fn with_config(space_key: SpaceKey, config: BackendConfig) -> Self {
        Self {
            space_key,
            config,
            state: RwLock::new(BackendState::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Number of items, including deleted ones.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").items.is_empty()
    }

    /// Last issued write sequence number.
    pub fn seq(&self) -> u64 {
        self.state.read().expect("lock poisoned").seq
    }

    pub fn pending_acks(&self) -> usize {
        self.state.read().expect("lock poisoned").pending.len()
    }

    /// Resolve every outstanding acknowledgement as durable.
    pub fn confirm_pending(&self) -> usize {
        let pending = std::mem::take(&mut self.state.write().expect("lock poisoned").pending);
        let count = pending.len();
        for sender in pending {
            sender.confirm();
        }
        count
    }

    /// Resolve every outstanding acknowledgement as failed.
    pub fn fail_pending(&self, reason: &str) -> usize {
        let pending = std::mem::take(&mut self.state.write().expect("lock poisoned").pending);
        let count = pending.len();
        if count > 0 {
            warn!(space = %self.space_key.short_id(), count, reason, "failing pending writes");
        }
        for sender in pending {
            sender.fail(reason);
        }
        count
    }

    /// Record a write under the state lock. Returns the receipt and, when
    /// no batch is open, the event to dispatch once the lock is released.
    fn record_write(
        &self,
        state: &mut BackendState,
        id: ObjectId,
        op_count: usize,
    ) -> (MutationReceipt, Option<UpdateEvent>) {
        state.seq += 1;
        let seq = state.seq;

        let ack = match self.config.ack_mode {
            AckMode::Immediate => Acknowledgement::durable(),
            AckMode::Deferred => {
                let (sender, ack) = Acknowledgement::pending();
                state.pending.push(sender);
                ack
            }
        };

        let event = match state.batch.as_mut() {
            Some(touched) => {
                if !touched.contains(&id) {
                    touched.push(id);
                }
                None
            }
            None => Some(UpdateEvent {
                space_key: self.space_key,
                item_ids: vec![id],
                seq,
            }),
        };

        let receipt = MutationReceipt {
            seq,
            object_id: id,
            op_count,
            ack,
        };
        (receipt, event)
    }

    fn dispatch(&self, event: &UpdateEvent) {
        let listeners: Vec<UpdateListener> = self
            .listeners
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Backend for InMemoryBackend {
    fn space_key(&self) -> SpaceKey {
        self.space_key
    }

    fn insert(
        &self,
        id: ObjectId,
        model: &str,
        snapshot: DocumentSnapshot,
    ) -> ModelResult<MutationReceipt> {
        let (receipt, event) = {
            let mut state = self.state.write().expect("lock poisoned");
            if state.items.contains_key(&id) {
                return Err(ModelError::ItemExists(id));
            }
            let op_count = snapshot.data.len();
            state.items.insert(
                id,
                Item {
                    model: model.to_string(),
                    doc: DocumentState::from_snapshot(snapshot),
                },
            );
            state.order.push(id);
            self.record_write(&mut state, id, op_count)
        };
        debug!(space = %self.space_key.short_id(), item = %id.short_id(), model, seq = receipt.seq, "item inserted");
        if let Some(event) = event {
            self.dispatch(&event);
        }
        Ok(receipt)
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .items
            .contains_key(id)
    }

    fn get(&self, id: &ObjectId, path: &[String]) -> ModelResult<Option<Cell>> {
        let state = self.state.read().expect("lock poisoned");
        let item = state.items.get(id).ok_or(ModelError::ItemNotFound(*id))?;
        if path.is_empty() {
            return Ok(Some(Cell::Record(item.doc.data().clone())));
        }
        Ok(item.doc.get(path).cloned())
    }

    fn item(&self, id: &ObjectId) -> ModelResult<ItemInfo> {
        let state = self.state.read().expect("lock poisoned");
        state
            .items
            .get(id)
            .map(|item| item.info(*id))
            .ok_or(ModelError::ItemNotFound(*id))
    }

    fn snapshot(&self, id: &ObjectId) -> ModelResult<DocumentSnapshot> {
        let state = self.state.read().expect("lock poisoned");
        state
            .items
            .get(id)
            .map(|item| item.doc.snapshot())
            .ok_or(ModelError::ItemNotFound(*id))
    }

    fn mutate(&self, id: &ObjectId, mutations: Vec<Mutation>) -> ModelResult<MutationReceipt> {
        let (receipt, event) = {
            let mut state = self.state.write().expect("lock poisoned");
            let item = state
                .items
                .get_mut(id)
                .ok_or(ModelError::ItemNotFound(*id))?;
            item.doc.apply(&mutations)?;
            self.record_write(&mut state, *id, mutations.len())
        };
        if let Some(event) = event {
            self.dispatch(&event);
        }
        Ok(receipt)
    }

    fn begin_batch(&self) -> bool {
        let mut state = self.state.write().expect("lock poisoned");
        if state.batch.is_some() {
            return false;
        }
        state.batch = Some(Vec::new());
        true
    }

    fn commit_batch(&self) {
        let event = {
            let mut state = self.state.write().expect("lock poisoned");
            match state.batch.take() {
                Some(touched) if !touched.is_empty() => Some(UpdateEvent {
                    space_key: self.space_key,
                    item_ids: touched,
                    seq: state.seq,
                }),
                _ => None,
            }
        };
        if let Some(event) = event {
            debug!(space = %self.space_key.short_id(), items = event.item_ids.len(), seq = event.seq, "batch committed");
            self.dispatch(&event);
        }
    }

    fn in_batch(&self) -> bool {
        self.state.read().expect("lock poisoned").batch.is_some()
    }

    fn query(&self, query: &ItemQuery) -> Vec<ItemInfo> {
        let state = self.state.read().expect("lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.items.get(id).map(|item| item.info(*id)))
            .filter(|info| query.admits(info))
            .collect()
    }

    fn on_update(&self, listener: UpdateListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .expect("lock poisoned")
            .push((id, listener));
        id
    }

    fn off_update(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("lock poisoned");
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeletedVisibility;
    use crate::document::{MODEL_DOCUMENT, MODEL_TEXT};
    use echo_types::Scalar;
    use std::sync::{Arc, Mutex};

    fn key(k: &str) -> Vec<String> {
        vec![k.to_string()]
    }

    fn text(s: &str) -> Cell {
        Cell::Scalar(Scalar::from(s))
    }

    fn recorder(backend: &InMemoryBackend) -> Arc<Mutex<Vec<UpdateEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        backend.on_update(Arc::new(move |event: &UpdateEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        events
    }

    #[test]
    fn insert_and_read_back() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let id = ObjectId::random();
        backend
            .insert(id, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        backend.set(&id, key("title"), text("hello")).unwrap();

        assert_eq!(backend.get(&id, &key("title")).unwrap(), Some(text("hello")));
        assert!(backend.contains(&id));
        assert_eq!(backend.seq(), 2);
        assert!(matches!(
            backend.insert(id, MODEL_DOCUMENT, DocumentSnapshot::default()),
            Err(ModelError::ItemExists(_))
        ));
    }

    #[test]
    fn unknown_item_is_an_error() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let id = ObjectId::random();
        assert_eq!(
            backend.get(&id, &key("title")),
            Err(ModelError::ItemNotFound(id))
        );
        assert!(backend.mutate(&id, vec![]).is_err());
    }

    #[test]
    fn writes_notify_synchronously() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let events = recorder(&backend);
        let id = ObjectId::random();
        backend
            .insert(id, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        backend.set(&id, key("title"), text("a")).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].touches(&id));
    }

    #[test]
    fn batch_emits_once_at_commit() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let a = ObjectId::random();
        let b = ObjectId::random();
        backend
            .insert(a, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        backend
            .insert(b, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        let events = recorder(&backend);

        assert!(backend.begin_batch());
        assert!(!backend.begin_batch());
        backend.set(&a, key("x"), text("1")).unwrap();
        backend.set(&b, key("x"), text("2")).unwrap();
        backend.set(&a, key("y"), text("3")).unwrap();

        // State changes are not deferred.
        assert_eq!(backend.get(&a, &key("y")).unwrap(), Some(text("3")));
        assert!(events.lock().unwrap().is_empty());

        backend.commit_batch();
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_ids, vec![a, b]);
        assert!(!backend.in_batch());
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let events = recorder(&backend);
        backend.begin_batch();
        backend.commit_batch();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_may_read_backend() {
        let backend = Arc::new(InMemoryBackend::new(SpaceKey::random()));
        let id = ObjectId::random();
        backend
            .insert(id, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (backend.clone(), seen.clone());
        backend.on_update(Arc::new(move |event: &UpdateEvent| {
            let value = reader.get(&event.item_ids[0], &["title".to_string()]).unwrap();
            *sink.lock().unwrap() = value;
        }));
        backend.set(&id, key("title"), text("visible")).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(text("visible")));
    }

    #[test]
    fn off_update_stops_delivery() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let events = Arc::new(Mutex::new(0));
        let sink = events.clone();
        let listener = backend.on_update(Arc::new(move |_: &UpdateEvent| {
            *sink.lock().unwrap() += 1;
        }));
        assert!(backend.off_update(listener));
        assert!(!backend.off_update(listener));
        backend
            .insert(ObjectId::random(), MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        assert_eq!(*events.lock().unwrap(), 0);
    }

    #[test]
    fn query_filters_and_keeps_insertion_order() {
        let backend = InMemoryBackend::new(SpaceKey::random());
        let ids: Vec<ObjectId> = (0..4).map(|_| ObjectId::random()).collect();
        for (i, id) in ids.iter().enumerate() {
            let model = if i == 3 { MODEL_TEXT } else { MODEL_DOCUMENT };
            backend
                .insert(*id, model, DocumentSnapshot::default())
                .unwrap();
        }
        backend
            .mutate(&ids[1], vec![Mutation::SetDeleted(true)])
            .unwrap();

        let visible: Vec<ObjectId> = backend
            .query(&ItemQuery::default())
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(visible, vec![ids[0], ids[2]]);

        let deleted = backend.query(&ItemQuery {
            deleted: DeletedVisibility::ShowDeletedOnly,
            ..ItemQuery::default()
        });
        assert_eq!(deleted.len(), 1);
        assert_eq!(backend.query(&ItemQuery::everything()).len(), 4);
    }

    #[tokio::test]
    async fn deferred_acks_resolve_on_confirm() {
        let backend = InMemoryBackend::with_config(
            SpaceKey::random(),
            BackendConfig {
                ack_mode: AckMode::Deferred,
            },
        );
        let id = ObjectId::random();
        let receipt = backend
            .insert(id, MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        assert!(!receipt.ack.is_settled());
        assert_eq!(backend.pending_acks(), 1);

        assert_eq!(backend.confirm_pending(), 1);
        receipt.wait().await.unwrap();
    }

    #[tokio::test]
    async fn deferred_acks_report_failure() {
        let backend = InMemoryBackend::with_config(
            SpaceKey::random(),
            BackendConfig {
                ack_mode: AckMode::Deferred,
            },
        );
        let receipt = backend
            .insert(ObjectId::random(), MODEL_DOCUMENT, DocumentSnapshot::default())
            .unwrap();
        backend.fail_pending("replica unreachable");
        assert_eq!(
            receipt.wait().await,
            Err(ModelError::Acknowledgement("replica unreachable".into()))
        );
    }
}
