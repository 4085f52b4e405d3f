//! Per-space database.
//!
//! An [`EchoDatabase`] binds live objects to one backend, keeps the
//! identity map from item ids to object handles, and turns backend update
//! events into object notifications, selection callbacks and query
//! refreshes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use echo_model::{
    codec_for, AckState, Acknowledgement, Backend, ItemQuery, ListenerId, ModelAllowlist,
    UpdateEvent,
};
use echo_schema::SchemaRegistry;
use echo_types::{ObjectId, Reference, SpaceKey};
use tracing::{debug, info, warn};

use crate::batch::BatchScope;
use crate::config::EchoConfig;
use crate::error::{DbError, DbResult};
use crate::graph::SpaceResolver;
use crate::object::{BoundState, EchoObject, ObjectState};
use crate::query::{matches, Filter, FilterSource, MatchContext, Query, QueryOptions};
use crate::subscription::{
    ListenerSet, SelectionCallback, SelectionEvent, SelectionSubscription, SelectionTable,
    Subscription,
};

/// Called with the object and key on every bound attribute read.
pub type AccessObserver = Arc<dyn Fn(&EchoObject, &str) + Send + Sync>;

pub(crate) struct DatabaseInner {
    backend: Arc<dyn Backend>,
    config: EchoConfig,
    registry: RwLock<Option<Arc<SchemaRegistry>>>,
    objects: RwLock<HashMap<ObjectId, EchoObject>>,
    selections: Arc<SelectionTable>,
    updates: Arc<ListenerSet<UpdateEvent>>,
    observer: RwLock<Option<AccessObserver>>,
    resolver: RwLock<Option<Weak<dyn SpaceResolver>>>,
    acks: Mutex<Vec<Acknowledgement>>,
    backend_listener: Mutex<Option<ListenerId>>,
}

/// Handle to a database. Clones share one database.
#[derive(Clone)]
pub struct EchoDatabase {
    inner: Arc<DatabaseInner>,
}

impl EchoDatabase {
    pub fn new(backend: Arc<dyn Backend>, config: EchoConfig) -> Self {
        let inner = Arc::new(DatabaseInner {
            backend: backend.clone(),
            config,
            registry: RwLock::new(None),
            objects: RwLock::new(HashMap::new()),
            selections: Arc::new(SelectionTable::new()),
            updates: Arc::new(ListenerSet::new()),
            observer: RwLock::new(None),
            resolver: RwLock::new(None),
            acks: Mutex::new(Vec::new()),
            backend_listener: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner);
        let listener = backend.on_update(Arc::new(move |event: &UpdateEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_update(event);
            }
        }));
        *inner
            .backend_listener
            .lock()
            .expect("listener lock poisoned") = Some(listener);
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<DatabaseInner> {
        &self.inner
    }

    pub fn space_key(&self) -> SpaceKey {
        self.inner.space_key()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &EchoConfig {
        &self.inner.config
    }

    /// Registry used to type objects materialized from backend items.
    pub fn set_schema_registry(&self, registry: Arc<SchemaRegistry>) {
        *self.inner.registry.write().expect("registry lock poisoned") = Some(registry);
    }

    /// Bind `object` to this database, persisting it and every detached
    /// object it links to. Fails with [`DbError::AlreadyBound`] if the
    /// object is bound anywhere already.
    pub fn add(&self, object: &EchoObject) -> DbResult<()> {
        let _scope = BatchScope::backend(self.inner.backend.clone());
        self.inner.add(object)
    }

    /// Persist an object that is referenced but not yet bound. A no-op for
    /// objects already in this database.
    pub fn save(&self, object: &EchoObject) -> DbResult<()> {
        if object.is_bound_to(&self.inner) {
            return Ok(());
        }
        self.add(object)
    }

    /// Soft delete: the item stays in the backend with its deletion marker
    /// set.
    pub fn remove(&self, object: &EchoObject) -> DbResult<()> {
        self.ensure_member(object)?;
        object.set_deleted(true)?;
        debug!(space = %self.space_key().short_id(), object = %object.id().short_id(), "object removed");
        Ok(())
    }

    /// Clear the deletion marker.
    pub fn restore(&self, object: &EchoObject) -> DbResult<()> {
        self.ensure_member(object)?;
        object.set_deleted(false)
    }

    fn ensure_member(&self, object: &EchoObject) -> DbResult<()> {
        if object.is_bound_to(&self.inner) {
            Ok(())
        } else {
            Err(DbError::NotInDatabase(object.id()))
        }
    }

    pub fn get_object_by_id(&self, id: &ObjectId) -> Option<EchoObject> {
        self.inner.lookup(id)
    }

    pub(crate) fn resolve_reference(&self, reference: &Reference) -> Option<EchoObject> {
        self.inner.resolve_reference(reference)
    }

    /// Visible objects of the default model, in insertion order.
    pub fn objects(&self) -> Vec<EchoObject> {
        let query = ItemQuery {
            default_model: self.inner.config.default_model.clone(),
            models: ModelAllowlist::Default,
            ..ItemQuery::default()
        };
        self.inner
            .backend
            .query(&query)
            .iter()
            .filter_map(|info| self.inner.lookup(&info.id))
            .collect()
    }

    /// Run `f` in one backend batch; one update event is emitted at the end.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = BatchScope::backend(self.inner.backend.clone());
        f()
    }

    pub fn query(
        &self,
        source: impl Into<FilterSource>,
        options: Option<QueryOptions>,
    ) -> DbResult<Query> {
        let filter = self.inner.build_filter(source.into(), options)?;
        Ok(Query::new(self.clone(), filter))
    }

    /// New selection subscription; narrow it with
    /// [`SelectionSubscription::update`].
    pub fn create_subscription(
        &self,
        callback: impl Fn(&SelectionEvent) + Send + Sync + 'static,
    ) -> SelectionSubscription {
        let callback: SelectionCallback = Arc::new(callback);
        self.inner.selections.create(callback)
    }

    /// Called for every committed change batch in this space.
    pub fn on_update(&self, callback: impl Fn(&UpdateEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.updates.add(Arc::new(callback));
        Subscription::from_set(&self.inner.updates, id)
    }

    pub fn set_access_observer(
        &self,
        observer: impl Fn(&EchoObject, &str) + Send + Sync + 'static,
    ) {
        *self.inner.observer.write().expect("observer lock poisoned") = Some(Arc::new(observer));
    }

    pub fn clear_access_observer(&self) {
        *self.inner.observer.write().expect("observer lock poisoned") = None;
    }

    /// Number of writes whose acknowledgement has not settled.
    pub fn pending_writes(&self) -> usize {
        self.inner
            .acks
            .lock()
            .expect("ack lock poisoned")
            .iter()
            .filter(|ack| !ack.is_settled())
            .count()
    }

    /// Wait for every outstanding write to settle. Returns the first
    /// backend failure unchanged.
    pub async fn flush(&self) -> DbResult<()> {
        let acks = std::mem::take(&mut *self.inner.acks.lock().expect("ack lock poisoned"));
        let mut first_error = None;
        for ack in acks {
            if let Err(e) = ack.wait().await {
                warn!(space = %self.space_key().short_id(), error = %e, "write failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EchoDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoDatabase")
            .field("space_key", &self.space_key())
            .field(
                "objects",
                &self.inner.objects.read().expect("object map lock poisoned").len(),
            )
            .finish()
    }
}

impl DatabaseInner {
    pub(crate) fn space_key(&self) -> SpaceKey {
        self.backend.space_key()
    }

    pub(crate) fn build_filter(
        &self,
        source: FilterSource,
        options: Option<QueryOptions>,
    ) -> DbResult<Filter> {
        let filter = source.into_filter(options, self.config.inherit_filter_options)?;
        if filter.uses_text() {
            return Err(DbError::TextSearchUnsupported);
        }
        Ok(filter)
    }

    fn add(self: &Arc<Self>, object: &EchoObject) -> DbResult<()> {
        let detached = object.bind(BoundState {
            backend: self.backend.clone(),
            db: Arc::downgrade(self),
        })?;

        let snapshot = match codec_for(object.model()) {
            Some(codec) => codec.encode(&detached.doc),
            None => Ok(detached.doc.snapshot()),
        };
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                object.restore_detached(detached);
                return Err(e.into());
            }
        };

        // Registered before the insert so update listeners can resolve it.
        self.objects
            .write()
            .expect("object map lock poisoned")
            .insert(object.id(), object.clone());

        match self.backend.insert(object.id(), object.model(), snapshot) {
            Ok(receipt) => self.track(receipt.ack),
            Err(e) => {
                self.objects
                    .write()
                    .expect("object map lock poisoned")
                    .remove(&object.id());
                object.restore_detached(detached);
                return Err(e.into());
            }
        }

        info!(
            space = %self.space_key().short_id(),
            object = %object.id().short_id(),
            model = object.model(),
            links = detached.links.len(),
            "object added"
        );

        for link in &detached.links {
            if !link.is_bound() {
                self.add(link)?;
            }
        }
        Ok(())
    }

    pub(crate) fn track(&self, ack: Acknowledgement) {
        let mut acks = self.acks.lock().expect("ack lock poisoned");
        acks.retain(|a| a.state() != AckState::Durable);
        if ack.state() != AckState::Durable {
            acks.push(ack);
        }
    }

    pub(crate) fn observe(&self, object: &EchoObject, key: &str) {
        let observer = self.observer.read().expect("observer lock poisoned").clone();
        if let Some(observer) = observer {
            observer(object, key);
        }
    }

    pub(crate) fn set_resolver(&self, resolver: Option<Weak<dyn SpaceResolver>>) {
        *self.resolver.write().expect("resolver lock poisoned") = resolver;
    }

    /// Resolve `reference` here, or through the graph when its host names
    /// another space.
    pub(crate) fn resolve_reference(self: &Arc<Self>, reference: &Reference) -> Option<EchoObject> {
        let id = reference.object_id()?;
        match reference.space_key() {
            Some(space) if space != self.space_key() => {
                let resolver = self
                    .resolver
                    .read()
                    .expect("resolver lock poisoned")
                    .as_ref()
                    .and_then(Weak::upgrade)?;
                resolver.resolve(&space, &id)
            }
            _ => self.lookup(&id),
        }
    }

    /// Handle for `id`, materializing one for backend items this database
    /// has not seen yet.
    pub(crate) fn lookup(self: &Arc<Self>, id: &ObjectId) -> Option<EchoObject> {
        if let Some(object) = self.objects.read().expect("object map lock poisoned").get(id) {
            return Some(object.clone());
        }
        let info = self.backend.item(id).ok()?;
        let schema = info.type_ref.as_ref().and_then(|type_ref| {
            self.registry
                .read()
                .expect("registry lock poisoned")
                .as_ref()
                .and_then(|registry| registry.get(&type_ref.item_id).ok())
        });
        let object = EchoObject::from_state(
            *id,
            info.model,
            schema,
            ObjectState::Bound(BoundState {
                backend: self.backend.clone(),
                db: Arc::downgrade(self),
            }),
        );
        Some(
            self.objects
                .write()
                .expect("object map lock poisoned")
                .entry(*id)
                .or_insert(object)
                .clone(),
        )
    }

    /// Objects matching `filter`, in insertion order.
    pub(crate) fn run_filter(self: &Arc<Self>, filter: &Filter) -> DbResult<Vec<EchoObject>> {
        if !filter.options.admits_space(&self.space_key()) {
            return Ok(Vec::new());
        }
        let ctx = MatchContext::from_config(&self.config);
        let mut results = Vec::new();
        for info in self.backend.query(&ItemQuery::everything()) {
            let Some(object) = self.lookup(&info.id) else {
                continue;
            };
            if matches(filter, &object, &ctx)? {
                results.push(object);
            }
        }
        Ok(results)
    }

    fn handle_update(self: &Arc<Self>, event: &UpdateEvent) {
        let touched: Vec<EchoObject> = {
            let objects = self.objects.read().expect("object map lock poisoned");
            event
                .item_ids
                .iter()
                .filter_map(|id| objects.get(id).cloned())
                .collect()
        };
        for object in &touched {
            object.notify();
        }
        self.selections.dispatch(event, &|id| self.lookup(id));
        self.updates.emit(event);
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if let Some(listener) = self
            .backend_listener
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            self.backend.off_update(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::OrderedCollection;
    use crate::object::{clone_object, CloneOptions};
    use crate::value::Property;
    use echo_model::{AckMode, BackendConfig, InMemoryBackend, MODEL_TEXT};
    use echo_types::Scalar;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn database() -> EchoDatabase {
        EchoDatabase::new(
            Arc::new(InMemoryBackend::new(SpaceKey::random())),
            EchoConfig::default(),
        )
    }

    const LABELS: [Option<&str>; 10] = [
        Some("red"),
        Some("red"),
        Some("red"),
        Some("green"),
        Some("green"),
        Some("blue"),
        Some("blue"),
        Some("blue"),
        Some("blue"),
        None,
    ];

    fn labeled() -> (EchoDatabase, Vec<EchoObject>) {
        let db = database();
        let objects: Vec<EchoObject> = LABELS
            .iter()
            .enumerate()
            .map(|(idx, label)| {
                let object =
                    EchoObject::expando([("idx", Property::from(idx)), ("label", Property::from(*label))])
                        .unwrap();
                db.add(&object).unwrap();
                object
            })
            .collect();
        (db, objects)
    }

    #[test]
    fn property_and_predicate_queries() {
        let (db, _) = labeled();

        assert_eq!(db.query(Filter::properties([("label", "red")]), None).unwrap().len(), 3);
        assert_eq!(db.query(Filter::properties([("label", "pink")]), None).unwrap().len(), 0);
        assert_eq!(db.query(FilterSource::predicate(|_| true), None).unwrap().len(), 10);

        let combined = FilterSource::from(vec![
            FilterSource::predicate(|_| true),
            FilterSource::properties([("label", "blue")]),
            FilterSource::predicate(|o| o.get("idx").as_f64().is_some_and(|i| i > 6.0)),
        ]);
        assert_eq!(db.query(combined, None).unwrap().len(), 2);
    }

    #[test]
    fn json_filter_source() {
        let (db, _) = labeled();
        let query = db.query(serde_json::json!({ "label": "green" }), None).unwrap();
        assert_eq!(query.len(), 2);
        assert_eq!(query.first().unwrap().get("idx").as_f64(), Some(3.0));
    }

    #[test]
    fn soft_delete_visibility() {
        let (db, objects) = labeled();
        for object in &objects[..3] {
            db.remove(object).unwrap();
        }

        assert_eq!(db.query(FilterSource::All, None).unwrap().len(), 7);
        assert_eq!(
            db.query(FilterSource::All, Some(QueryOptions::show_deleted())).unwrap().len(),
            10
        );
        assert_eq!(
            db.query(FilterSource::All, Some(QueryOptions::deleted_only())).unwrap().len(),
            3
        );
        assert_eq!(db.objects().len(), 7);

        db.restore(&objects[0]).unwrap();
        assert_eq!(db.query(FilterSource::All, None).unwrap().len(), 8);
    }

    #[test]
    fn text_query_is_rejected() {
        let db = database();
        assert!(matches!(
            db.query("hello", None),
            Err(DbError::TextSearchUnsupported)
        ));
    }

    #[test]
    fn model_allowlist_filters_items() {
        let db = database();
        db.add(&EchoObject::new()).unwrap();
        db.add(&EchoObject::with_model(MODEL_TEXT)).unwrap();

        assert_eq!(db.query(FilterSource::All, None).unwrap().len(), 1);
        let any = QueryOptions::default().any_model();
        assert_eq!(db.query(FilterSource::All, Some(any)).unwrap().len(), 2);
    }

    #[test]
    fn bound_object_reads_through_backend() {
        let db = database();
        let object = EchoObject::expando([("title", "draft")]).unwrap();
        db.add(&object).unwrap();

        assert!(object.is_bound());
        assert_eq!(object.space_key(), Some(db.space_key()));
        object.set("title", "final").unwrap();
        let stored = db.backend().get(&object.id(), &["title".to_string()]).unwrap();
        assert_eq!(stored.and_then(|c| c.as_scalar().cloned()), Some(Scalar::from("final")));
        assert_eq!(object.get("title"), Property::from("final"));
    }

    #[test]
    fn detached_links_are_persisted_on_add() {
        let db = database();
        let owner = EchoObject::new();
        let target = EchoObject::expando([("name", "t")]).unwrap();
        owner.set("ref", &target).unwrap();
        owner.set("items", Property::list([Property::from(&target)])).unwrap();

        db.add(&owner).unwrap();
        assert!(target.is_bound());
        assert_eq!(db.get_object_by_id(&target.id()), Some(target.clone()));
        assert_eq!(owner.get("ref").as_object(), Some(&target));

        let linked = EchoObject::new();
        owner.set("other", &linked).unwrap();
        assert!(linked.is_bound());
    }

    #[test]
    fn list_of_objects_reads_back_after_binding() {
        let db = database();
        let owner = EchoObject::new();
        let children: Vec<EchoObject> = (0..3).map(|_| EchoObject::new()).collect();
        db.add(&owner).unwrap();
        owner.set("children", Property::list(children.iter())).unwrap();

        let read = owner.get("children");
        let array = read.as_array().unwrap();
        assert_eq!(array.len(), 3);
        for (i, child) in children.iter().enumerate() {
            assert_eq!(array.get(i).as_object(), Some(child));
        }
    }

    #[test]
    fn clone_keeps_id_and_original_cannot_be_added_again() {
        let first = database();
        let second = database();
        let object = EchoObject::expando([("title", "x")]).unwrap();
        first.add(&object).unwrap();

        let copy = clone_object(&object, CloneOptions::default()).unwrap();
        assert_eq!(copy.id(), object.id());
        assert_ne!(copy, object);
        assert!(!copy.is_bound());

        second.add(&copy).unwrap();
        assert_eq!(copy.get("title"), Property::from("x"));
        assert!(matches!(second.add(&object), Err(DbError::AlreadyBound(_))));
        assert!(matches!(first.add(&object), Err(DbError::AlreadyBound(_))));
    }

    #[test]
    fn batched_mutation_notifies_once_with_new_state() {
        let db = database();
        let task = EchoObject::expando([("title", "a")]).unwrap();
        let other = EchoObject::new();
        db.add(&task).unwrap();
        db.add(&other).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let seen_title = Arc::new(Mutex::new(None));
        let (count, title) = (fired.clone(), seen_title.clone());
        let subscription = db.create_subscription(move |event| {
            count.fetch_add(1, Ordering::SeqCst);
            *title.lock().unwrap() = event.updated.first().map(|o| o.get("title"));
        });
        subscription.update([task.id()]);

        db.batch(|| {
            task.set("title", "b").unwrap();
            task.set("done", true).unwrap();
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_title.lock().unwrap(), Some(Property::from("b")));

        other.set("title", "ignored").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn object_subscription_fires_per_batch() {
        let db = database();
        let object = EchoObject::new();
        db.add(&object).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let count = fired.clone();
        let _sub = object.subscribe(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        object.set("address", Property::record([("city", "Oslo"), ("zip", "0150")])).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_subscription_tracks_result_set() {
        let (db, objects) = labeled();
        let query = db.query(Filter::properties([("label", "red")]), None).unwrap();

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = sizes.clone();
        let _sub = query.subscribe(move |results| sink.lock().unwrap().push(results.len()));

        objects[3].set("label", "red").unwrap();
        objects[9].set("idx", 42).unwrap();
        db.remove(&objects[0]).unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![4, 3]);
    }

    #[test]
    fn access_observer_sees_bound_reads() {
        let db = database();
        let object = EchoObject::expando([("title", "x")]).unwrap();
        db.add(&object).unwrap();

        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();
        db.set_access_observer(move |_, key| sink.lock().unwrap().push(key.to_string()));
        let _ = object.get("title");
        db.clear_access_observer();
        let _ = object.get("title");
        assert_eq!(*keys.lock().unwrap(), vec!["title".to_string()]);
    }

    #[test]
    fn remove_requires_membership() {
        let db = database();
        assert!(matches!(
            db.remove(&EchoObject::new()),
            Err(DbError::NotInDatabase(_))
        ));
    }

    #[tokio::test]
    async fn flush_surfaces_backend_failure() {
        let backend = Arc::new(InMemoryBackend::with_config(
            SpaceKey::random(),
            BackendConfig {
                ack_mode: AckMode::Deferred,
            },
        ));
        let db = EchoDatabase::new(backend.clone(), EchoConfig::default());
        let object = EchoObject::new();
        db.add(&object).unwrap();
        object.set("title", "x").unwrap();

        assert_eq!(db.pending_writes(), 2);
        assert_eq!(object.get("title"), Property::from("x"));
        backend.fail_pending("replication refused");

        match db.flush().await {
            Err(DbError::Model(echo_model::ModelError::Acknowledgement(reason))) => {
                assert_eq!(reason, "replication refused")
            }
            other => panic!("unexpected flush result: {other:?}"),
        }
        assert_eq!(db.pending_writes(), 0);
    }

    #[tokio::test]
    async fn flush_waits_for_confirmation() {
        let backend = Arc::new(InMemoryBackend::with_config(
            SpaceKey::random(),
            BackendConfig {
                ack_mode: AckMode::Deferred,
            },
        ));
        let db = EchoDatabase::new(backend.clone(), EchoConfig::default());
        db.add(&EchoObject::new()).unwrap();
        assert_eq!(backend.confirm_pending(), 1);
        db.flush().await.unwrap();
    }
}
