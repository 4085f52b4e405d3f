//! Live objects.
//!
//! An [`EchoObject`] starts `Detached`, holding its state in a local
//! [`DocumentState`] and caching the objects it links to. Adding it to a
//! database moves it to `Bound` for good: from then on every read and
//! write goes through the database's backend.

mod clone;
mod json;
mod nested;
mod typed;

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use echo_model::{
    codec_for, Backend, Cell, DocumentSnapshot, DocumentState, Mutation, MutationBuilder,
    MutationReceipt, MODEL_DOCUMENT,
};
use echo_schema::{CollectionKind, LinkedField, SchemaDescriptor};
use echo_types::{ForeignKey, ObjectId, ObjectMeta, Reference, SpaceKey};
use tracing::warn;

use crate::batch::BatchScope;
use crate::collection::{EchoArray, OrderedCollection, OrderedSet};
use crate::database::{DatabaseInner, EchoDatabase};
use crate::error::{DbError, DbResult};
use crate::subscription::{ListenerSet, Subscription};
use crate::value::Property;

pub use clone::{clone_object, CloneOptions};
pub use nested::NestedObject;
pub use typed::{clone_typed, Expando, TypedObject};

/// Called once per committed change batch touching the object.
pub type ObjectCallback = crate::subscription::Callback<EchoObject>;

pub(crate) struct DetachedState {
    pub(crate) doc: DocumentState,
    /// Objects linked while detached; persisted alongside on bind.
    pub(crate) links: Vec<EchoObject>,
}

#[derive(Clone)]
pub(crate) struct BoundState {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) db: Weak<DatabaseInner>,
}

pub(crate) enum ObjectState {
    Detached(DetachedState),
    Bound(BoundState),
}

#[derive(Default)]
struct LocalBatch {
    depth: usize,
    dirty: bool,
}

struct ObjectInner {
    id: ObjectId,
    model: String,
    schema: Option<Arc<SchemaDescriptor>>,
    state: RwLock<ObjectState>,
    local_batch: Mutex<LocalBatch>,
    listeners: Arc<ListenerSet<EchoObject>>,
}

/// Handle to a live object. Cloning the handle does not copy the object;
/// see [`clone_object`] for that.
#[derive(Clone)]
pub struct EchoObject {
    inner: Arc<ObjectInner>,
}

impl EchoObject {
    /// New detached expando object of the document model.
    pub fn new() -> Self {
        Self::with_model(MODEL_DOCUMENT)
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self::detached(ObjectId::random(), model.into(), None, DocumentState::new())
    }

    /// New expando populated from `properties`.
    pub fn expando<I, K, V>(properties: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        let object = Self::new();
        object.set_all(properties)?;
        Ok(object)
    }

    pub(crate) fn detached(
        id: ObjectId,
        model: String,
        schema: Option<Arc<SchemaDescriptor>>,
        doc: DocumentState,
    ) -> Self {
        Self::from_state(
            id,
            model,
            schema,
            ObjectState::Detached(DetachedState {
                doc,
                links: Vec::new(),
            }),
        )
    }

    pub(crate) fn from_state(
        id: ObjectId,
        model: String,
        schema: Option<Arc<SchemaDescriptor>>,
        state: ObjectState,
    ) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id,
                model,
                schema,
                state: RwLock::new(state),
                local_batch: Mutex::new(LocalBatch::default()),
                listeners: Arc::new(ListenerSet::new()),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    pub fn schema(&self) -> Option<&Arc<SchemaDescriptor>> {
        self.inner.schema.as_ref()
    }

    /// Typename from the schema, or from the stored type reference.
    pub fn typename(&self) -> Option<String> {
        match &self.inner.schema {
            Some(schema) => Some(schema.typename.clone()),
            None => self.type_ref().map(|r| r.item_id),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(
            *self.inner.state.read().expect("object lock poisoned"),
            ObjectState::Bound(_)
        )
    }

    /// Space of the database this object is bound to.
    pub fn space_key(&self) -> Option<SpaceKey> {
        self.backend().map(|b| b.space_key())
    }

    pub fn database(&self) -> Option<EchoDatabase> {
        self.bound_state()
            .and_then(|b| b.db.upgrade())
            .map(EchoDatabase::from_inner)
    }

    pub(crate) fn bound_state(&self) -> Option<BoundState> {
        match &*self.inner.state.read().expect("object lock poisoned") {
            ObjectState::Bound(bound) => Some(bound.clone()),
            ObjectState::Detached(_) => None,
        }
    }

    pub(crate) fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.bound_state().map(|b| b.backend)
    }

    pub(crate) fn is_bound_to(&self, db: &Arc<DatabaseInner>) -> bool {
        self.bound_state()
            .is_some_and(|b| std::ptr::eq(b.db.as_ptr(), Arc::as_ptr(db)))
    }

    // -- attribute access --

    /// Read an attribute. Backend failures are logged and read as undefined.
    pub fn get(&self, key: &str) -> Property {
        self.try_get(key).unwrap_or_else(|e| {
            warn!(object = %self.id().short_id(), key, error = %e, "attribute read failed");
            Property::Undefined
        })
    }

    pub fn try_get(&self, key: &str) -> DbResult<Property> {
        if let Some(db) = self.bound_state().and_then(|b| b.db.upgrade()) {
            db.observe(self, key);
        }
        let path = vec![key.to_string()];
        let cell = self.read_cell(&path)?;
        let field = self.inner.schema.as_ref().and_then(|s| s.field(key));
        Ok(self.decode(field, cell, path))
    }

    /// Assign an attribute. The whole assignment runs in one batch.
    pub fn set(&self, key: &str, value: impl Into<Property>) -> DbResult<()> {
        self.set_at(vec![key.to_string()], value.into())
    }

    pub fn set_all<I, K, V>(&self, properties: I) -> DbResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        let _scope = BatchScope::open(self);
        for (key, value) in properties {
            self.assign(vec![key.into()], value.into())?;
        }
        Ok(())
    }

    /// Remove an attribute.
    pub fn delete(&self, key: &str) -> DbResult<()> {
        self.set_at(vec![key.to_string()], Property::Undefined)
    }

    /// Data keys currently present.
    pub fn keys(&self) -> Vec<String> {
        match self.read_cell(&[]) {
            Ok(Some(Cell::Record(data))) => data.into_keys().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_at(&self, path: Vec<String>, value: Property) -> DbResult<()> {
        let _scope = BatchScope::open(self);
        self.assign(path, value)
    }

    fn assign(&self, path: Vec<String>, value: Property) -> DbResult<()> {
        match value {
            Property::Undefined => {
                self.apply_mutations(vec![Mutation::Delete { path }])?;
            }
            Property::Object(other) => {
                let reference = self.link_object(&other)?;
                self.apply_mutations(vec![Mutation::set(path, Cell::Reference(reference))])?;
            }
            Property::Reference(reference) => {
                self.apply_mutations(vec![Mutation::set(path, Cell::Reference(reference))])?;
            }
            Property::Array(array) => match self.collection_kind(&path) {
                Some(CollectionKind::Linked) => {
                    OrderedSet::from(array.to_vec()).bind(self, path)?;
                }
                _ => array.bind(self, path)?,
            },
            Property::OrderedSet(set) => match self.collection_kind(&path) {
                Some(CollectionKind::Indexed) => {
                    EchoArray::from(set.to_vec()).bind(self, path)?;
                }
                _ => set.bind(self, path)?,
            },
            Property::List(items) => {
                if self.collection_kind(&path) == Some(CollectionKind::Linked) {
                    OrderedSet::from(items).bind(self, path)?;
                } else {
                    EchoArray::from(items).bind(self, path)?;
                }
            }
            Property::Record(fields) => {
                self.apply_mutations(vec![Mutation::set(path.clone(), Cell::empty_record())])?;
                for (key, value) in fields {
                    let mut field_path = path.clone();
                    field_path.push(key);
                    self.assign(field_path, value)?;
                }
            }
            Property::Nested(nested) => {
                let cell = nested.raw_cell()?.unwrap_or_else(Cell::empty_record);
                self.apply_mutations(vec![Mutation::set(path, cell)])?;
            }
            scalar => {
                if let Some(scalar) = scalar.to_scalar() {
                    self.apply_mutations(vec![Mutation::set(path, Cell::Scalar(scalar))])?;
                }
            }
        }
        Ok(())
    }

    /// Collection kind declared for a top-level array field.
    fn collection_kind(&self, path: &[String]) -> Option<CollectionKind> {
        let [key] = path else { return None };
        self.inner
            .schema
            .as_ref()
            .and_then(|s| s.field(key))
            .filter(|f| f.kind.is_array())
            .map(|f| f.collection)
    }

    /// Schema field kind first, then the cell's tag.
    pub(crate) fn decode(
        &self,
        field: Option<&LinkedField>,
        cell: Option<Cell>,
        path: Vec<String>,
    ) -> Property {
        if let Some(field) = field.filter(|f| f.kind.is_array()) {
            return match field.collection {
                CollectionKind::Indexed => Property::Array(EchoArray::bound(self.clone(), path)),
                CollectionKind::Linked => {
                    Property::OrderedSet(OrderedSet::bound(self.clone(), path))
                }
            };
        }
        match cell {
            None => Property::Undefined,
            Some(Cell::Scalar(scalar)) => Property::from_scalar(&scalar),
            Some(Cell::Reference(reference)) => self.resolve_reference(&reference),
            Some(Cell::Array(_)) => Property::Array(EchoArray::bound(self.clone(), path)),
            Some(Cell::List(_)) => Property::OrderedSet(OrderedSet::bound(self.clone(), path)),
            Some(Cell::Record(_)) => Property::Nested(NestedObject::new(self.clone(), path)),
        }
    }

    /// Encode a value stored inside a collection.
    pub(crate) fn encode_value(&self, value: &Property) -> DbResult<Cell> {
        Ok(match value {
            Property::Undefined | Property::Null => Cell::null(),
            Property::Object(other) => Cell::Reference(self.link_object(other)?),
            Property::Reference(reference) => Cell::Reference(reference.clone()),
            Property::Array(array) => Cell::Array(self.encode_all(&array.to_vec())?),
            Property::OrderedSet(set) => Cell::Array(self.encode_all(&set.to_vec())?),
            Property::List(items) => Cell::Array(self.encode_all(items)?),
            Property::Record(fields) => Cell::Record(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.encode_value(v)?)))
                    .collect::<DbResult<_>>()?,
            ),
            Property::Nested(nested) => nested.raw_cell()?.unwrap_or_else(Cell::empty_record),
            scalar => scalar.to_scalar().map(Cell::Scalar).unwrap_or_else(Cell::null),
        })
    }

    fn encode_all(&self, items: &[Property]) -> DbResult<Vec<Cell>> {
        items.iter().map(|v| self.encode_value(v)).collect()
    }

    // -- links --

    /// Register `other` as linked from this object and return the
    /// reference to store. Never follows the link.
    pub(crate) fn link_object(&self, other: &EchoObject) -> DbResult<Reference> {
        let other_space = other.space_key();
        if let Some(bound) = self.bound_state() {
            let own_space = bound.backend.space_key();
            return match other_space {
                None => {
                    if let Some(db) = bound.db.upgrade() {
                        EchoDatabase::from_inner(db).add(other)?;
                    }
                    Ok(Reference::local(&other.id()))
                }
                Some(space) if space == own_space => Ok(Reference::local(&other.id())),
                Some(space) => Ok(Reference::remote(&other.id(), &space)),
            };
        }

        let reference = match other_space {
            Some(space) => Reference::remote(&other.id(), &space),
            None => Reference::local(&other.id()),
        };
        if other.id() != self.id() {
            self.cache_link(other.clone());
        }
        Ok(reference)
    }

    /// Add to the pending link table, replacing an entry with the same id.
    pub(crate) fn cache_link(&self, other: EchoObject) {
        if let ObjectState::Detached(detached) =
            &mut *self.inner.state.write().expect("object lock poisoned")
        {
            detached.links.retain(|l| l.id() != other.id());
            detached.links.push(other);
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_links(&self) -> Vec<EchoObject> {
        match &*self.inner.state.read().expect("object lock poisoned") {
            ObjectState::Detached(detached) => detached.links.clone(),
            ObjectState::Bound(_) => Vec::new(),
        }
    }

    /// Resolve a reference to a live object: the pending link table when
    /// detached, the database (or the graph, for other spaces) when bound.
    pub fn lookup_link(&self, reference: &Reference) -> Option<EchoObject> {
        let id = reference.object_id()?;
        if id == self.id() && reference.space_key().is_none() {
            return Some(self.clone());
        }
        match &*self.inner.state.read().expect("object lock poisoned") {
            ObjectState::Detached(detached) => {
                return detached.links.iter().find(|l| l.id() == id).cloned();
            }
            ObjectState::Bound(_) => {}
        }
        self.database()?.resolve_reference(reference)
    }

    pub(crate) fn resolve_reference(&self, reference: &Reference) -> Property {
        match self.lookup_link(reference) {
            Some(object) => Property::Object(object),
            None if reference.object_id().is_none() => Property::Reference(reference.clone()),
            None => Property::Undefined,
        }
    }

    // -- state transitions --

    /// Move to `Bound`, returning the detached state to persist.
    pub(crate) fn bind(&self, bound: BoundState) -> DbResult<DetachedState> {
        let mut state = self.inner.state.write().expect("object lock poisoned");
        if let ObjectState::Bound(_) = &*state {
            return Err(DbError::AlreadyBound(self.id()));
        }
        match std::mem::replace(&mut *state, ObjectState::Bound(bound)) {
            ObjectState::Detached(detached) => Ok(detached),
            ObjectState::Bound(_) => Err(DbError::AlreadyBound(self.id())),
        }
    }

    /// Undo [`bind`](Self::bind) after the backend rejected the insert.
    pub(crate) fn restore_detached(&self, detached: DetachedState) {
        *self.inner.state.write().expect("object lock poisoned") = ObjectState::Detached(detached);
    }

    // -- mutation bridge --

    /// Cell at `path`; an empty path reads the whole data record.
    pub(crate) fn read_cell(&self, path: &[String]) -> DbResult<Option<Cell>> {
        let backend = {
            match &*self.inner.state.read().expect("object lock poisoned") {
                ObjectState::Detached(detached) => {
                    return Ok(if path.is_empty() {
                        Some(Cell::Record(detached.doc.data().clone()))
                    } else {
                        detached.doc.get(path).cloned()
                    });
                }
                ObjectState::Bound(bound) => bound.backend.clone(),
            }
        };
        Ok(backend.get(&self.id(), path)?)
    }

    /// Apply primitive operations. Detached objects apply them locally and
    /// return no receipt; bound objects forward them to the backend.
    pub(crate) fn apply_mutations(
        &self,
        mutations: Vec<Mutation>,
    ) -> DbResult<Option<MutationReceipt>> {
        if mutations.is_empty() {
            return Ok(None);
        }
        let bound = {
            let mut state = self.inner.state.write().expect("object lock poisoned");
            match &mut *state {
                ObjectState::Detached(detached) => {
                    detached.doc.apply(&mutations)?;
                    None
                }
                ObjectState::Bound(bound) => Some(bound.clone()),
            }
        };
        match bound {
            None => {
                self.mark_changed();
                Ok(None)
            }
            Some(bound) => {
                let receipt = bound.backend.mutate(&self.id(), mutations)?;
                if let Some(db) = bound.db.upgrade() {
                    db.track(receipt.ack.clone());
                }
                Ok(Some(receipt))
            }
        }
    }

    /// Apply a builder's operations as one write.
    pub fn mutate(&self, builder: MutationBuilder) -> DbResult<Option<MutationReceipt>> {
        let _scope = BatchScope::open(self);
        self.apply_mutations(builder.build())
    }

    /// Run `f` inside one batch; listeners are notified once at the end.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = BatchScope::open(self);
        f()
    }

    pub(crate) fn begin_local_batch(&self) {
        self.inner
            .local_batch
            .lock()
            .expect("batch lock poisoned")
            .depth += 1;
    }

    pub(crate) fn end_local_batch(&self) {
        let notify = {
            let mut batch = self.inner.local_batch.lock().expect("batch lock poisoned");
            batch.depth = batch.depth.saturating_sub(1);
            batch.depth == 0 && std::mem::take(&mut batch.dirty)
        };
        if notify {
            self.notify();
        }
    }

    fn mark_changed(&self) {
        let deferred = {
            let mut batch = self.inner.local_batch.lock().expect("batch lock poisoned");
            if batch.depth > 0 {
                batch.dirty = true;
            }
            batch.depth > 0
        };
        if !deferred {
            self.notify();
        }
    }

    pub(crate) fn notify(&self) {
        self.inner.listeners.emit(self);
    }

    /// Called once per committed change batch touching this object.
    pub fn subscribe(&self, callback: impl Fn(&EchoObject) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.listeners.add(Arc::new(callback));
        Subscription::from_set(&self.inner.listeners, id)
    }

    // -- system state --

    fn system<T>(
        &self,
        detached: impl FnOnce(&DocumentState) -> T,
        bound: impl FnOnce(echo_model::ItemInfo) -> T,
        fallback: T,
    ) -> T {
        let backend = {
            match &*self.inner.state.read().expect("object lock poisoned") {
                ObjectState::Detached(state) => return detached(&state.doc),
                ObjectState::Bound(b) => b.backend.clone(),
            }
        };
        match backend.item(&self.id()) {
            Ok(info) => bound(info),
            Err(e) => {
                warn!(object = %self.id().short_id(), error = %e, "item lookup failed");
                fallback
            }
        }
    }

    pub fn type_ref(&self) -> Option<Reference> {
        self.system(|doc| doc.type_ref().cloned(), |info| info.type_ref, None)
    }

    pub fn is_deleted(&self) -> bool {
        self.system(|doc| doc.is_deleted(), |info| info.deleted, false)
    }

    pub fn meta(&self) -> ObjectMeta {
        self.system(|doc| doc.meta().clone(), |info| info.meta, ObjectMeta::default())
    }

    pub fn add_meta_key(&self, key: ForeignKey) -> DbResult<()> {
        let _scope = BatchScope::open(self);
        self.apply_mutations(vec![Mutation::AddMetaKey(key)])?;
        Ok(())
    }

    pub(crate) fn set_deleted(&self, deleted: bool) -> DbResult<()> {
        let _scope = BatchScope::open(self);
        self.apply_mutations(vec![Mutation::SetDeleted(deleted)])?;
        Ok(())
    }

    /// Serialized state. Detached objects need a codec for their model.
    pub fn snapshot(&self) -> DbResult<DocumentSnapshot> {
        let backend = {
            match &*self.inner.state.read().expect("object lock poisoned") {
                ObjectState::Detached(detached) => {
                    let codec = codec_for(&self.inner.model)
                        .ok_or_else(|| DbError::MissingSnapshotCodec(self.inner.model.clone()))?;
                    return Ok(codec.encode(&detached.doc)?);
                }
                ObjectState::Bound(bound) => bound.backend.clone(),
            }
        };
        Ok(backend.snapshot(&self.id())?)
    }
}

impl Default for EchoObject {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle identity: two handles are equal when they share one object.
impl PartialEq for EchoObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EchoObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_bound() { "bound" } else { "detached" };
        f.debug_struct("EchoObject")
            .field("id", &self.id())
            .field("model", &self.inner.model)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_model::MODEL_TEXT;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn detached_read_your_writes() {
        let object = EchoObject::new();
        object.set("title", "hello").unwrap();
        object.set("count", 3).unwrap();

        assert_eq!(object.get("title"), Property::from("hello"));
        assert_eq!(object.get("count").as_f64(), Some(3.0));
        assert!(object.get("missing").is_undefined());
        assert!(!object.is_bound());
    }

    #[test]
    fn undefined_deletes_key() {
        let object = EchoObject::expando([("title", "x")]).unwrap();
        object.set("title", Property::Undefined).unwrap();
        assert!(object.get("title").is_undefined());
        assert!(object.keys().is_empty());
    }

    #[test]
    fn plain_list_becomes_indexed_collection() {

        let object = EchoObject::new();
        object.set("tags", Property::list(["a", "b", "c"])).unwrap();

        let tags = object.get("tags");
        let array = tags.as_array().expect("indexed collection");
        assert_eq!(
            array.to_vec(),
            vec![Property::from("a"), Property::from("b"), Property::from("c")]
        );
    }

    #[test]
    fn plain_record_becomes_nested_object() {
        let object = EchoObject::new();
        object
            .set("address", Property::record([("city", "Oslo"), ("zip", "0150")]))
            .unwrap();

        let address = object.get("address");
        let nested = address.as_nested().expect("nested object");
        assert_eq!(nested.get("city"), Property::from("Oslo"));
        nested.set("city", "Bergen").unwrap();
        assert_eq!(nested.get("city"), Property::from("Bergen"));
    }

    #[test]
    fn detached_link_resolves_from_cache() {
        let owner = EchoObject::new();
        let target = EchoObject::expando([("name", "target")]).unwrap();
        owner.set("ref", &target).unwrap();

        let resolved = owner.get("ref");
        assert_eq!(resolved.as_object(), Some(&target));
        assert_eq!(owner.cached_links().len(), 1);
    }

    #[test]
    fn self_link_does_not_cache() {
        let object = EchoObject::new();
        object.set("me", &object).unwrap();
        assert!(object.cached_links().is_empty());
        assert_eq!(object.get("me").as_object(), Some(&object));
    }

    #[test]
    fn unresolvable_reference_reads_undefined() {
        let object = EchoObject::new();
        object
            .set("ref", Reference::local(&ObjectId::random()))
            .unwrap();
        assert!(object.get("ref").is_undefined());
    }

    #[test]
    fn detached_batch_notifies_once() {
        let object = EchoObject::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let _sub = object.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        object.batch(|| {
            object.set("a", 1).unwrap();
            object.set("b", 2).unwrap();
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        object.set("c", Property::record([("x", 1), ("y", 2)])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_codec_blocks_snapshot() {
        let object = EchoObject::with_model(MODEL_TEXT);
        assert!(matches!(
            object.snapshot(),
            Err(DbError::MissingSnapshotCodec(model)) if model == MODEL_TEXT
        ));
        assert!(EchoObject::new().snapshot().is_ok());
    }

    #[test]
    fn meta_keys_append() {
        let object = EchoObject::new();
        object
            .add_meta_key(ForeignKey::new("github.com", "1"))
            .unwrap();
        assert_eq!(object.meta().keys.len(), 1);
    }
}
