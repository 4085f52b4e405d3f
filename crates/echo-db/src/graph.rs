//! Cross-space graph.
//!
//! The [`Hypergraph`] aggregates the databases of several spaces: one
//! query surface over all of them, selection subscriptions fed by every
//! registered space, and resolution of references that point into another
//! space.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use echo_model::UpdateEvent;
use echo_types::{ObjectId, SpaceKey};
use tracing::{info, warn};

use crate::config::EchoConfig;
use crate::database::EchoDatabase;
use crate::error::{DbError, DbResult};
use crate::object::EchoObject;
use crate::query::{Filter, FilterSource, QueryOptions, ResultTracker};
use crate::subscription::{
    ListenerSet, SelectionCallback, SelectionEvent, SelectionSubscription, SelectionTable,
    Subscription,
};

/// Lookup of objects held by other spaces.
pub(crate) trait SpaceResolver: Send + Sync {
    fn resolve(&self, space: &SpaceKey, id: &ObjectId) -> Option<EchoObject>;
}

struct GraphEntry {
    space_key: SpaceKey,
    db: EchoDatabase,
    _forward: Subscription,
}

struct GraphInner {
    config: EchoConfig,
    databases: RwLock<Vec<GraphEntry>>,
    selections: Arc<SelectionTable>,
    updates: Arc<ListenerSet<UpdateEvent>>,
}

/// Registry of per-space databases. Clones share one graph.
#[derive(Clone)]
pub struct Hypergraph {
    inner: Arc<GraphInner>,
}

impl Hypergraph {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                config,
                databases: RwLock::new(Vec::new()),
                selections: Arc::new(SelectionTable::new()),
                updates: Arc::new(ListenerSet::new()),
            }),
        }
    }

    /// Add a space. At most one database per space key.
    pub fn register_database(&self, db: EchoDatabase) -> DbResult<()> {
        let space_key = db.space_key();
        let mut databases = self.inner.databases.write().expect("graph lock poisoned");
        if databases.iter().any(|e| e.space_key == space_key) {
            warn!(space = %space_key.short_id(), "space already registered");
            return Err(DbError::DuplicateSpace(space_key));
        }

        let graph: Weak<GraphInner> = Arc::downgrade(&self.inner);
        let resolver: Weak<dyn SpaceResolver> = graph.clone();
        db.inner().set_resolver(Some(resolver));

        let forward = db.on_update(move |event| {
            if let Some(graph) = graph.upgrade() {
                graph.handle_update(event);
            }
        });

        databases.push(GraphEntry {
            space_key,
            db,
            _forward: forward,
        });
        info!(space = %space_key.short_id(), spaces = databases.len(), "database registered");
        Ok(())
    }

    /// Remove a space, returning its database.
    pub fn unregister_database(&self, space_key: &SpaceKey) -> Option<EchoDatabase> {
        let entry = {
            let mut databases = self.inner.databases.write().expect("graph lock poisoned");
            let index = databases.iter().position(|e| &e.space_key == space_key)?;
            databases.remove(index)
        };
        entry.db.inner().set_resolver(None);
        info!(space = %space_key.short_id(), "database unregistered");
        Some(entry.db)
    }

    pub fn database(&self, space_key: &SpaceKey) -> Option<EchoDatabase> {
        self.inner.database(space_key)
    }

    /// Registered spaces, in registration order.
    pub fn spaces(&self) -> Vec<SpaceKey> {
        self.inner
            .databases
            .read()
            .expect("graph lock poisoned")
            .iter()
            .map(|e| e.space_key)
            .collect()
    }

    /// Query across every registered space. `options.spaces` narrows the
    /// spaces searched.
    pub fn query(
        &self,
        source: impl Into<FilterSource>,
        options: Option<QueryOptions>,
    ) -> DbResult<GraphQuery> {
        let filter = source
            .into()
            .into_filter(options, self.inner.config.inherit_filter_options)?;
        if filter.uses_text() {
            return Err(DbError::TextSearchUnsupported);
        }
        Ok(GraphQuery {
            graph: self.inner.clone(),
            filter,
        })
    }

    /// New selection subscription over every registered space.
    pub fn create_subscription(
        &self,
        callback: impl Fn(&SelectionEvent) + Send + Sync + 'static,
    ) -> SelectionSubscription {
        let callback: SelectionCallback = Arc::new(callback);
        self.inner.selections.create(callback)
    }
}

impl Default for Hypergraph {
    fn default() -> Self {
        Self::new(EchoConfig::default())
    }
}

impl fmt::Debug for Hypergraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypergraph")
            .field("spaces", &self.spaces())
            .finish()
    }
}

impl GraphInner {
    fn database(&self, space_key: &SpaceKey) -> Option<EchoDatabase> {
        self.databases
            .read()
            .expect("graph lock poisoned")
            .iter()
            .find(|e| &e.space_key == space_key)
            .map(|e| e.db.clone())
    }

    fn databases(&self) -> Vec<EchoDatabase> {
        self.databases
            .read()
            .expect("graph lock poisoned")
            .iter()
            .map(|e| e.db.clone())
            .collect()
    }

    fn handle_update(&self, event: &UpdateEvent) {
        self.selections
            .dispatch(event, &|id| self.resolve(&event.space_key, id));
        self.updates.emit(event);
    }

    fn evaluate(&self, filter: &Filter) -> Vec<EchoObject> {
        let mut results = Vec::new();
        for db in self.databases() {
            match db.inner().run_filter(filter) {
                Ok(objects) => results.extend(objects),
                Err(e) => {
                    warn!(space = %db.space_key().short_id(), error = %e, "graph query failed");
                }
            }
        }
        results
    }
}

impl SpaceResolver for GraphInner {
    fn resolve(&self, space: &SpaceKey, id: &ObjectId) -> Option<EchoObject> {
        self.database(space)?.get_object_by_id(id)
    }
}

/// Live query over every registered space.
#[derive(Clone)]
pub struct GraphQuery {
    graph: Arc<GraphInner>,
    filter: Filter,
}

impl GraphQuery {
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Matches in registration order, then insertion order within a space.
    pub fn objects(&self) -> Vec<EchoObject> {
        self.graph.evaluate(&self.filter)
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

    /// Call `callback` with the current results whenever a change batch in
    /// any space touches an object that was, or now is, in the result set.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[EchoObject]) + Send + Sync + 'static,
    ) -> Subscription {
        let graph = Arc::downgrade(&self.graph);
        let filter = self.filter.clone();
        let tracker = ResultTracker::new(&self.objects());
        let id = self.graph.updates.add(Arc::new(move |event: &UpdateEvent| {
            let Some(graph) = graph.upgrade() else { return };
            let current = graph.evaluate(&filter);
            if tracker.update(&event.item_ids, &current) {
                callback(&current);
            }
        }));
        Subscription::from_set(&self.graph.updates, id)
    }
}

impl fmt::Debug for GraphQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphQuery")
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TypedObject;
    use crate::value::Property;
    use echo_model::InMemoryBackend;
    use echo_schema::{FieldDefinition, SchemaRegistry, SchemaType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TASK: &str = "example.graph.Task";

    struct Task(EchoObject);

    impl SchemaType for Task {
        const TYPENAME: &'static str = TASK;

        fn fields() -> Vec<FieldDefinition> {
            vec![
                FieldDefinition::string("title"),
                FieldDefinition::reference("assignee", "example.graph.Task"),
            ]
        }
    }

    impl TypedObject for Task {
        const TYPENAME: &'static str = TASK;

        fn from_object(object: EchoObject) -> Self {
            Self(object)
        }

        fn object(&self) -> &EchoObject {
            &self.0
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::new();
        registry
            .bootstrap(|r| r.register_type::<Task>().map(|_| ()))
            .unwrap();
        Arc::new(registry)
    }

    fn space(graph: &Hypergraph, registry: &Arc<SchemaRegistry>) -> EchoDatabase {
        let db = EchoDatabase::new(
            Arc::new(InMemoryBackend::new(SpaceKey::random())),
            EchoConfig::default(),
        );
        db.set_schema_registry(registry.clone());
        graph.register_database(db.clone()).unwrap();
        db
    }

    fn task(registry: &SchemaRegistry, db: &EchoDatabase, title: &str) -> Task {
        let task = Task::create(registry).unwrap();
        task.object().set("title", title).unwrap();
        db.add(task.object()).unwrap();
        task
    }

    #[test]
    fn duplicate_space_is_rejected() {
        let graph = Hypergraph::default();
        let db = EchoDatabase::new(
            Arc::new(InMemoryBackend::new(SpaceKey::random())),
            EchoConfig::default(),
        );
        graph.register_database(db.clone()).unwrap();
        assert!(matches!(
            graph.register_database(db.clone()),
            Err(DbError::DuplicateSpace(_))
        ));
        assert_eq!(graph.spaces(), vec![db.space_key()]);

        assert!(graph.unregister_database(&db.space_key()).is_some());
        assert!(graph.spaces().is_empty());
        assert!(graph.unregister_database(&db.space_key()).is_none());
    }

    #[test]
    fn cross_space_query_and_selection() {
        let registry = registry();
        let graph = Hypergraph::default();
        let first = space(&graph, &registry);
        let second = space(&graph, &registry);
        let a = task(&registry, &first, "a");
        let b = task(&registry, &second, "b");

        let query = graph.query(Filter::typename(TASK), None).unwrap();
        assert_eq!(query.objects(), vec![a.object().clone(), b.object().clone()]);

        let fired = Arc::new(AtomicUsize::new(0));
        let titles = Arc::new(Mutex::new(Vec::new()));
        let (count, sink) = (fired.clone(), titles.clone());
        let selection = graph.create_subscription(move |event| {
            count.fetch_add(1, Ordering::SeqCst);
            for object in &event.updated {
                sink.lock().unwrap().push(object.get("title"));
            }
        });
        selection.update([a.id(), b.id()]);

        a.object().set("title", "a2").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        b.object().set("title", "b2").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(
            *titles.lock().unwrap(),
            vec![Property::from("a2"), Property::from("b2")]
        );

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sizes_sink = sizes.clone();
        let _live = query.subscribe(move |results| sizes_sink.lock().unwrap().push(results.len()));

        first.remove(a.object()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(*sizes.lock().unwrap(), vec![1]);
        assert_eq!(query.objects(), vec![b.object().clone()]);
    }

    #[test]
    fn space_scoped_query() {
        let registry = registry();
        let graph = Hypergraph::default();
        let first = space(&graph, &registry);
        let second = space(&graph, &registry);
        task(&registry, &first, "a");
        let b = task(&registry, &second, "b");

        let options = QueryOptions {
            spaces: Some(vec![second.space_key()]),
            ..QueryOptions::default()
        };
        let query = graph.query(FilterSource::All, Some(options)).unwrap();
        assert_eq!(query.objects(), vec![b.object().clone()]);
    }

    #[test]
    fn references_resolve_across_spaces() {
        let registry = registry();
        let graph = Hypergraph::default();
        let first = space(&graph, &registry);
        let second = space(&graph, &registry);
        let a = task(&registry, &first, "a");
        let b = task(&registry, &second, "b");

        a.object().set("assignee", b.object()).unwrap();
        assert_eq!(a.object().get("assignee").as_object(), Some(b.object()));

        graph.unregister_database(&second.space_key());
        assert!(a.object().get("assignee").is_undefined());
    }

    #[test]
    fn materialized_items_take_their_schema() {
        let registry = registry();
        let graph = Hypergraph::default();
        let first = space(&graph, &registry);
        let a = task(&registry, &first, "a");

        let view = EchoDatabase::new(first.backend().clone(), EchoConfig::default());
        view.set_schema_registry(registry.clone());
        let materialized = view.get_object_by_id(&a.id()).unwrap();
        assert_ne!(&materialized, a.object());
        assert_eq!(materialized.typename().as_deref(), Some(TASK));
        assert!(Task::cast(materialized).is_some());
    }
}
