use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use echo_model::{Cell, DocumentSnapshot, DocumentState, LinkedList, MODEL_DOCUMENT};
use echo_schema::{CollectionKind, FieldKind, SchemaDescriptor, SchemaRegistry};
use echo_types::{ObjectId, Reference, Scalar};

use crate::error::DbResult;
use crate::object::{clone_object, CloneOptions, EchoObject};
use crate::value::Property;

impl EchoObject {
    /// New detached object of a linked schema type.
    ///
    /// Array fields start as empty collections of their declared kind,
    /// text fields as empty strings, and fields with a default hold it.
    pub fn typed(schema: Arc<SchemaDescriptor>) -> Self {
        let mut data = BTreeMap::new();
        for field in &schema.fields {
            let initial = match (field.kind, field.collection) {
                (FieldKind::Array, CollectionKind::Indexed) => Some(Cell::Array(Vec::new())),
                (FieldKind::Array, CollectionKind::Linked) => Some(Cell::List(LinkedList::new())),
                (FieldKind::Text, _) => Some(Cell::Scalar(
                    field.default.clone().unwrap_or_else(|| Scalar::from("")),
                )),
                _ => field.default.clone().map(Cell::Scalar),
            };
            if let Some(cell) = initial {
                data.insert(field.name.clone(), cell);
            }
        }
        let doc = DocumentState::from_snapshot(DocumentSnapshot {
            data,
            type_ref: Some(Reference::from_legacy_typename(schema.typename.clone())),
            ..DocumentSnapshot::default()
        });
        Self::detached(ObjectId::random(), MODEL_DOCUMENT.to_string(), Some(schema), doc)
    }

    /// Typed object with initial properties merged over the defaults.
    pub fn typed_with<I, K, V>(schema: Arc<SchemaDescriptor>, properties: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        let object = Self::typed(schema);
        object.set_all(properties)?;
        Ok(object)
    }
}

/// Hand-written concrete type over a live object.
pub trait TypedObject: Sized {
    const TYPENAME: &'static str;

    fn from_object(object: EchoObject) -> Self;

    fn object(&self) -> &EchoObject;

    /// New detached instance using the linked descriptor for
    /// [`TYPENAME`](Self::TYPENAME).
    fn create(registry: &SchemaRegistry) -> DbResult<Self> {
        let schema = registry.get(Self::TYPENAME)?;
        Ok(Self::from_object(EchoObject::typed(schema)))
    }

    /// Wrap `object` if its typename matches.
    fn cast(object: EchoObject) -> Option<Self> {
        (object.typename().as_deref() == Some(Self::TYPENAME)).then(|| Self::from_object(object))
    }

    fn id(&self) -> ObjectId {
        self.object().id()
    }
}

/// Copy a typed object into a new detached instance of the same type.
pub fn clone_typed<T: TypedObject>(value: &T, options: CloneOptions) -> DbResult<T> {
    clone_object(value.object(), options).map(T::from_object)
}

/// Untyped object: attributes are whatever was assigned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expando(EchoObject);

impl Expando {
    pub fn new() -> Self {
        Self(EchoObject::new())
    }

    pub fn with_properties<I, K, V>(properties: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Property>,
    {
        EchoObject::expando(properties).map(Self)
    }

    pub fn into_object(self) -> EchoObject {
        self.0
    }
}

impl Deref for Expando {
    type Target = EchoObject;

    fn deref(&self) -> &EchoObject {
        &self.0
    }
}

impl From<Expando> for Property {
    fn from(value: Expando) -> Self {
        Property::Object(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::OrderedCollection;
    use echo_schema::{FieldDefinition, SchemaType};

    struct Task(EchoObject);

    impl SchemaType for Task {
        const TYPENAME: &'static str = "example.test.Task";

        fn fields() -> Vec<echo_schema::FieldDefinition> {
            vec![
                FieldDefinition::string("title"),
                FieldDefinition::text("description"),
                FieldDefinition::number("priority").with_default(1),
                FieldDefinition::array_of("subtasks", "example.test.Task"),
                FieldDefinition::array("log").linked(),
            ]
        }
    }

    impl TypedObject for Task {
        const TYPENAME: &'static str = <Task as SchemaType>::TYPENAME;

        fn from_object(object: EchoObject) -> Self {
            Self(object)
        }

        fn object(&self) -> &EchoObject {
            &self.0
        }
    }

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .bootstrap(|r| r.register_type::<Task>().map(|_| ()))
            .unwrap();
        registry
    }

    #[test]
    fn typed_construction_prepopulates_fields() {
        let task = Task::create(&registry()).unwrap();
        let object = task.object();

        assert_eq!(object.get("description"), Property::from(""));
        assert_eq!(object.get("priority").as_f64(), Some(1.0));
        assert!(object.get("title").is_undefined());
        assert!(object.get("subtasks").as_array().unwrap().is_empty());
        assert!(object.get("log").as_ordered_set().is_some());
        assert_eq!(object.typename().as_deref(), Some("example.test.Task"));
        assert!(object.type_ref().unwrap().is_protobuf());
    }

    #[test]
    fn schema_array_field_reads_back_in_order() {
        let registry = registry();
        let schema = registry.get("example.test.Task").unwrap();
        let parent = EchoObject::typed(schema.clone());
        let children: Vec<EchoObject> = (0..3).map(|_| EchoObject::typed(schema.clone())).collect();

        parent
            .set("subtasks", Property::list(children.iter()))
            .unwrap();

        let subtasks = parent.get("subtasks");
        let subtasks = subtasks.as_array().unwrap();
        assert_eq!(subtasks.len(), 3);
        for (i, child) in children.iter().enumerate() {
            assert_eq!(subtasks.get(i).as_object(), Some(child));
        }
    }

    #[test]
    fn list_on_linked_field_becomes_ordered_set() {
        let schema = registry().get("example.test.Task").unwrap();
        let task = EchoObject::typed_with(schema, [("log", Property::list(["a", "b"]))]).unwrap();
        let log = task.get("log");
        assert_eq!(
            log.as_ordered_set().unwrap().to_vec(),
            vec![Property::from("a"), Property::from("b")]
        );
    }

    #[test]
    fn array_handle_on_linked_field_keeps_elements() {
        let schema = registry().get("example.test.Task").unwrap();
        let task = EchoObject::typed(schema);
        let entries =
            crate::collection::EchoArray::from(vec![Property::from("a"), Property::from("b")]);

        task.set("log", Property::Array(entries)).unwrap();

        let log = task.get("log");
        let log = log.as_ordered_set().unwrap();
        assert_eq!(log.to_vec(), vec![Property::from("a"), Property::from("b")]);
    }

    #[test]
    fn bound_ordered_set_on_indexed_field_keeps_elements() {
        let schema = registry().get("example.test.Task").unwrap();
        let source = EchoObject::typed(schema.clone());
        let log = source.get("log");
        log.as_ordered_set()
            .unwrap()
            .push(vec![Property::from("x"), Property::from("y")])
            .unwrap();

        let task = EchoObject::typed(schema);
        task.set("subtasks", log.clone()).unwrap();

        let subtasks = task.get("subtasks");
        assert_eq!(
            subtasks.as_array().unwrap().to_vec(),
            vec![Property::from("x"), Property::from("y")]
        );
        assert_eq!(source.get("log").as_ordered_set().unwrap().len(), 2);
    }

    #[test]
    fn cast_checks_typename() {
        let task = Task::create(&registry()).unwrap();
        assert!(Task::cast(task.object().clone()).is_some());
        assert!(Task::cast(EchoObject::new()).is_none());
    }

    #[test]
    fn expando_derefs_to_object() {
        let expando = Expando::with_properties([("name", "x")]).unwrap();
        assert_eq!(expando.get("name"), Property::from("x"));
    }
}
