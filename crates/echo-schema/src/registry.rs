use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use echo_types::Scalar;
use tracing::{debug, info};

use crate::descriptor::{CollectionKind, FieldDefinition, FieldKind, SchemaType, TypeDefinition};
use crate::error::{SchemaError, SchemaResult};

/// Index of a registered type within its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(usize);

impl TypeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A field after linking: the referenced typename is resolved to a handle.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Scalar>,
    pub collection: CollectionKind,
    pub reference: Option<TypeHandle>,
    pub reference_typename: Option<String>,
}

/// Fully resolved, immutable type descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDescriptor {
    pub typename: String,
    pub version: String,
    pub fields: Vec<LinkedField>,
    handle: TypeHandle,
}

impl SchemaDescriptor {
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    pub fn field(&self, name: &str) -> Option<&LinkedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Result of a `link()` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The registry was linked by this call.
    Linked { types: usize },
    /// Linking is deferred to the outermost bootstrap call.
    Deferred,
}

/// Registry entry: the definition plus the descriptor frozen onto it at
/// link time.
#[derive(Debug)]
struct TypeEntry {
    definition: TypeDefinition,
    descriptor: OnceLock<Arc<SchemaDescriptor>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: Vec<Arc<TypeEntry>>,
    index: HashMap<String, usize>,
    linked: bool,
}

/// Two-phase type registry.
///
/// Registration is order independent. [`SchemaRegistry::link`] resolves
/// every cross reference and may run only once; use
/// [`SchemaRegistry::bootstrap`] to register and link in one explicit step.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    state: RwLock<RegistryState>,
    defer_depth: AtomicUsize,
}

/// Suppresses linking while held. See [`SchemaRegistry::defer_link`].
#[derive(Debug)]
pub struct DeferGuard<'a> {
    registry: &'a SchemaRegistry,
}

impl Drop for DeferGuard<'_> {
    fn drop(&mut self) {
        self.registry.defer_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition.
    pub fn register(&self, definition: TypeDefinition) -> SchemaResult<TypeHandle> {
        let mut state = self.state.write().expect("schema registry lock poisoned");
        if state.linked {
            return Err(SchemaError::Frozen(definition.typename));
        }
        if state.index.contains_key(&definition.typename) {
            return Err(SchemaError::DuplicateTypename(definition.typename));
        }

        let index = state.entries.len();
        debug!(typename = %definition.typename, index, "type registered");
        state.index.insert(definition.typename.clone(), index);
        state.entries.push(Arc::new(TypeEntry {
            definition,
            descriptor: OnceLock::new(),
        }));
        Ok(TypeHandle(index))
    }

    /// Register a concrete type.
    pub fn register_type<T: SchemaType>(&self) -> SchemaResult<TypeHandle> {
        self.register(T::definition())
    }

    /// Hold off linking until the returned guard is dropped.
    ///
    /// While any guard is alive, `link()` returns [`LinkOutcome::Deferred`]
    /// without touching the registry.
    pub fn defer_link(&self) -> DeferGuard<'_> {
        self.defer_depth.fetch_add(1, Ordering::SeqCst);
        DeferGuard { registry: self }
    }

    pub fn is_deferred(&self) -> bool {
        self.defer_depth.load(Ordering::SeqCst) > 0
    }

    /// Run `register`, then link. Nested calls only register; the
    /// outermost call performs the link.
    pub fn bootstrap<F>(&self, register: F) -> SchemaResult<LinkOutcome>
    where
        F: FnOnce(&Self) -> SchemaResult<()>,
    {
        let outermost = {
            let _guard = self.defer_link();
            register(self)?;
            self.defer_depth.load(Ordering::SeqCst) == 1
        };

        if outermost {
            self.link()
        } else {
            Ok(LinkOutcome::Deferred)
        }
    }

    /// Resolve every field's referenced typename and freeze the resulting
    /// descriptors. Fails if the registry was already linked.
    pub fn link(&self) -> SchemaResult<LinkOutcome> {
        if self.is_deferred() {
            debug!("schema link deferred to outermost bootstrap");
            return Ok(LinkOutcome::Deferred);
        }

        let mut state = self.state.write().expect("schema registry lock poisoned");
        if state.linked {
            return Err(SchemaError::AlreadyLinked);
        }

        // Resolve everything before freezing anything.
        let mut descriptors = Vec::with_capacity(state.entries.len());
        for (index, entry) in state.entries.iter().enumerate() {
            let def = &entry.definition;
            let fields = def
                .fields
                .iter()
                .map(|field| link_field(def, field, &state.index))
                .collect::<SchemaResult<Vec<_>>>()?;
            descriptors.push(SchemaDescriptor {
                typename: def.typename.clone(),
                version: def.version.clone(),
                fields,
                handle: TypeHandle(index),
            });
        }

        for (entry, descriptor) in state.entries.iter().zip(descriptors) {
            entry
                .descriptor
                .set(Arc::new(descriptor))
                .map_err(|_| SchemaError::AlreadyLinked)?;
        }
        state.linked = true;

        let types = state.entries.len();
        info!(types, "schema registry linked");
        Ok(LinkOutcome::Linked { types })
    }

    pub fn is_linked(&self) -> bool {
        self.state
            .read()
            .expect("schema registry lock poisoned")
            .linked
    }

    /// Linked descriptor for `typename`.
    pub fn get(&self, typename: &str) -> SchemaResult<Arc<SchemaDescriptor>> {
        let state = self.state.read().expect("schema registry lock poisoned");
        let index = *state
            .index
            .get(typename)
            .ok_or_else(|| SchemaError::UnknownType(typename.to_string()))?;
        state.entries[index]
            .descriptor
            .get()
            .cloned()
            .ok_or(SchemaError::NotLinked)
    }

    /// Linked descriptor for a handle produced by this registry.
    pub fn resolve(&self, handle: TypeHandle) -> SchemaResult<Arc<SchemaDescriptor>> {
        let state = self.state.read().expect("schema registry lock poisoned");
        let entry = state
            .entries
            .get(handle.0)
            .ok_or_else(|| SchemaError::UnknownType(format!("#{}", handle.0)))?;
        entry.descriptor.get().cloned().ok_or(SchemaError::NotLinked)
    }

    /// The definition as registered, linked or not.
    pub fn definition(&self, typename: &str) -> Option<TypeDefinition> {
        let state = self.state.read().expect("schema registry lock poisoned");
        state
            .index
            .get(typename)
            .map(|&i| state.entries[i].definition.clone())
    }

    pub fn contains(&self, typename: &str) -> bool {
        self.state
            .read()
            .expect("schema registry lock poisoned")
            .index
            .contains_key(typename)
    }

    /// Registered typenames in registration order.
    pub fn typenames(&self) -> Vec<String> {
        self.state
            .read()
            .expect("schema registry lock poisoned")
            .entries
            .iter()
            .map(|e| e.definition.typename.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("schema registry lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add every definition from `other`. Nothing is added if any typename
    /// is already present.
    pub fn merge(&self, other: &SchemaRegistry) -> SchemaResult<()> {
        if std::ptr::eq(self, other) {
            return match self.typenames().into_iter().next() {
                Some(typename) => Err(SchemaError::DuplicateTypename(typename)),
                None => Ok(()),
            };
        }

        let incoming: Vec<TypeDefinition> = {
            let other_state = other.state.read().expect("schema registry lock poisoned");
            other_state
                .entries
                .iter()
                .map(|e| e.definition.clone())
                .collect()
        };

        let mut state = self.state.write().expect("schema registry lock poisoned");
        if let Some(def) = incoming.iter().find(|d| state.index.contains_key(&d.typename)) {
            return Err(SchemaError::DuplicateTypename(def.typename.clone()));
        }
        if state.linked {
            if let Some(def) = incoming.first() {
                return Err(SchemaError::Frozen(def.typename.clone()));
            }
        }

        let count = incoming.len();
        for definition in incoming {
            let index = state.entries.len();
            state.index.insert(definition.typename.clone(), index);
            state.entries.push(Arc::new(TypeEntry {
                definition,
                descriptor: OnceLock::new(),
            }));
        }
        debug!(count, "schema registries merged");
        Ok(())
    }
}

fn link_field(
    owner: &TypeDefinition,
    field: &FieldDefinition,
    index: &HashMap<String, usize>,
) -> SchemaResult<LinkedField> {
    let reference = match &field.reference {
        Some(target) => Some(TypeHandle(*index.get(target).ok_or_else(|| {
            SchemaError::UnresolvedReference {
                typename: owner.typename.clone(),
                field: field.name.clone(),
                target: target.clone(),
            }
        })?)),
        None => None,
    };

    Ok(LinkedField {
        name: field.name.clone(),
        kind: field.kind,
        required: field.required,
        default: field.default.clone(),
        collection: field.collection,
        reference,
        reference_typename: field.reference.clone(),
    })
}
