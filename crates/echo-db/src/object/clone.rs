use echo_model::{codec_for, DocumentState};
use echo_types::ObjectId;
use tracing::debug;

use crate::error::DbResult;
use crate::object::EchoObject;

#[derive(Clone, Debug)]
pub struct CloneOptions {
    /// Keep the source id on the root clone. Defaults to `true`.
    pub retain_id: bool,
    /// Further objects to clone alongside the root. A clone's pending
    /// links are exactly the other clones; references to anything else
    /// stay unresolved until the clone is bound.
    pub additional: Vec<EchoObject>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            retain_id: true,
            additional: Vec::new(),
        }
    }
}

/// Structural copy of `object` as a new detached instance.
///
/// The source is untouched and keeps its database binding, so the clone
/// may be added to another database but the source may not.
pub fn clone_object(object: &EchoObject, options: CloneOptions) -> DbResult<EchoObject> {
    let root_id = if options.retain_id {
        object.id()
    } else {
        ObjectId::random()
    };

    let root = detached_copy(object, root_id)?;
    let mut clones = vec![root.clone()];
    for extra in &options.additional {
        clones.push(detached_copy(extra, extra.id())?);
    }

    for clone in &clones {
        for other in &clones {
            if other != clone {
                clone.cache_link(other.clone());
            }
        }
    }

    debug!(
        source = %object.id().short_id(),
        clone = %root_id.short_id(),
        additional = options.additional.len(),
        "object cloned"
    );
    Ok(root)
}

fn detached_copy(source: &EchoObject, id: ObjectId) -> DbResult<EchoObject> {
    let snapshot = source.snapshot()?;
    let doc = match codec_for(source.model()) {
        Some(codec) => codec.decode(snapshot)?,
        None => DocumentState::from_snapshot(snapshot),
    };
    Ok(EchoObject::detached(
        id,
        source.model().to_string(),
        source.schema().cloned(),
        doc,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::value::Property;
    use crate::config::EchoConfig;
    use crate::database::EchoDatabase;
    use echo_model::{InMemoryBackend, MODEL_TEXT};
    use echo_types::SpaceKey;
    use std::sync::Arc;

    fn database() -> EchoDatabase {
        EchoDatabase::new(
            Arc::new(InMemoryBackend::new(SpaceKey::random())),
            EchoConfig::default(),
        )
    }

    #[test]
    fn clone_keeps_id_and_state() {
        let source = EchoObject::expando([("title", "draft")]).unwrap();
        let copy = clone_object(&source, CloneOptions::default()).unwrap();

        assert_eq!(copy.id(), source.id());
        assert_ne!(copy, source);
        assert_eq!(copy.get("title"), Property::from("draft"));

        copy.set("title", "edited").unwrap();
        assert_eq!(source.get("title"), Property::from("draft"));
    }

    #[test]
    fn fresh_id_when_not_retained() {
        let source = EchoObject::new();
        let copy = clone_object(
            &source,
            CloneOptions {
                retain_id: false,
                ..CloneOptions::default()
            },
        )
        .unwrap();
        assert_ne!(copy.id(), source.id());
    }

    #[test]
    fn detached_without_codec_fails() {
        let source = EchoObject::with_model(MODEL_TEXT);
        assert!(matches!(
            clone_object(&source, CloneOptions::default()),
            Err(DbError::MissingSnapshotCodec(_))
        ));
    }

    #[test]
    fn additional_clones_link_to_each_other() {
        let task = EchoObject::new();
        let owner = EchoObject::new();
        task.set("assignee", &owner).unwrap();

        let task_copy = clone_object(
            &task,
            CloneOptions {
                additional: vec![owner.clone()],
                ..CloneOptions::default()
            },
        )
        .unwrap();

        let assignee = task_copy.get("assignee");
        let assignee = assignee.as_object().unwrap();
        assert_eq!(assignee.id(), owner.id());
        assert_ne!(assignee, &owner);
    }

    #[test]
    fn adding_clone_leaves_source_links_detached() {
        let target = EchoObject::expando([("name", "t")]).unwrap();
        let source = EchoObject::new();
        source.set("ref", &target).unwrap();

        let copy = clone_object(&source, CloneOptions::default()).unwrap();
        let other = database();
        other.add(&copy).unwrap();
        assert!(!target.is_bound());
        assert!(other.get_object_by_id(&target.id()).is_none());

        let home = database();
        home.add(&source).unwrap();
        assert_eq!(target.space_key(), Some(home.space_key()));
        assert_eq!(source.get("ref").as_object(), Some(&target));
    }

    #[test]
    fn clone_links_only_to_other_clones() {
        let target = EchoObject::new();
        let source = EchoObject::new();
        source.set("ref", &target).unwrap();

        let alone = clone_object(&source, CloneOptions::default()).unwrap();
        assert!(alone.cached_links().is_empty());
        assert!(alone.get("ref").is_undefined());

        let paired = clone_object(
            &source,
            CloneOptions {
                additional: vec![target.clone()],
                ..CloneOptions::default()
            },
        )
        .unwrap();
        let links = paired.cached_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id(), target.id());
        assert_ne!(links[0], target);
    }
}
