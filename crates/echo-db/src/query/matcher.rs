use echo_types::{Reference, SpaceKey};

use crate::config::EchoConfig;
use crate::error::{DbError, DbResult};
use crate::object::EchoObject;
use crate::query::Filter;

/// Configuration the matcher needs beyond the filter itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchContext {
    pub default_model: String,
    pub legacy_type_host: String,
}

impl MatchContext {
    pub fn from_config(config: &EchoConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            legacy_type_host: config.legacy_type_host.clone(),
        }
    }
}

impl Default for MatchContext {
    fn default() -> Self {
        Self::from_config(&EchoConfig::default())
    }
}

/// Evaluate `filter` against `object`.
///
/// The deletion and model gates run first and are not subject to `not`.
/// Then a non-empty `or` decides the node alone; otherwise ids, type,
/// properties, meta keys, text and predicate are checked in that order,
/// followed by every `and` branch. `not` inverts the result last.
pub fn matches(filter: &Filter, object: &EchoObject, ctx: &MatchContext) -> DbResult<bool> {
    if !filter.options.deleted.admits(object.is_deleted()) {
        return Ok(false);
    }
    if !filter.options.models.admits(object.model(), &ctx.default_model) {
        return Ok(false);
    }
    let result = matches_node(filter, object, ctx)?;
    Ok(result != filter.not)
}

fn matches_node(filter: &Filter, object: &EchoObject, ctx: &MatchContext) -> DbResult<bool> {
    if !filter.or.is_empty() {
        for branch in &filter.or {
            if matches(branch, object, ctx)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if let Some(ids) = &filter.object_ids {
        if !ids.contains(&object.id()) {
            return Ok(false);
        }
    }

    if let Some(expected) = &filter.type_ref {
        let matched = object
            .type_ref()
            .is_some_and(|actual| type_matches(expected, &actual, object.space_key(), ctx));
        if !matched {
            return Ok(false);
        }
    }

    for (key, expected) in &filter.properties {
        if !expected.matches(&object.get(key)) {
            return Ok(false);
        }
    }

    if !filter.meta_keys.is_empty() && !object.meta().has_any_key(&filter.meta_keys) {
        return Ok(false);
    }

    if filter.text.is_some() {
        return Err(DbError::TextSearchUnsupported);
    }

    if let Some(predicate) = &filter.predicate {
        if !predicate(object) {
            return Ok(false);
        }
    }

    for branch in &filter.and {
        if !matches(branch, object, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Type-reference equality with the legacy host shim.
///
/// Item id and protocol must be equal.
/// The actual reference's missing host defaults to the legacy constant for
/// `protobuf` references and to the enclosing space's key otherwise. The
/// types match if the expected host equals either the actual host or the
/// defaulted one.
pub fn type_matches(
    expected: &Reference,
    actual: &Reference,
    space: Option<SpaceKey>,
    ctx: &MatchContext,
) -> bool {
    if expected.item_id != actual.item_id || expected.protocol != actual.protocol {
        return false;
    }
    let defaulted = match &actual.host {
        Some(host) => Some(host.clone()),
        None if actual.is_protobuf() => Some(ctx.legacy_type_host.clone()),
        None => space.map(|s| s.to_hex()),
    };
    expected.host == actual.host || (expected.host.is_some() && expected.host == defaulted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Property;
    use echo_model::{Mutation, MutationBuilder, MODEL_TEXT};
    use echo_types::{ForeignKey, ObjectId, PROTOCOL_PROTOBUF};
    use proptest::prelude::*;

    fn ctx() -> MatchContext {
        MatchContext::default()
    }

    fn check(filter: &Filter, object: &EchoObject) -> bool {
        matches(filter, object, &ctx()).unwrap()
    }

    #[test]
    fn gates_apply_outside_not() {
        let text = EchoObject::with_model(MODEL_TEXT);
        assert!(!check(&Filter::all(), &text));
        assert!(!check(&Filter::nothing(), &text));

        let deleted = EchoObject::new();
        deleted.set_deleted(true).unwrap();
        assert!(!check(&Filter::all(), &deleted));
        assert!(!check(&Filter::not(Filter::all()), &deleted));
        assert!(check(
            &Filter::all().with_options(crate::query::QueryOptions::deleted_only()),
            &deleted
        ));
    }

    #[test]
    fn property_leaf_and_undefined() {
        let object = EchoObject::expando([("label", "red")]).unwrap();
        assert!(check(&Filter::properties([("label", "red")]), &object));
        assert!(!check(&Filter::properties([("label", "blue")]), &object));
        assert!(check(&Filter::properties([("missing", Property::Undefined)]), &object));
    }

    #[test]
    fn or_ignores_other_leaves() {
        let object = EchoObject::expando([("label", "red")]).unwrap();
        let mut filter = Filter::or([Filter::properties([("label", "red")])]);
        filter.properties.insert("label".into(), Property::from("blue"));
        assert!(check(&filter, &object));
    }

    #[test]
    fn text_is_rejected() {
        let object = EchoObject::new();
        assert!(matches!(
            matches(&Filter::text("hello"), &object, &ctx()),
            Err(DbError::TextSearchUnsupported)
        ));
    }

    #[test]
    fn ids_and_meta_keys() {
        let object = EchoObject::new();
        object.add_meta_key(ForeignKey::new("github.com", "7")).unwrap();

        assert!(check(&Filter::ids([object.id()]), &object));
        assert!(!check(&Filter::ids([ObjectId::random()]), &object));
        assert!(check(
            &Filter::foreign_keys([ForeignKey::new("github.com", "7")]),
            &object
        ));
        assert!(!check(
            &Filter::foreign_keys([ForeignKey::new("github.com", "8")]),
            &object
        ));
    }

    #[test]
    fn typename_filter_matches_type_ref() {
        let object = EchoObject::new();
        object
            .mutate(MutationBuilder::new().push(Mutation::SetType(Some(
                Reference::from_legacy_typename("example.Task"),
            ))))
            .unwrap();
        assert!(check(&Filter::typename("example.Task"), &object));
        assert!(!check(&Filter::typename("example.Note"), &object));
    }

    #[test]
    fn legacy_host_defaults() {
        let ctx = ctx();
        let space = SpaceKey::random();
        let protobuf_bare = Reference::new("a.B", Some(PROTOCOL_PROTOBUF.into()), None);
        let plain_bare = Reference::new("a.B", None, None);

        assert!(type_matches(
            &Reference::from_legacy_typename("a.B"),
            &protobuf_bare,
            Some(space),
            &ctx
        ));
        assert!(type_matches(
            &plain_bare.clone().with_host(space.to_hex()),
            &plain_bare,
            Some(space),
            &ctx
        ));
        assert!(!type_matches(
            &plain_bare.clone().with_host("elsewhere"),
            &plain_bare,
            Some(space),
            &ctx
        ));
        assert!(type_matches(&plain_bare, &plain_bare, None, &ctx));
        assert!(!type_matches(
            &plain_bare.clone().with_host(space.to_hex()),
            &protobuf_bare.clone().with_host(space.to_hex()),
            Some(space),
            &ctx
        ));
        assert!(!type_matches(
            &Reference::from_legacy_typename("a.C"),
            &protobuf_bare,
            None,
            &ctx
        ));
    }

    const LABELS: [&str; 3] = ["red", "green", "blue"];

    fn leaf() -> impl Strategy<Value = Filter> {
        prop_oneof![
            Just(Filter::all()),
            Just(Filter::nothing()),
            (0..LABELS.len()).prop_map(|i| Filter::properties([("label", LABELS[i])])),
            (0..6u32).prop_map(|n| Filter::predicate(move |o| {
                o.get("idx").as_f64().is_some_and(|v| v < f64::from(n))
            })),
        ]
    }

    fn filter_tree() -> impl Strategy<Value = Filter> {
        leaf().prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(Filter::not),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Filter::and),
                prop::collection::vec(inner, 1..4).prop_map(Filter::or),
            ]
        })
    }

    fn object() -> impl Strategy<Value = EchoObject> {
        (0..LABELS.len(), 0..6i64).prop_map(|(label, idx)| {
            EchoObject::expando([
                ("label", Property::from(LABELS[label])),
                ("idx", Property::from(idx)),
            ])
            .unwrap()
        })
    }

    proptest! {
        #[test]
        fn not_inverts(filter in filter_tree(), object in object()) {
            let plain = check(&filter, &object);
            prop_assert_eq!(check(&Filter::not(filter), &object), !plain);
        }

        #[test]
        fn and_is_all(filters in prop::collection::vec(filter_tree(), 0..4), object in object()) {
            let expected = filters.iter().all(|f| check(f, &object));
            prop_assert_eq!(check(&Filter::and(filters), &object), expected);
        }

        #[test]
        fn or_is_any(filters in prop::collection::vec(filter_tree(), 1..4), object in object()) {
            let expected = filters.iter().any(|f| check(f, &object));
            prop_assert_eq!(check(&Filter::or(filters), &object), expected);
        }
    }
}
