//! Integration tests for path resolution over a cyclic model.

use skein::model::{Cardinality, FieldDef, FieldKind, ModelDocument, ModelStore, OnExpr, Path};
use skein::semantic::{PathResolver, ResolutionError};

const CYCLES: &str = include_str!("../fixtures/cycles.toml");

fn store() -> ModelStore {
    ModelDocument::from_toml_str(CYCLES).unwrap().build().unwrap()
}

fn path(s: &str) -> Path {
    s.parse().unwrap()
}

/// Names of the joins walked, as `owner.field`.
fn chain(store: &ModelStore, joins: &[skein::model::FieldId]) -> Vec<String> {
    joins.iter().map(|id| store.qualified_name(*id)).collect()
}

#[test]
fn test_every_field_resolves_locally_from_its_source() {
    let store = store();
    let resolver = PathResolver::new(&store);

    for source in store.sources() {
        for field in store.fields_of(source.id) {
            let resolved = resolver
                .resolve(&source.name, &Path::new([field.name.as_str()]))
                .unwrap();
            assert_eq!(resolved.field, field.id);
            assert_eq!(resolved.source, source.id);
            assert!(resolved.is_local(), "{} should be local", field.name);
        }
    }
}

#[test]
fn test_one_hop_is_unaffected_by_back_edge() {
    let store = store();
    let resolved = PathResolver::new(&store)
        .resolve("beta", &path("alpha.a_name"))
        .unwrap();

    assert_eq!(resolved.terminal(&store).name, "a_name");
    assert_eq!(chain(&store, &resolved.joins), vec!["beta.alpha"]);
}

#[test]
fn test_round_trip_through_cycle() {
    let store = store();
    let resolved = PathResolver::new(&store)
        .resolve("alpha", &path("beta.alpha.beta.alpha.a_name"))
        .unwrap();

    assert_eq!(
        chain(&store, &resolved.joins),
        vec!["alpha.beta", "beta.alpha", "alpha.beta", "beta.alpha"]
    );
    assert_eq!(resolved.source, store.source_id("alpha").unwrap());
}

#[test]
fn test_self_referential_query_source() {
    let store = store();
    let resolver = PathResolver::new(&store);

    let direct = resolver.resolve("alpha", &path("gamma.total_rows")).unwrap();
    assert_eq!(chain(&store, &direct.joins), vec!["alpha.gamma"]);
    assert!(matches!(direct.terminal(&store).kind, FieldKind::Scalar));

    let via_beta = resolver
        .resolve("beta", &path("alpha.gamma.total_rows"))
        .unwrap();
    assert_eq!(
        chain(&store, &via_beta.joins),
        vec!["beta.alpha", "alpha.gamma"]
    );
    assert_eq!(via_beta.field, direct.field);
}

#[test]
fn test_leading_source_name_is_a_qualifier() {
    let store = store();
    let resolver = PathResolver::new(&store);

    let qualified = resolver.resolve("beta", &path("beta.b_name")).unwrap();
    let bare = resolver.resolve("beta", &path("b_name")).unwrap();
    assert_eq!(qualified.field, bare.field);
    assert!(qualified.is_local());
}

#[test]
fn test_unknown_segment_after_join() {
    let store = store();
    let err = PathResolver::new(&store)
        .resolve("beta", &path("alpha.nonexistent"))
        .unwrap_err();

    assert_eq!(
        err,
        ResolutionError::UnknownSegment {
            source_name: "alpha".into(),
            segment: "nonexistent".into(),
            position: 1,
        }
    );
}

#[test]
fn test_scalar_in_the_middle_is_not_a_join() {
    let store = store();
    let err = PathResolver::new(&store)
        .resolve("alpha", &path("a_name.length"))
        .unwrap_err();
    assert!(matches!(err, ResolutionError::NotAJoin { ref field, .. } if field == "a_name"));
}

#[test]
fn test_dangling_join_fails_only_when_walked() {
    let mut store = store();
    store
        .add_join_field(
            "beta",
            "delta",
            "delta",
            Cardinality::One,
            OnExpr::eq(path("id"), path("delta.id")),
        )
        .unwrap();
    let resolver = PathResolver::new(&store);

    assert!(resolver.resolve("beta", &path("alpha.a_name")).is_ok());
    assert!(resolver.resolve("beta", &path("delta")).is_ok());

    let err = resolver.resolve("beta", &path("delta.id")).unwrap_err();
    assert_eq!(
        err,
        ResolutionError::UnknownSource {
            name: "delta".into(),
            via: Some("beta.delta".into()),
        }
    );
    assert_eq!(
        err.to_string(),
        "Unknown source 'delta' (join target of 'beta.delta')"
    );
}

#[test]
fn test_amendment_makes_new_paths_resolvable() {
    let mut store = store();
    assert!(PathResolver::new(&store)
        .resolve("gamma", &path("alpha.a_name"))
        .is_err());

    store
        .add_join_field(
            "gamma",
            "alpha",
            "alpha",
            Cardinality::One,
            OnExpr::eq(path("id"), path("alpha.id")),
        )
        .unwrap();
    store
        .add_field("alpha", FieldDef::scalar("created_at"))
        .unwrap();

    let resolved = PathResolver::new(&store)
        .resolve("gamma", &path("alpha.gamma.alpha.created_at"))
        .unwrap();
    assert_eq!(resolved.joins.len(), 3);
}
