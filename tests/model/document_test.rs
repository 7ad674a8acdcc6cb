//! Integration tests for model documents.

use skein::model::{load_document, Cardinality, JoinGraph, LoadError, ModelDocument};
use std::path::Path;

const CYCLES: &str = include_str!("../fixtures/cycles.toml");

#[test]
fn test_fixture_loads_from_disk() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/cycles.toml");
    let doc = load_document(&path).unwrap();
    assert_eq!(doc, ModelDocument::from_toml_str(CYCLES).unwrap());
    assert_eq!(doc.tables.len(), 2);
}

#[test]
fn test_fixture_model_is_cyclic() {
    let store = ModelDocument::from_toml_str(CYCLES).unwrap().build().unwrap();
    let graph = JoinGraph::from_store(&store);

    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 3);
    assert!(graph.is_cyclic());
    assert!(graph.dangling().is_empty());

    let alpha = store.get_source("alpha").unwrap();
    let mut joins = graph.joins_from(alpha.id);
    joins.sort();
    assert_eq!(
        joins,
        vec![
            ("beta".to_string(), "beta".to_string()),
            ("gamma".to_string(), "gamma".to_string()),
        ]
    );
}

#[test]
fn test_query_source_fields_come_from_outputs() {
    let store = ModelDocument::from_toml_str(CYCLES).unwrap().build().unwrap();
    let gamma = store.get_source("gamma").unwrap();
    let names: Vec<_> = store.fields_of(gamma.id).map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "total_rows"]);
    assert_eq!(gamma.primary_key.as_deref(), Some("id"));

    let alpha = store.get_source("alpha").unwrap();
    let gamma_join = store.field_on(alpha.id, "gamma").unwrap().join().unwrap();
    assert_eq!(gamma_join.cardinality, Cardinality::One);
}

#[test]
fn test_json_and_toml_agree() {
    let doc = ModelDocument::from_toml_str(CYCLES).unwrap();
    let json = serde_json::to_string(&doc).unwrap();
    assert_eq!(ModelDocument::from_json_str(&json).unwrap(), doc);
}

#[test]
fn test_missing_file() {
    let err = load_document(Path::new("/nonexistent/model.toml")).unwrap_err();
    assert!(matches!(err, LoadError::FileNotFound { .. }));
}
