//! Integration tests for sessions: amendments, plan caching, isolation.

use serde_json::json;
use skein::config::CompilerSettings;
use skein::executor::{ExecutionError, MemoryAdapter};
use skein::model::{Amendment, Cardinality, ModelDocument, OnExpr, Path};
use skein::planner::{CompileError, QueryRequest};
use skein::session::Session;
use std::sync::Arc;

const CYCLES: &str = include_str!("../fixtures/cycles.toml");

fn open() -> (Session, MemoryAdapter) {
    let doc = ModelDocument::from_toml_str(CYCLES).unwrap();
    let adapter = MemoryAdapter::from_tables(&doc.tables).unwrap();
    (Session::from_document(&doc).unwrap(), adapter)
}

fn request(source: &str, group_by: &[&str]) -> QueryRequest {
    QueryRequest::parse(source, group_by, &[]).unwrap()
}

fn path(s: &str) -> Path {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_run_all_isolates_failures() {
    let (mut session, adapter) = open();
    let requests = vec![
        request("beta", &["b_name", "alpha.a_name"]),
        request("beta", &["alpha.nonexistent"]),
        request("alpha", &["gamma.total_rows"]),
    ];

    let outcomes = session.run_all(&adapter, &requests).await;
    assert_eq!(outcomes.len(), 3);

    assert!(outcomes[0].is_ok());
    assert!(matches!(
        &outcomes[1].result,
        Err(ExecutionError::Compile(CompileError::Resolution { path, .. }))
            if path == "alpha.nonexistent"
    ));
    assert_eq!(outcomes[1].request, requests[1]);

    let last = outcomes[2].result.as_ref().unwrap();
    assert_eq!(last.rows, vec![vec![json!(1)]]);
}

#[test]
fn test_amendment_invalidates_cached_plans() {
    let (mut session, _) = open();
    let before = session.compile(&request("beta", &["alpha.a_name"])).unwrap();
    assert_eq!(session.cached_plans(), 1);

    let err = session.compile(&request("gamma", &["alpha.a_name"])).unwrap_err();
    assert!(err.resolution().is_some());

    session
        .amend(vec![Amendment::add_join(
            "gamma",
            "alpha",
            "alpha",
            Cardinality::One,
            OnExpr::eq(path("id"), path("alpha.id")),
        )])
        .unwrap();
    assert_eq!(session.cached_plans(), 0);

    let after = session.compile(&request("beta", &["alpha.a_name"])).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);

    let plan = session.compile(&request("gamma", &["alpha.a_name"])).unwrap();
    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.base, skein::planner::BaseRelation::SubPlan(0));
}

#[test]
fn test_failed_amendment_keeps_cache() {
    let (mut session, _) = open();
    session.compile(&request("alpha", &["a_name"])).unwrap();
    let revision = session.store().revision();

    let err = session.amend(vec![Amendment::add_join(
        "alpha",
        "beta",
        "beta",
        Cardinality::Many,
        OnExpr::eq(path("id"), path("beta.alpha_id")),
    )]);
    assert!(err.is_err());
    assert_eq!(session.store().revision(), revision);
    assert_eq!(session.cached_plans(), 1);
}

#[tokio::test]
async fn test_amended_join_is_usable_in_queries() {
    let (mut session, adapter) = open();
    session
        .amend(vec![Amendment::add_join(
            "beta",
            "gamma",
            "gamma",
            Cardinality::One,
            OnExpr::eq(path("alpha_id"), path("gamma.id")),
        )])
        .unwrap();

    let result = session
        .run(&adapter, &request("beta", &["b_name", "gamma.total_rows"]))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!("beta"), json!(1)]]);
}

#[test]
fn test_cache_can_be_disabled() {
    let doc = ModelDocument::from_toml_str(CYCLES).unwrap();
    let mut session =
        Session::with_settings(doc.build().unwrap(), CompilerSettings { plan_cache: false });

    let first = session.compile(&request("alpha", &["a_name"])).unwrap();
    let second = session.compile(&request("alpha", &["a_name"])).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(session.cached_plans(), 0);
}
