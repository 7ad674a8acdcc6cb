//! Integration tests for the query compiler over a cyclic model.

use skein::model::{
    AggregateOp, AggregateRequest, Cardinality, FieldDef, ModelDocument, ModelStore, OnExpr, Path,
    Query, QueryStage,
};
use skein::planner::{
    AggregateTarget, BaseRelation, ColumnRef, CompileError, QueryCompiler, QueryRequest,
    RelationRef,
};
use skein::semantic::ResolutionError;

const CYCLES: &str = include_str!("../fixtures/cycles.toml");

fn store() -> ModelStore {
    ModelDocument::from_toml_str(CYCLES).unwrap().build().unwrap()
}

fn path(s: &str) -> Path {
    s.parse().unwrap()
}

fn request(source: &str, group_by: &[&str], aggregates: &[&str]) -> QueryRequest {
    QueryRequest::parse(source, group_by, aggregates).unwrap()
}

#[test]
fn test_traverse_join_from_beta() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request("beta", &["b_name", "alpha.a_name"], &[]))
        .unwrap();

    assert_eq!(plan.base, BaseRelation::Table("beta".into()));
    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].alias, "alpha");
    assert_eq!(plan.joins[0].target, "alpha");
    assert_eq!(plan.joins[0].cardinality, Cardinality::One);
    assert_eq!(plan.joins[0].sub_plan, None);

    assert_eq!(plan.group_by.len(), 2);
    assert_eq!(plan.group_by[0].column, ColumnRef::new(RelationRef::Root, "b_name"));
    assert_eq!(plan.group_by[0].source, "beta");
    assert_eq!(plan.group_by[1].column, ColumnRef::new(RelationRef::Join(0), "a_name"));
    assert_eq!(plan.group_by[1].source, "alpha");
    assert_eq!(plan.output_columns(), vec!["b_name", "a_name"]);
}

#[test]
fn test_self_referential_query_source_compiles_to_sub_plan() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request("alpha", &["gamma.total_rows"], &[]))
        .unwrap();

    assert_eq!(plan.joins.len(), 1);
    let gamma = &plan.joins[0];
    assert_eq!(gamma.target, "gamma");
    assert_eq!(gamma.sub_plan, Some(0));
    assert_eq!(plan.group_by.len(), 1);
    assert_eq!(
        plan.group_by[0].column,
        ColumnRef::new(RelationRef::Join(0), "total_rows")
    );

    assert_eq!(plan.sub_plans.len(), 1);
    let sub = &plan.sub_plans[0];
    assert_eq!(sub.source, "gamma");
    assert_eq!(sub.plan.base, BaseRelation::Table("alpha".into()));
    assert!(sub.plan.joins.is_empty());
    assert_eq!(sub.plan.output_columns(), vec!["id", "total_rows"]);
    assert_eq!(sub.plan.aggregates[0].op, AggregateOp::Count);
    assert_eq!(
        sub.plan.aggregates[0].target,
        AggregateTarget::Rows(RelationRef::Root)
    );
    assert_eq!(plan.plan_count(), 2);
}

#[test]
fn test_shared_prefix_is_joined_once() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request(
            "beta",
            &["b_name", "alpha.a_name", "alpha.gamma.total_rows"],
            &[],
        ))
        .unwrap();

    let aliases: Vec<_> = plan.joins.iter().map(|j| j.alias.as_str()).collect();
    assert_eq!(aliases, vec!["alpha", "alpha.gamma"]);
    assert_eq!(plan.joins[1].parent, RelationRef::Join(0));
    let gamma = plan.join("alpha.gamma").unwrap();
    assert_eq!(gamma.target, "gamma");
    assert_eq!(gamma.sub_plan, Some(0));
    assert!(plan.join("gamma").is_none());
    assert_eq!(plan.group_by[1].column.relation, RelationRef::Join(0));
    assert_eq!(plan.group_by[2].column.relation, RelationRef::Join(1));
}

#[test]
fn test_fan_out_and_sub_plan_in_one_query() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request(
            "alpha",
            &["a_name", "beta.b_name", "gamma.total_rows"],
            &[],
        ))
        .unwrap();

    let aliases: Vec<_> = plan.joins.iter().map(|j| j.alias.as_str()).collect();
    assert_eq!(aliases, vec!["beta", "gamma"]);
    assert_eq!(plan.joins[0].cardinality, Cardinality::Many);
    assert_eq!(plan.joins[1].sub_plan, Some(0));
    assert_eq!(plan.sub_plans.len(), 1);
}

#[test]
fn test_repeated_query_source_shares_one_sub_plan() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request(
            "beta",
            &["alpha.gamma.total_rows", "alpha.beta.alpha.gamma.id"],
            &[],
        ))
        .unwrap();

    let gamma_joins: Vec<_> = plan.joins.iter().filter(|j| j.target == "gamma").collect();
    assert_eq!(gamma_joins.len(), 2);
    assert!(gamma_joins.iter().all(|j| j.sub_plan == Some(0)));
    assert_eq!(plan.sub_plans.len(), 1);
}

#[test]
fn test_unknown_path_names_the_request() {
    let store = store();
    let err = QueryCompiler::new(&store)
        .compile_request(&request("beta", &["b_name", "alpha.nonexistent"], &[]))
        .unwrap_err();

    assert_eq!(err.failing_path(), Some("alpha.nonexistent"));
    assert!(matches!(
        err.resolution(),
        Some(ResolutionError::UnknownSegment { segment, .. }) if segment == "nonexistent"
    ));
}

#[test]
fn test_unknown_start_source() {
    let store = store();
    let err = QueryCompiler::new(&store)
        .compile("omega", &[path("id")], &[])
        .unwrap_err();
    assert_eq!(err, CompileError::UnknownSource("omega".into()));
}

#[test]
fn test_group_by_join_uses_target_primary_key() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request("beta", &["alpha"], &["count()"]))
        .unwrap();

    assert_eq!(plan.group_by[0].name, "alpha");
    assert_eq!(plan.group_by[0].column, ColumnRef::new(RelationRef::Join(0), "id"));
}

#[test]
fn test_aggregate_over_join_counts_joined_rows() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request(
            "alpha",
            &["a_name"],
            &["n is count()", "betas is count(beta)", "sum(beta.id)"],
        ))
        .unwrap();

    assert_eq!(plan.output_columns(), vec!["a_name", "n", "betas", "id"]);
    assert_eq!(plan.aggregates[0].target, AggregateTarget::Rows(RelationRef::Root));
    assert_eq!(
        plan.aggregates[1].target,
        AggregateTarget::Rows(RelationRef::Join(0))
    );
    assert_eq!(
        plan.aggregates[2].target,
        AggregateTarget::Column(ColumnRef::new(RelationRef::Join(0), "id"))
    );
    assert_eq!(plan.joins.len(), 1);
}

#[test]
fn test_sum_of_join_is_invalid() {
    let store = store();
    let err = QueryCompiler::new(&store)
        .compile_request(&request("alpha", &[], &["sum(beta)"]))
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidAggregate { .. }));
}

#[test]
fn test_duplicate_output_column() {
    let store = store();
    let err = QueryCompiler::new(&store)
        .compile_request(&request("alpha", &["id", "gamma.id"], &[]))
        .unwrap_err();
    assert_eq!(err, CompileError::DuplicateOutput("id".into()));
}

#[test]
fn test_derivation_cycle_is_reported() {
    let mut store = store();
    store
        .define_query_source(
            "omega",
            Query::new(
                "alpha",
                QueryStage {
                    group_by: vec![path("omega.id")],
                    aggregates: vec![],
                },
            ),
            None,
        )
        .unwrap();
    store
        .add_join_field(
            "alpha",
            "omega",
            "omega",
            Cardinality::One,
            OnExpr::eq(path("id"), path("omega.id")),
        )
        .unwrap();

    let err = QueryCompiler::new(&store)
        .compile_request(&request("alpha", &["omega.id"], &[]))
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::CyclicDerivation {
            chain: vec!["omega".into(), "omega".into()],
        }
    );
}

#[test]
fn test_multi_stage_query_source_is_rejected() {
    let mut store = store();
    let stage = QueryStage {
        group_by: vec![path("id")],
        aggregates: vec![AggregateRequest::count()],
    };
    store
        .define_query_source(
            "staged",
            Query {
                source: "alpha".into(),
                stages: vec![stage.clone(), stage],
            },
            None,
        )
        .unwrap();

    let err = QueryCompiler::new(&store)
        .compile_request(&request("staged", &["id"], &[]))
        .unwrap_err();
    match err {
        CompileError::Derived {
            source_name,
            path,
            inner,
        } => {
            assert_eq!(source_name, "staged");
            assert_eq!(path, None);
            assert_eq!(
                *inner,
                CompileError::UnsupportedPipeline {
                    source_name: "staged".into(),
                    stages: 2,
                }
            );
        }
        other => panic!("expected a derived error, got {other:?}"),
    }
}

#[test]
fn test_count_of_dangling_join_is_unknown_source() {
    let mut store = ModelStore::new();
    store
        .define_source("a", vec![FieldDef::scalar("id")], None)
        .unwrap();
    store
        .add_join_field(
            "a",
            "ghost",
            "nowhere",
            Cardinality::Many,
            OnExpr::eq(path("id"), path("ghost.a_id")),
        )
        .unwrap();

    let err = QueryCompiler::new(&store)
        .compile_request(&request("a", &[], &["count(ghost)"]))
        .unwrap_err();
    assert_eq!(err.failing_path(), Some("ghost"));
    assert_eq!(
        err.resolution(),
        Some(&ResolutionError::UnknownSource {
            name: "nowhere".into(),
            via: Some("a.ghost".into()),
        })
    );
}

#[test]
fn test_sub_plan_failure_names_the_outer_path() {
    let mut store = ModelStore::new();
    store
        .define_source("a", vec![FieldDef::scalar("id")], None)
        .unwrap();
    store
        .define_query_source(
            "h",
            Query {
                source: "missing_src".into(),
                stages: vec![QueryStage {
                    group_by: vec![path("id")],
                    aggregates: vec![],
                }],
            },
            None,
        )
        .unwrap();
    store
        .add_join_field(
            "a",
            "h",
            "h",
            Cardinality::One,
            OnExpr::eq(path("id"), path("h.id")),
        )
        .unwrap();

    let err = QueryCompiler::new(&store)
        .compile_request(&request("a", &["h.id"], &[]))
        .unwrap_err();
    assert_eq!(err.failing_path(), Some("h.id"));
    match &err {
        CompileError::Derived {
            source_name,
            path,
            inner,
        } => {
            assert_eq!(source_name, "h");
            assert_eq!(path.as_deref(), Some("h.id"));
            assert_eq!(**inner, CompileError::UnknownSource("missing_src".into()));
        }
        other => panic!("expected a derived error, got {other:?}"),
    }
    assert!(err.to_string().contains("'h.id'"));

    let err = QueryCompiler::new(&store)
        .compile_request(&request("a", &[], &["count(h)"]))
        .unwrap_err();
    assert_eq!(err.failing_path(), Some("h"));
}

#[test]
fn test_query_source_as_start_reads_sub_plan() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request("gamma", &["total_rows"], &["count()"]))
        .unwrap();

    assert_eq!(plan.base, BaseRelation::SubPlan(0));
    assert_eq!(plan.sub_plans[0].source, "gamma");
}

#[test]
fn test_plan_serializes_to_json() {
    let store = store();
    let plan = QueryCompiler::new(&store)
        .compile_request(&request("alpha", &["gamma.total_rows"], &[]))
        .unwrap();

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["source"], "alpha");
    assert_eq!(json["joins"][0]["alias"], "gamma");
    assert_eq!(json["sub_plans"][0]["source"], "gamma");
}
