//! Snapshot tests for plan explain output.

use skein::model::ModelDocument;
use skein::planner::{QueryCompiler, QueryRequest};

const CYCLES: &str = include_str!("../fixtures/cycles.toml");

fn explain(source: &str, group_by: &[&str], aggregates: &[&str]) -> String {
    let store = ModelDocument::from_toml_str(CYCLES).unwrap().build().unwrap();
    let request = QueryRequest::parse(source, group_by, aggregates).unwrap();
    QueryCompiler::new(&store)
        .compile_request(&request)
        .unwrap()
        .explain()
}

#[test]
fn test_explain_self_referential_sub_plan() {
    insta::assert_snapshot!(explain("alpha", &["gamma.total_rows"], &[]), @r"
    plan alpha
      base: table alpha
      join gamma: alpha.gamma -> gamma [one] on alpha.id = gamma.id via sub_plan 0
      group_by total_rows: gamma.total_rows
      sub_plan 0: gamma
        plan alpha
          base: table alpha
          group_by id: alpha.id
          aggregate total_rows: count(alpha)
    ");
}

#[test]
fn test_explain_cycle_traversal_from_beta() {
    insta::assert_snapshot!(
        explain("beta", &["b_name", "alpha.a_name", "alpha.gamma.total_rows"], &[]),
        @r"
    plan beta
      base: table beta
      join alpha: beta.alpha -> alpha [one] on alpha.id = beta.alpha_id
      join alpha.gamma: alpha.gamma -> gamma [one] on alpha.id = alpha.gamma.id via sub_plan 0
      group_by b_name: beta.b_name
      group_by a_name: alpha.a_name
      group_by total_rows: alpha.gamma.total_rows
      sub_plan 0: gamma
        plan alpha
          base: table alpha
          group_by id: alpha.id
          aggregate total_rows: count(alpha)
    "
    );
}

#[test]
fn test_explain_aggregates_over_fan_out() {
    insta::assert_snapshot!(
        explain("alpha", &["a_name"], &["betas is count(beta)", "max(beta.b_name)"]),
        @r"
    plan alpha
      base: table alpha
      join beta: alpha.beta -> beta [many] on alpha.id = beta.alpha_id
      group_by a_name: alpha.a_name
      aggregate betas: count(beta)
      aggregate b_name: max(beta.b_name)
    "
    );
}
