//! Compiled plan types.
//!
//! A plan is a flat description of one aggregate query: a base relation, a
//! list of joins each hanging off an earlier relation, grouping keys, and
//! aggregates. Relations are addressed by position (`RelationRef`), never by
//! name, so a join tree that revisits the same source stays unambiguous.

use serde::Serialize;

use crate::model::{AggregateOp, Cardinality, FieldId, Path};

/// A relation inside a plan: the base relation or one of the joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationRef {
    Root,
    /// Index into `CompiledPlan::joins`.
    Join(usize),
}

/// A column of a relation in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnRef {
    pub relation: RelationRef,
    pub field: String,
}

impl ColumnRef {
    pub fn new(relation: RelationRef, field: impl Into<String>) -> Self {
        Self {
            relation,
            field: field.into(),
        }
    }
}

/// An on-expression with its field references bound to plan relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundOn {
    Eq { left: ColumnRef, right: ColumnRef },
    And(Vec<BoundOn>),
}

impl BoundOn {
    /// Every equality pair, in order.
    pub fn equalities(&self) -> Vec<(&ColumnRef, &ColumnRef)> {
        match self {
            BoundOn::Eq { left, right } => vec![(left, right)],
            BoundOn::And(kids) => kids.iter().flat_map(BoundOn::equalities).collect(),
        }
    }
}

/// Where a plan reads its base rows from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseRelation {
    /// Rows of a table-backed source.
    Table(String),
    /// Output of `CompiledPlan::sub_plans[i]`.
    SubPlan(usize),
}

/// One join in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedJoin {
    /// Dotted join-field path from the root, e.g. `alpha.gamma`.
    pub alias: String,
    /// Relation this join hangs off.
    pub parent: RelationRef,
    /// The join field that defines this edge.
    pub field: FieldId,
    /// Source owning the join field.
    pub owner: String,
    /// Name of the join field.
    pub name: String,
    /// Target source name.
    pub target: String,
    pub cardinality: Cardinality,
    pub on: BoundOn,
    /// Set when the target is query-based: index into `CompiledPlan::sub_plans`.
    pub sub_plan: Option<usize>,
}

/// A grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingKey {
    /// Output column name.
    pub name: String,
    /// Path as requested.
    pub path: Path,
    pub column: ColumnRef,
    /// Field the key reads.
    pub field: FieldId,
    /// Source owning `field`.
    pub source: String,
}

/// What an aggregate operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateTarget {
    /// Rows of a relation (`count()`).
    Rows(RelationRef),
    /// Values of a column.
    Column(ColumnRef),
}

impl AggregateTarget {
    pub fn relation(&self) -> RelationRef {
        match self {
            AggregateTarget::Rows(relation) => *relation,
            AggregateTarget::Column(column) => column.relation,
        }
    }
}

/// An aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateExpr {
    /// Output column name.
    pub name: String,
    pub op: AggregateOp,
    pub target: AggregateTarget,
    /// Path as requested, if any.
    pub path: Option<Path>,
    /// The pre-defined aggregate field this expression came from.
    pub defined_by: Option<FieldId>,
}

/// A nested plan for a query-based source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubPlan {
    /// The query-based source this plan materialises.
    pub source: String,
    pub plan: CompiledPlan,
}

/// A compiled aggregate query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledPlan {
    /// Source the query starts at.
    pub source: String,
    pub base: BaseRelation,
    /// Joins in first-required order.
    pub joins: Vec<PlannedJoin>,
    /// Grouping keys in requested order.
    pub group_by: Vec<GroupingKey>,
    /// Aggregates in requested order.
    pub aggregates: Vec<AggregateExpr>,
    pub sub_plans: Vec<SubPlan>,
}

impl CompiledPlan {
    /// Output columns: grouping keys, then aggregates.
    pub fn output_columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .map(|k| k.name.clone())
            .chain(self.aggregates.iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Display name of a relation: the source name for the root, the join
    /// alias otherwise.
    pub fn relation_name(&self, relation: RelationRef) -> &str {
        match relation {
            RelationRef::Root => &self.source,
            RelationRef::Join(idx) => self
                .joins
                .get(idx)
                .map(|j| j.alias.as_str())
                .unwrap_or("?"),
        }
    }

    pub fn join(&self, alias: &str) -> Option<&PlannedJoin> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Number of plans including every nested sub-plan.
    pub fn plan_count(&self) -> usize {
        1 + self
            .sub_plans
            .iter()
            .map(|sub| sub.plan.plan_count())
            .sum::<usize>()
    }
}
