//! Core model types: sources, fields, joins, and the queries that derive sources.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::PathParseError;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable index of a source in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub(crate) usize);

/// Stable index of a field in the model arena.
///
/// Field ids are never reused; a field keeps its id for the lifetime of the
/// store, so ids double as join identities in compiled plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub(crate) usize);

// ============================================================================
// Paths
// ============================================================================

/// A dotted sequence of names, e.g. `alpha.gamma.total_rows`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(Vec<String>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The terminal segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PathParseError::Empty);
        }
        let segments: Vec<String> = s.split('.').map(|seg| seg.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathParseError::EmptySegment(s.to_string()));
        }
        Ok(Path(segments))
    }
}

impl TryFrom<String> for Path {
    type Error = PathParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}

// ============================================================================
// Fields
// ============================================================================

/// Cardinality of a join from the owning source's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one target row per owner row.
    One,
    /// Any number of target rows per owner row.
    Many,
}

impl Cardinality {
    /// Returns true if this join can multiply owner rows.
    pub fn causes_fanout(&self) -> bool {
        matches!(self, Cardinality::Many)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "one"),
            Cardinality::Many => write!(f, "many"),
        }
    }
}

/// Aggregate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    /// Whether the operator is meaningful without an argument (`count()`).
    pub fn allows_no_argument(&self) -> bool {
        matches!(self, AggregateOp::Count)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateOp::Count => "count",
            AggregateOp::CountDistinct => "count_distinct",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateOp {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateOp::Count),
            "count_distinct" => Ok(AggregateOp::CountDistinct),
            "sum" => Ok(AggregateOp::Sum),
            "avg" => Ok(AggregateOp::Avg),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            other => Err(PathParseError::UnknownAggregate(other.to_string())),
        }
    }
}

/// A pre-defined aggregate computation stored on a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDef {
    pub op: AggregateOp,
    /// Path aggregated over, relative to the owning source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
}

/// Reference to a field from inside an on-expression.
///
/// `[field]` names a field of the owning source; `[join, field]` names a
/// field of the join's target, addressed through the join's own name.
pub type FieldRef = Path;

/// Boolean equality predicate tree guarding a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum OnExpr {
    #[serde(rename = "=")]
    Eq { left: FieldRef, right: FieldRef },
    #[serde(rename = "and")]
    And { kids: Vec<OnExpr> },
}

impl OnExpr {
    pub fn eq(left: impl Into<FieldRef>, right: impl Into<FieldRef>) -> Self {
        OnExpr::Eq {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Visit every equality leaf in order.
    pub fn equalities(&self) -> Vec<(&FieldRef, &FieldRef)> {
        match self {
            OnExpr::Eq { left, right } => vec![(left, right)],
            OnExpr::And { kids } => kids.iter().flat_map(OnExpr::equalities).collect(),
        }
    }
}

impl fmt::Display for OnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnExpr::Eq { left, right } => write!(f, "{} = {}", left, right),
            OnExpr::And { kids } => {
                let parts: Vec<String> = kids.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" and "))
            }
        }
    }
}

/// A join edge stored on its owning field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDef {
    /// Target source name, resolved lazily against the store.
    pub target: String,
    pub cardinality: Cardinality,
    pub on: OnExpr,
}

/// What a field is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Scalar,
    Aggregate(AggregateDef),
    Join(JoinDef),
}

/// A field declaration, before it is owned by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
        }
    }

    pub fn aggregate(name: impl Into<String>, op: AggregateOp, path: Option<Path>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Aggregate(AggregateDef { op, path }),
        }
    }

    pub fn join(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        on: OnExpr,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Join(JoinDef {
                target: target.into(),
                cardinality,
                on,
            }),
        }
    }
}

/// A field owned by a source in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub id: FieldId,
    pub owner: SourceId,
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn is_join(&self) -> bool {
        matches!(self.kind, FieldKind::Join(_))
    }

    pub fn join(&self) -> Option<&JoinDef> {
        match &self.kind {
            FieldKind::Join(join) => Some(join),
            _ => None,
        }
    }

    pub fn aggregate(&self) -> Option<&AggregateDef> {
        match &self.kind {
            FieldKind::Aggregate(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FieldKind::Scalar => "scalar",
            FieldKind::Aggregate(_) => "aggregate",
            FieldKind::Join(_) => "join",
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// A named aggregate computation inside a query stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<AggregateOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
}

impl AggregateRequest {
    /// `count()` over the query's rows.
    pub fn count() -> Self {
        Self {
            name: None,
            op: Some(AggregateOp::Count),
            path: None,
        }
    }

    /// `op(path)`.
    pub fn apply(op: AggregateOp, path: Path) -> Self {
        Self {
            name: None,
            op: Some(op),
            path: Some(path),
        }
    }

    /// A path ending at a pre-defined aggregate field.
    pub fn field(path: Path) -> Self {
        Self {
            name: None,
            op: None,
            path: Some(path),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The output column name: explicit name, else last path segment, else
    /// the operator name.
    pub fn output_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(last) = self.path.as_ref().and_then(Path::last) {
            return last.to_string();
        }
        self.op.unwrap_or(AggregateOp::Count).name().to_string()
    }
}

impl fmt::Display for AggregateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{} is ", name)?;
        }
        match (&self.op, &self.path) {
            (Some(op), Some(path)) => write!(f, "{}({})", op, path),
            (Some(op), None) => write!(f, "{}()", op),
            (None, Some(path)) => write!(f, "{}", path),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

/// Parses `count()`, `sum(amount)`, `gamma.total_rows`, `total is count()`.
impl FromStr for AggregateRequest {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, expr) = match s.split_once(" is ") {
            Some((name, expr)) => (Some(name.trim().to_string()), expr.trim()),
            None => (None, s.trim()),
        };

        let request = match expr.split_once('(') {
            Some((op, rest)) => {
                let arg = rest
                    .strip_suffix(')')
                    .ok_or_else(|| PathParseError::Malformed(s.to_string()))?
                    .trim();
                let op: AggregateOp = op.parse()?;
                let path = if arg.is_empty() { None } else { Some(arg.parse()?) };
                AggregateRequest {
                    name: None,
                    op: Some(op),
                    path,
                }
            }
            None => AggregateRequest::field(expr.parse()?),
        };

        Ok(AggregateRequest { name, ..request })
    }
}

/// One stage of a query pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStage {
    #[serde(default)]
    pub group_by: Vec<Path>,
    #[serde(default)]
    pub aggregates: Vec<AggregateRequest>,
}

/// A query: a source plus an ordered sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub source: String,
    pub stages: Vec<QueryStage>,
}

impl Query {
    pub fn new(source: impl Into<String>, stage: QueryStage) -> Self {
        Self {
            source: source.into(),
            stages: vec![stage],
        }
    }

    /// Output column names in order: grouping keys, then aggregates.
    pub fn output_names(&self) -> Vec<String> {
        let Some(stage) = self.stages.last() else {
            return Vec::new();
        };
        stage
            .group_by
            .iter()
            .filter_map(|p| p.last().map(str::to_string))
            .chain(stage.aggregates.iter().map(AggregateRequest::output_name))
            .collect()
    }
}

// ============================================================================
// Sources
// ============================================================================

/// A named logical relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    /// Fields in insertion order.
    pub fields: Vec<FieldId>,
    pub primary_key: Option<String>,
    /// Present when this source is the output of a query.
    pub query: Option<Query>,
}

impl Source {
    pub fn is_query_based(&self) -> bool {
        self.query.is_some()
    }
}
