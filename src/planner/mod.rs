//! Query compiler - turns grouping and aggregate paths into a `CompiledPlan`.
//!
//! Compilation is a pure read over the model store:
//! 1. Resolve every requested path with the `PathResolver`
//! 2. Merge the join chains into one deduplicated join set (`JoinBuilder`)
//! 3. Compile query-based sources reached by a join as nested sub-plans
//! 4. Assemble grouping keys and aggregates in requested order

pub mod explain;
pub mod join_builder;
pub mod plan;

pub use join_builder::JoinBuilder;
pub use plan::{
    AggregateExpr, AggregateTarget, BaseRelation, BoundOn, ColumnRef, CompiledPlan, GroupingKey,
    PlannedJoin, RelationRef, SubPlan,
};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::model::{
    AggregateOp, AggregateRequest, FieldId, FieldKind, ModelStore, Path, PathParseError, Query,
    QueryStage, SourceId,
};
use crate::semantic::{PathResolver, ResolutionError, ResolvedField};

/// Errors that can occur during compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A requested path did not resolve.
    #[error("Cannot resolve '{path}': {source}")]
    Resolution {
        path: String,
        source: ResolutionError,
    },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid grouping key '{path}': {reason}")]
    InvalidGroupingKey { path: String, reason: String },

    #[error("Invalid aggregate '{aggregate}': {reason}")]
    InvalidAggregate { aggregate: String, reason: String },

    #[error("Invalid on-expression for join '{join}' at '{reference}': {reason}")]
    InvalidOnExpression {
        join: String,
        reference: String,
        reason: String,
    },

    /// A query-based source needs itself to be computed.
    #[error("Cyclic query derivation: {}", .chain.join(" -> "))]
    CyclicDerivation { chain: Vec<String> },

    #[error("Source '{source_name}' has {stages} query stages; only single-stage queries are supported")]
    UnsupportedPipeline { source_name: String, stages: usize },

    #[error("Duplicate output column: {0}")]
    DuplicateOutput(String),

    /// Compiling the query of a query-based source failed. `path` is the
    /// requested path that reached the source, if any.
    #[error(
        "In query-based source '{source_name}'{}: {inner}",
        .path.as_deref().map(|p| format!(" (via '{}')", p)).unwrap_or_default()
    )]
    Derived {
        source_name: String,
        path: Option<String>,
        #[source]
        inner: Box<CompileError>,
    },

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// The underlying resolution error, looking through sub-plan wrappers.
    pub fn resolution(&self) -> Option<&ResolutionError> {
        match self {
            CompileError::Resolution { source, .. } => Some(source),
            CompileError::Derived { inner, .. } => inner.resolution(),
            _ => None,
        }
    }

    /// The requested path that triggered the failure, if any. For failures
    /// inside a sub-plan this is the outer path that reached it.
    pub fn failing_path(&self) -> Option<&str> {
        match self {
            CompileError::Resolution { path, .. } => Some(path),
            CompileError::Derived { path: Some(path), .. } => Some(path),
            CompileError::Derived { inner, .. } => inner.failing_path(),
            _ => None,
        }
    }

    /// Record `requested` as the path behind a sub-plan failure.
    fn requested_by(self, requested: &Path) -> Self {
        match self {
            CompileError::Derived {
                source_name,
                path: None,
                inner,
            } => CompileError::Derived {
                source_name,
                path: Some(requested.to_string()),
                inner,
            },
            other => other,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// A query request: a starting source plus grouping and aggregate paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRequest {
    pub source: String,
    #[serde(default)]
    pub group_by: Vec<Path>,
    #[serde(default)]
    pub aggregates: Vec<AggregateRequest>,
}

impl QueryRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
        }
    }

    /// Build a request from dotted paths and aggregate expressions.
    pub fn parse(
        source: impl Into<String>,
        group_by: &[&str],
        aggregates: &[&str],
    ) -> Result<Self, PathParseError> {
        Ok(Self {
            source: source.into(),
            group_by: group_by.iter().map(|p| p.parse()).collect::<Result<_, _>>()?,
            aggregates: aggregates.iter().map(|a| a.parse()).collect::<Result<_, _>>()?,
        })
    }

    pub fn with_group_by(mut self, path: Path) -> Self {
        self.group_by.push(path);
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateRequest) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    /// The request equivalent to a single-stage stored query.
    pub fn from_query(query: &Query) -> Option<Self> {
        let [stage] = query.stages.as_slice() else {
            return None;
        };
        Some(Self {
            source: query.source.clone(),
            group_by: stage.group_by.clone(),
            aggregates: stage.aggregates.clone(),
        })
    }
}

/// Per-plan state while compiling one stage.
struct PlanState<'a> {
    joins: JoinBuilder<'a>,
    sub_plans: Vec<SubPlan>,
    /// Index: query-based source → position in `sub_plans`
    sub_plan_index: HashMap<SourceId, usize>,
}

/// Compiles queries against a borrowed model store.
pub struct QueryCompiler<'a> {
    store: &'a ModelStore,
    resolver: PathResolver<'a>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(store: &'a ModelStore) -> Self {
        Self {
            store,
            resolver: PathResolver::new(store),
        }
    }

    /// Compile `group_by` and `aggregates` starting at the source `start`.
    pub fn compile(
        &self,
        start: &str,
        group_by: &[Path],
        aggregates: &[AggregateRequest],
    ) -> CompileResult<CompiledPlan> {
        let start_id = self
            .store
            .source_id(start)
            .ok_or_else(|| CompileError::UnknownSource(start.to_string()))?;
        let stage = QueryStage {
            group_by: group_by.to_vec(),
            aggregates: aggregates.to_vec(),
        };
        self.compile_stage(start_id, &stage, &mut Vec::new())
    }

    pub fn compile_request(&self, request: &QueryRequest) -> CompileResult<CompiledPlan> {
        self.compile(&request.source, &request.group_by, &request.aggregates)
    }

    /// Compile a stored query, e.g. the derivation of a query-based source.
    pub fn compile_query(&self, query: &Query) -> CompileResult<CompiledPlan> {
        self.compile_query_inner(query, &query.source, &mut Vec::new())
    }

    fn compile_query_inner(
        &self,
        query: &Query,
        owner: &str,
        stack: &mut Vec<String>,
    ) -> CompileResult<CompiledPlan> {
        let [stage] = query.stages.as_slice() else {
            return Err(CompileError::UnsupportedPipeline {
                source_name: owner.to_string(),
                stages: query.stages.len(),
            });
        };
        let start = self
            .store
            .source_id(&query.source)
            .ok_or_else(|| CompileError::UnknownSource(query.source.clone()))?;
        self.compile_stage(start, stage, stack)
    }

    fn compile_stage(
        &self,
        start: SourceId,
        stage: &QueryStage,
        stack: &mut Vec<String>,
    ) -> CompileResult<CompiledPlan> {
        let source = self.store.source(start);
        debug!(
            source = %source.name,
            group_by = stage.group_by.len(),
            aggregates = stage.aggregates.len(),
            depth = stack.len(),
            "compiling query"
        );

        let mut state = PlanState {
            joins: JoinBuilder::new(self.store),
            sub_plans: Vec::new(),
            sub_plan_index: HashMap::new(),
        };

        let base = if source.is_query_based() {
            BaseRelation::SubPlan(self.sub_plan(&mut state, start, stack)?)
        } else {
            BaseRelation::Table(source.name.clone())
        };

        let group_by = stage
            .group_by
            .iter()
            .map(|path| {
                self.grouping_key(&mut state, start, path, stack)
                    .map_err(|err| err.requested_by(path))
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let aggregates = stage
            .aggregates
            .iter()
            .map(|request| {
                self.aggregate(&mut state, start, request, stack)
                    .map_err(|err| match &request.path {
                        Some(path) => err.requested_by(path),
                        None => err,
                    })
            })
            .collect::<CompileResult<Vec<_>>>()?;

        let mut outputs = HashSet::new();
        for name in group_by
            .iter()
            .map(|k| &k.name)
            .chain(aggregates.iter().map(|a| &a.name))
        {
            if !outputs.insert(name.as_str()) {
                return Err(CompileError::DuplicateOutput(name.clone()));
            }
        }

        Ok(CompiledPlan {
            source: source.name.clone(),
            base,
            joins: state.joins.finish(),
            group_by,
            aggregates,
            sub_plans: state.sub_plans,
        })
    }

    fn resolve(&self, start: SourceId, path: &Path) -> CompileResult<ResolvedField> {
        self.resolver
            .resolve_from(start, path)
            .map_err(|source| CompileError::Resolution {
                path: path.to_string(),
                source,
            })
    }

    /// Plan every join of `chain`, reusing joins already planned for the
    /// same prefix. Returns the relation the chain ends at.
    fn add_chain(
        &self,
        state: &mut PlanState<'a>,
        chain: &[FieldId],
        stack: &mut Vec<String>,
    ) -> CompileResult<RelationRef> {
        let mut relation = RelationRef::Root;
        for end in 1..=chain.len() {
            let prefix = &chain[..end];
            if let Some(existing) = state.joins.lookup(prefix) {
                relation = existing;
                continue;
            }
            let target = self.store.join_target(chain[end - 1]).ok_or_else(|| {
                CompileError::Internal(format!(
                    "join '{}' has no target",
                    self.store.qualified_name(chain[end - 1])
                ))
            })?;
            let sub_plan = if self.store.source(target).is_query_based() {
                Some(self.sub_plan(state, target, stack)?)
            } else {
                None
            };
            relation = state.joins.push(prefix, relation, sub_plan)?;
        }
        Ok(relation)
    }

    /// Compile (once per plan) the query behind a query-based source.
    fn sub_plan(
        &self,
        state: &mut PlanState<'a>,
        source: SourceId,
        stack: &mut Vec<String>,
    ) -> CompileResult<usize> {
        if let Some(idx) = state.sub_plan_index.get(&source) {
            return Ok(*idx);
        }

        let derived = self.store.source(source);
        let Some(query) = &derived.query else {
            return Err(CompileError::Internal(format!(
                "'{}' is not query-based",
                derived.name
            )));
        };

        if stack.contains(&derived.name) {
            let mut chain = stack.clone();
            chain.push(derived.name.clone());
            return Err(CompileError::CyclicDerivation { chain });
        }

        stack.push(derived.name.clone());
        let compiled = self.compile_query_inner(query, &derived.name, stack);
        stack.pop();

        let plan = compiled.map_err(|err| match err {
            // Keep cycle reports flat; they already name every source involved.
            CompileError::CyclicDerivation { .. } => err,
            other => CompileError::Derived {
                source_name: derived.name.clone(),
                path: None,
                inner: Box::new(other),
            },
        })?;

        debug!(source = %derived.name, joins = plan.joins.len(), "compiled sub-plan");
        let idx = state.sub_plans.len();
        state.sub_plans.push(SubPlan {
            source: derived.name.clone(),
            plan,
        });
        state.sub_plan_index.insert(source, idx);
        Ok(idx)
    }

    fn grouping_key(
        &self,
        state: &mut PlanState<'a>,
        start: SourceId,
        path: &Path,
        stack: &mut Vec<String>,
    ) -> CompileResult<GroupingKey> {
        let resolved = self.resolve(start, path)?;
        let relation = self.add_chain(state, &resolved.joins, stack)?;
        let field = self.store.field(resolved.field);
        let name = path.last().unwrap_or(field.name.as_str()).to_string();

        match &field.kind {
            FieldKind::Scalar => Ok(GroupingKey {
                name,
                path: path.clone(),
                column: ColumnRef::new(relation, field.name.clone()),
                field: field.id,
                source: self.store.source(resolved.source).name.clone(),
            }),
            FieldKind::Join(join) => {
                // Grouping by a join groups by the joined source's primary key.
                let target = self.store.source_id(&join.target).ok_or_else(|| {
                    CompileError::Resolution {
                        path: path.to_string(),
                        source: ResolutionError::UnknownSource {
                            name: join.target.clone(),
                            via: Some(self.store.qualified_name(field.id)),
                        },
                    }
                })?;
                let target_source = self.store.source(target);
                let key = target_source
                    .primary_key
                    .as_deref()
                    .and_then(|pk| self.store.field_on(target, pk))
                    .ok_or_else(|| CompileError::InvalidGroupingKey {
                        path: path.to_string(),
                        reason: format!(
                            "join target '{}' has no primary key",
                            target_source.name
                        ),
                    })?;

                let mut chain = resolved.joins.clone();
                chain.push(field.id);
                let relation = self.add_chain(state, &chain, stack)?;
                Ok(GroupingKey {
                    name,
                    path: path.clone(),
                    column: ColumnRef::new(relation, key.name.clone()),
                    field: key.id,
                    source: target_source.name.clone(),
                })
            }
            FieldKind::Aggregate(_) => Err(CompileError::InvalidGroupingKey {
                path: path.to_string(),
                reason: format!(
                    "'{}' is an aggregate; use it as an aggregate instead",
                    self.store.qualified_name(field.id)
                ),
            }),
        }
    }

    fn aggregate(
        &self,
        state: &mut PlanState<'a>,
        start: SourceId,
        request: &AggregateRequest,
        stack: &mut Vec<String>,
    ) -> CompileResult<AggregateExpr> {
        let name = request.output_name();
        let invalid = |reason: String| CompileError::InvalidAggregate {
            aggregate: request.to_string(),
            reason,
        };

        match (request.op, &request.path) {
            (Some(op), None) => {
                if !op.allows_no_argument() {
                    return Err(invalid(format!("{}() needs an argument", op)));
                }
                Ok(AggregateExpr {
                    name,
                    op,
                    target: AggregateTarget::Rows(RelationRef::Root),
                    path: None,
                    defined_by: None,
                })
            }
            (Some(op), Some(path)) => {
                let resolved = self.resolve(start, path)?;
                let target = self.aggregate_target(state, op, &resolved, stack, &invalid)?;
                Ok(AggregateExpr {
                    name,
                    op,
                    target,
                    path: Some(path.clone()),
                    defined_by: None,
                })
            }
            (None, Some(path)) => {
                let resolved = self.resolve(start, path)?;
                let field = self.store.field(resolved.field);
                let Some(def) = field.aggregate() else {
                    return Err(invalid(format!(
                        "'{}' is a {} field; give an aggregate operator",
                        self.store.qualified_name(field.id),
                        field.kind_name()
                    )));
                };

                let target = match &def.path {
                    None => {
                        if !def.op.allows_no_argument() {
                            return Err(invalid(format!("{}() needs an argument", def.op)));
                        }
                        let relation = self.add_chain(state, &resolved.joins, stack)?;
                        AggregateTarget::Rows(relation)
                    }
                    Some(inner) => {
                        // The definition's path is relative to the field's owner.
                        let inner_resolved = self
                            .resolver
                            .resolve_from(resolved.source, inner)
                            .map_err(|source| CompileError::Resolution {
                                path: format!("{} ({})", path, inner),
                                source,
                            })?;
                        let mut joins = resolved.joins.clone();
                        joins.extend(inner_resolved.joins.iter().copied());
                        let combined = ResolvedField {
                            path: path.clone(),
                            field: inner_resolved.field,
                            source: inner_resolved.source,
                            joins,
                        };
                        self.aggregate_target(state, def.op, &combined, stack, &invalid)?
                    }
                };

                Ok(AggregateExpr {
                    name,
                    op: def.op,
                    target,
                    path: Some(path.clone()),
                    defined_by: Some(field.id),
                })
            }
            (None, None) => Err(invalid("nothing to aggregate".into())),
        }
    }

    fn aggregate_target(
        &self,
        state: &mut PlanState<'a>,
        op: AggregateOp,
        resolved: &ResolvedField,
        stack: &mut Vec<String>,
        invalid: &dyn Fn(String) -> CompileError,
    ) -> CompileResult<AggregateTarget> {
        let field = self.store.field(resolved.field);
        match &field.kind {
            FieldKind::Scalar => {
                let relation = self.add_chain(state, &resolved.joins, stack)?;
                Ok(AggregateTarget::Column(ColumnRef::new(
                    relation,
                    field.name.clone(),
                )))
            }
            FieldKind::Join(join) if op == AggregateOp::Count => {
                if self.store.join_target(field.id).is_none() {
                    return Err(CompileError::Resolution {
                        path: resolved.path.to_string(),
                        source: ResolutionError::UnknownSource {
                            name: join.target.clone(),
                            via: Some(self.store.qualified_name(field.id)),
                        },
                    });
                }
                let mut chain = resolved.joins.clone();
                chain.push(field.id);
                let relation = self.add_chain(state, &chain, stack)?;
                Ok(AggregateTarget::Rows(relation))
            }
            FieldKind::Join(_) => Err(invalid(format!(
                "{} cannot be applied to join '{}'",
                op,
                self.store.qualified_name(field.id)
            ))),
            FieldKind::Aggregate(_) => Err(invalid(format!(
                "'{}' is already an aggregate",
                self.store.qualified_name(field.id)
            ))),
        }
    }
}
