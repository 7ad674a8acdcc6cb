//! In-memory reference engine.
//!
//! Joins are left joins evaluated by nested loops. Aggregates are symmetric:
//! each relation's rows are identified by their position, so a row repeated
//! by a fan-out join is counted and summed once per relation.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::model::{AggregateOp, TableData};
use crate::planner::{AggregateTarget, BaseRelation, ColumnRef, CompiledPlan, RelationRef};

use super::{ExecutionAdapter, ExecutionError, ExecutionResult, QueryResult};

/// Materialised rows with named columns.
#[derive(Debug, Clone, Default)]
struct Relation {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    fn column(&self, name: &str) -> ExecutionResult<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ExecutionError::MissingColumn {
                relation: self.name.clone(),
                column: name.to_string(),
            })
    }
}

/// A joined row: one optional row index per plan relation.
/// Slot 0 is the root, slot `i + 1` is join `i`.
type Combined = Vec<Option<usize>>;

fn slot(relation: RelationRef) -> usize {
    match relation {
        RelationRef::Root => 0,
        RelationRef::Join(idx) => idx + 1,
    }
}

/// Engine over tables held in memory, keyed by source name.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    tables: HashMap<String, Relation>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `insert_table`.
    pub fn with_table<C, R>(mut self, name: &str, columns: C, rows: R) -> ExecutionResult<Self>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator<Item = Vec<Value>>,
    {
        self.insert_table(name, columns, rows)?;
        Ok(self)
    }

    /// Register (or replace) the rows backing a table source.
    pub fn insert_table<C, R>(&mut self, name: &str, columns: C, rows: R) -> ExecutionResult<()>
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator<Item = Vec<Value>>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let rows: Vec<Vec<Value>> = rows.into_iter().collect();

        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != columns.len())
        {
            return Err(ExecutionError::RowWidth {
                table: name.to_string(),
                row,
                expected: columns.len(),
                found: values.len(),
            });
        }

        debug!(table = name, rows = rows.len(), "registered table");
        self.tables.insert(
            name.to_string(),
            Relation {
                name: name.to_string(),
                columns,
                rows,
            },
        );
        Ok(())
    }

    /// Adapter holding every table of a model document.
    pub fn from_tables(tables: &[TableData]) -> ExecutionResult<Self> {
        let mut adapter = Self::new();
        for table in tables {
            adapter.insert_table(&table.name, table.columns.clone(), table.rows.clone())?;
        }
        Ok(adapter)
    }

    /// Execute synchronously.
    pub fn run(&self, plan: &CompiledPlan) -> ExecutionResult<QueryResult> {
        let derived = plan
            .sub_plans
            .iter()
            .map(|sub| {
                self.run(&sub.plan).map(|result| Relation {
                    name: sub.source.clone(),
                    columns: result.columns,
                    rows: result.rows,
                })
            })
            .collect::<ExecutionResult<Vec<_>>>()?;

        let mut relations = Vec::with_capacity(plan.joins.len() + 1);
        relations.push(match &plan.base {
            BaseRelation::Table(name) => self.table(name)?.clone(),
            BaseRelation::SubPlan(idx) => derived_relation(&derived, *idx)?,
        });
        for join in &plan.joins {
            relations.push(match join.sub_plan {
                Some(idx) => derived_relation(&derived, idx)?,
                None => self.table(&join.target)?.clone(),
            });
        }

        let mut combined: Vec<Combined> = (0..relations[0].rows.len())
            .map(|row| {
                let mut c = vec![None; relations.len()];
                c[0] = Some(row);
                c
            })
            .collect();

        for (idx, join) in plan.joins.iter().enumerate() {
            let own = idx + 1;
            let conditions = join
                .on
                .equalities()
                .into_iter()
                .map(|(left, right)| Ok((bind(&relations, left)?, bind(&relations, right)?)))
                .collect::<ExecutionResult<Vec<_>>>()?;

            let target = &relations[own];
            let mut next = Vec::with_capacity(combined.len());
            for row in combined {
                let matches: Vec<usize> = (0..target.rows.len())
                    .filter(|candidate| {
                        conditions.iter().all(|(left, right)| {
                            let l = left.value(&relations, &row, own, *candidate);
                            let r = right.value(&relations, &row, own, *candidate);
                            !l.is_null() && !r.is_null() && values_equal(l, r)
                        })
                    })
                    .collect();

                match matches.as_slice() {
                    [] => next.push(row),
                    [first, ..] if !join.cardinality.causes_fanout() => {
                        let mut extended = row;
                        extended[own] = Some(*first);
                        next.push(extended);
                    }
                    all => {
                        for m in all {
                            let mut extended = row.clone();
                            extended[own] = Some(*m);
                            next.push(extended);
                        }
                    }
                }
            }
            combined = next;
        }

        let keys = plan
            .group_by
            .iter()
            .map(|key| bind(&relations, &key.column))
            .collect::<ExecutionResult<Vec<_>>>()?;
        let aggregates = plan
            .aggregates
            .iter()
            .map(|agg| {
                let input = match &agg.target {
                    AggregateTarget::Rows(relation) => AggregateInput::Rows(slot(*relation)),
                    AggregateTarget::Column(column) => {
                        AggregateInput::Column(bind(&relations, column)?)
                    }
                };
                Ok((agg.op, input))
            })
            .collect::<ExecutionResult<Vec<_>>>()?;

        let mut groups: Vec<Group> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();

        if keys.is_empty() {
            groups.push(Group::new(Vec::new(), aggregates.len()));
        }

        for row in &combined {
            let key_values: Vec<Value> = keys
                .iter()
                .map(|key| key.value(&relations, row, usize::MAX, 0).clone())
                .collect();
            let group = if keys.is_empty() {
                0
            } else {
                let signature = group_signature(&key_values);
                *group_index.entry(signature).or_insert_with(|| {
                    groups.push(Group::new(key_values, aggregates.len()));
                    groups.len() - 1
                })
            };

            for (state, (_, input)) in groups[group].states.iter_mut().zip(&aggregates) {
                state.accumulate(&relations, row, input);
            }
        }

        let rows = groups
            .into_iter()
            .map(|group| {
                let mut out = group.keys;
                out.extend(
                    group
                        .states
                        .into_iter()
                        .zip(&aggregates)
                        .map(|(state, (op, input))| state.finish(*op, input)),
                );
                out
            })
            .collect::<Vec<_>>();

        debug!(source = %plan.source, joined = combined.len(), rows = rows.len(), "executed plan");

        Ok(QueryResult {
            columns: plan.output_columns(),
            rows,
        })
    }

    fn table(&self, name: &str) -> ExecutionResult<&Relation> {
        self.tables
            .get(name)
            .ok_or_else(|| ExecutionError::MissingTable(name.to_string()))
    }
}

#[async_trait]
impl ExecutionAdapter for MemoryAdapter {
    async fn execute(&self, plan: &CompiledPlan) -> ExecutionResult<QueryResult> {
        self.run(plan)
    }
}

fn derived_relation(derived: &[Relation], idx: usize) -> ExecutionResult<Relation> {
    derived
        .get(idx)
        .cloned()
        .ok_or_else(|| ExecutionError::Engine(format!("sub_plan {idx} is missing")))
}

/// A column resolved to a relation slot and column position.
#[derive(Debug, Clone, Copy)]
struct BoundColumn {
    slot: usize,
    column: usize,
}

static NULL: Value = Value::Null;

impl BoundColumn {
    /// Value for `row`; when the column belongs to the relation currently
    /// being joined (`probing`), the candidate row is read instead.
    fn value<'r>(
        &self,
        relations: &'r [Relation],
        row: &Combined,
        probing: usize,
        candidate: usize,
    ) -> &'r Value {
        let index = if self.slot == probing {
            Some(candidate)
        } else {
            row.get(self.slot).copied().flatten()
        };
        index
            .and_then(|i| relations[self.slot].rows.get(i))
            .and_then(|values| values.get(self.column))
            .unwrap_or(&NULL)
    }
}

fn bind(relations: &[Relation], column: &ColumnRef) -> ExecutionResult<BoundColumn> {
    let slot = slot(column.relation);
    let relation = relations
        .get(slot)
        .ok_or_else(|| ExecutionError::Engine(format!("relation {slot} is missing")))?;
    Ok(BoundColumn {
        slot,
        column: relation.column(&column.field)?,
    })
}

enum AggregateInput {
    Rows(usize),
    Column(BoundColumn),
}

impl AggregateInput {
    fn slot(&self) -> usize {
        match self {
            AggregateInput::Rows(slot) => *slot,
            AggregateInput::Column(column) => column.slot,
        }
    }
}

struct Group {
    keys: Vec<Value>,
    states: Vec<AggregateState>,
}

impl Group {
    fn new(keys: Vec<Value>, aggregates: usize) -> Self {
        Self {
            keys,
            states: (0..aggregates).map(|_| AggregateState::default()).collect(),
        }
    }
}

/// Values seen by one aggregate in one group, one entry per distinct row of
/// the aggregated relation.
#[derive(Default)]
struct AggregateState {
    seen: HashSet<usize>,
    values: Vec<Value>,
}

impl AggregateState {
    fn accumulate(&mut self, relations: &[Relation], row: &Combined, input: &AggregateInput) {
        let Some(index) = row.get(input.slot()).copied().flatten() else {
            return;
        };
        if !self.seen.insert(index) {
            return;
        }
        if let AggregateInput::Column(column) = input {
            let value = column.value(relations, row, usize::MAX, 0);
            if !value.is_null() {
                self.values.push(value.clone());
            }
        }
    }

    fn finish(self, op: AggregateOp, input: &AggregateInput) -> Value {
        let rows_only = matches!(input, AggregateInput::Rows(_));
        match op {
            AggregateOp::Count if rows_only => Value::from(self.seen.len()),
            AggregateOp::Count => Value::from(self.values.len()),
            AggregateOp::CountDistinct if rows_only => Value::from(self.seen.len()),
            AggregateOp::CountDistinct => {
                let distinct: HashSet<String> = self.values.iter().map(Value::to_string).collect();
                Value::from(distinct.len())
            }
            AggregateOp::Sum => sum(&self.values),
            AggregateOp::Avg => {
                let numbers: Vec<f64> = self.values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregateOp::Min => extreme(self.values, Ordering::Less),
            AggregateOp::Max => extreme(self.values, Ordering::Greater),
        }
    }
}

fn sum(values: &[Value]) -> Value {
    let numbers: Vec<&Value> = values.iter().filter(|v| v.is_number()).collect();
    if numbers.is_empty() {
        return Value::Null;
    }
    let integral: Option<i64> = numbers
        .iter()
        .try_fold(0i64, |acc, v| v.as_i64().and_then(|n| acc.checked_add(n)));
    match integral {
        Some(total) => Value::from(total),
        None => Value::from(numbers.iter().filter_map(|v| v.as_f64()).sum::<f64>()),
    }
}

fn extreme(values: Vec<Value>, keep: Ordering) -> Value {
    values
        .into_iter()
        .reduce(|best, v| if compare(&v, &best) == keep { v } else { best })
        .unwrap_or(Value::Null)
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Equality with numeric coercion, so `1` matches `1.0`.
/// Grouping key text. Integral floats are written as integers so that keys
/// group the same way `values_equal` joins them.
fn group_signature(values: &[Value]) -> String {
    let normalized = values
        .iter()
        .map(|value| match value {
            Value::Number(n) if n.is_f64() => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Value::from(f as i64)
                }
                _ => value.clone(),
            },
            _ => value.clone(),
        })
        .collect();
    Value::Array(normalized).to_string()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
