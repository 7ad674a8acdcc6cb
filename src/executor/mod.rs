//! Plan execution.
//!
//! `ExecutionAdapter` is the boundary between the compiler and whatever
//! engine produces rows. It is the only asynchronous interface in the crate;
//! timeouts and cancellation belong to the adapter. `MemoryAdapter` is a
//! reference engine over in-memory tables.

mod memory;

pub use memory::MemoryAdapter;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::planner::{CompileError, CompiledPlan};

/// Result type for execution.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors raised while executing a plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("No table registered for source '{0}'")]
    MissingTable(String),

    #[error("Relation '{relation}' has no column '{column}'")]
    MissingColumn { relation: String, column: String },

    #[error("Row {row} of table '{table}' has {found} values, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Rows produced by executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Grouping keys then aggregates, in requested order.
    pub columns: Vec<String>,
    /// One row per distinct grouping-key combination.
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    serde_json::Value::Object(
                        self.columns.iter().cloned().zip(row.iter().cloned()).collect(),
                    )
                })
                .collect(),
        )
    }
}

/// Executes compiled plans against a backing engine.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Run `plan` and return its rows.
    async fn execute(&self, plan: &CompiledPlan) -> ExecutionResult<QueryResult>;
}
