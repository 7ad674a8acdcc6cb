//! # skein
//!
//! A semantic-model compiler for join graphs that may contain cycles.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │         Model document (TOML / JSON) or Rust API         │
//! │      (sources, join fields, aggregates, amendments)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [model::loader, model::amend]
//! ┌─────────────────────────────────────────────────────────┐
//! │                      ModelStore                          │
//! │     (arena of sources + fields, joins by target name)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic::PathResolver]
//! ┌─────────────────────────────────────────────────────────┐
//! │      ResolvedField (terminal field + join chain)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner::QueryCompiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │   CompiledPlan (deduplicated joins, nested sub-plans)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor::ExecutionAdapter]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     QueryResult                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `session::Session` ties the stages together and caches compiled plans
//! per model revision.

pub mod config;
pub mod executor;
pub mod model;
pub mod planner;
pub mod semantic;
pub mod session;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::executor::{ExecutionAdapter, ExecutionError, MemoryAdapter, QueryResult};
    pub use crate::model::{
        AggregateOp, AggregateRequest, Amendment, Cardinality, FieldDef, ModelDocument,
        ModelError, ModelStore, OnExpr, Path, Query, QueryStage,
    };
    pub use crate::planner::{CompileError, CompiledPlan, QueryCompiler, QueryRequest};
    pub use crate::semantic::{PathResolver, ResolutionError, ResolvedField};
    pub use crate::session::{QueryOutcome, Session};
}

pub use model::{ModelStore, Path};
pub use planner::{CompiledPlan, QueryCompiler, QueryRequest};
pub use session::Session;
