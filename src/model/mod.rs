//! The model graph: sources, fields, joins, and post-load amendments.
//!
//! ```text
//! ModelDocument ──[loader]──▶ ModelStore ◀──[amend]── Amendment
//!                                  │
//!                                  ▼ [graph]
//!                              JoinGraph (diagnostics)
//! ```

pub mod amend;
pub mod error;
pub mod graph;
pub mod loader;
pub mod store;
pub mod types;

pub use amend::Amendment;
pub use error::{ModelError, ModelResult, PathParseError};
pub use graph::{DanglingJoin, JoinEdge, JoinGraph};
pub use loader::{
    load_document, AmendmentDecl, FieldDecl, LoadError, LoadResult, ModelDocument, SourceDecl,
    TableData,
};
pub use store::ModelStore;
pub use types::{
    AggregateDef, AggregateOp, AggregateRequest, Cardinality, Field, FieldDef, FieldId, FieldKind,
    FieldRef, JoinDef, OnExpr, Path, Query, QueryStage, Source, SourceId,
};
