//! Errors raised while defining or amending a model.

use thiserror::Error;

/// Result type for model store and amender operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Structural errors from the model store and the graph amender.
///
/// A failed operation leaves the store exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Duplicate source name: {0}")]
    DuplicateName(String),

    #[error("Duplicate field '{field}' on source '{source_name}'")]
    DuplicateField { source_name: String, field: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Primary key '{key}' is not a field of source '{source_name}'")]
    UnknownPrimaryKey { source_name: String, key: String },
}

/// Errors from parsing dotted paths and aggregate requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathParseError {
    #[error("Empty path")]
    Empty,

    #[error("Path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("Unknown aggregate operator: {0}")]
    UnknownAggregate(String),

    #[error("Malformed aggregate expression: {0}")]
    Malformed(String),
}
