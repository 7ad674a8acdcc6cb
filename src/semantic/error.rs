//! Path resolution errors.

use thiserror::Error;

/// Result type for path resolution.
pub type ResolveResult<T> = Result<T, ResolutionError>;

/// Why a single path failed to resolve.
///
/// Resolution errors are local to the path being resolved; they never
/// affect the model or other paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The path has no segments.
    #[error("Empty path")]
    EmptyPath,

    /// A segment names no field on the source the walk had reached.
    #[error("Unknown field '{segment}' on source '{source_name}' (segment {position})")]
    UnknownSegment {
        source_name: String,
        segment: String,
        position: usize,
    },

    /// A non-final segment named a field that is not a join.
    #[error("Field '{field}' on source '{source_name}' is a {kind} field, not a join")]
    NotAJoin {
        source_name: String,
        field: String,
        kind: &'static str,
    },

    /// The start source, or a join's target source, is not in the model.
    #[error("Unknown source '{name}'{}", .via.as_ref().map(|v| format!(" (join target of '{}')", v)).unwrap_or_default())]
    UnknownSource { name: String, via: Option<String> },

    /// More than one field matches a segment.
    ///
    /// Reserved for overload resolution; field names are currently unique
    /// per source so the resolver never produces it.
    #[error("Ambiguous field '{field}' on source '{source_name}': {}", .candidates.join(", "))]
    AmbiguousField {
        source_name: String,
        field: String,
        candidates: Vec<String>,
    },
}
