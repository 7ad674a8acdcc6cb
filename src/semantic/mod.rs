//! Semantic layer: resolving field paths against the model graph.

pub mod error;
pub mod resolve;

pub use error::{ResolutionError, ResolveResult};
pub use resolve::{PathResolver, ResolvedField};
