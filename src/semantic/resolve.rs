//! Path resolution.
//!
//! Walks a dotted path from a starting source through join fields to a
//! terminal field. The walk is a loop over the caller's path segments, so it
//! always terminates after `path.len()` steps no matter how cyclic the join
//! graph is. There is no visited set: a path may pass through
//! the same source (or the same join) more than once, and every visit is
//! resolved exactly like the first.

use tracing::trace;

use crate::model::{Field, FieldId, ModelStore, Path, SourceId};

use super::error::{ResolutionError, ResolveResult};

/// A resolved path: the terminal field plus the joins walked to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// The path as requested.
    pub path: Path,
    /// Terminal field.
    pub field: FieldId,
    /// Source owning the terminal field.
    pub source: SourceId,
    /// Join fields traversed, in order.
    pub joins: Vec<FieldId>,
}

impl ResolvedField {
    pub fn is_local(&self) -> bool {
        self.joins.is_empty()
    }

    /// Resolve the terminal field against the store.
    pub fn terminal<'a>(&self, store: &'a ModelStore) -> &'a Field {
        store.field(self.field)
    }
}

/// Resolver over a borrowed model store.
pub struct PathResolver<'a> {
    store: &'a ModelStore,
}

impl<'a> PathResolver<'a> {
    pub fn new(store: &'a ModelStore) -> Self {
        Self { store }
    }

    /// Resolve `path` starting at the source named `start`.
    ///
    /// When the first segment is not a field of `start` but equals its name,
    /// it is treated as a qualifier and skipped (`beta.b_name` from `beta`).
    /// A field with the same name as its source always wins.
    pub fn resolve(&self, start: &str, path: &Path) -> ResolveResult<ResolvedField> {
        let start_id = self
            .store
            .source_id(start)
            .ok_or_else(|| ResolutionError::UnknownSource {
                name: start.to_string(),
                via: None,
            })?;
        self.resolve_from(start_id, path)
    }

    /// Resolve `path` starting at a source id.
    pub fn resolve_from(&self, start: SourceId, path: &Path) -> ResolveResult<ResolvedField> {
        let segments = path.segments();
        if segments.is_empty() {
            return Err(ResolutionError::EmptyPath);
        }

        let start_source = self.store.source(start);
        let skip = usize::from(
            segments.len() > 1
                && segments[0] == start_source.name
                && self.store.field_on(start, &segments[0]).is_none(),
        );

        let mut cursor = start;
        let mut joins = Vec::with_capacity(segments.len() - 1);

        let last = segments.len() - 1;
        for (position, segment) in segments.iter().enumerate().take(last).skip(skip) {
            let field = self.lookup(cursor, segment, position)?;
            let join = field.join().ok_or_else(|| ResolutionError::NotAJoin {
                source_name: self.store.source(cursor).name.clone(),
                field: field.name.clone(),
                kind: field.kind_name(),
            })?;
            let target =
                self.store
                    .source_id(&join.target)
                    .ok_or_else(|| ResolutionError::UnknownSource {
                        name: join.target.clone(),
                        via: Some(self.store.qualified_name(field.id)),
                    })?;

            trace!(
                from = %self.store.source(cursor).name,
                join = %field.name,
                to = %join.target,
                "walked join"
            );
            joins.push(field.id);
            cursor = target;
        }

        let terminal = self.lookup(cursor, &segments[last], last)?;
        Ok(ResolvedField {
            path: path.clone(),
            field: terminal.id,
            source: cursor,
            joins,
        })
    }

    fn lookup(&self, source: SourceId, segment: &str, position: usize) -> ResolveResult<&'a Field> {
        self.store
            .field_on(source, segment)
            .ok_or_else(|| ResolutionError::UnknownSegment {
                source_name: self.store.source(source).name.clone(),
                segment: segment.to_string(),
                position,
            })
    }
}
