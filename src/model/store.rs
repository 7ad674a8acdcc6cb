//! The model store: an arena owning every source and field.
//!
//! Sources and fields are addressed by stable ids. Join fields carry the
//! *name* of their target source rather than an id or reference, so a join
//! may point at a source that is defined later, or back at its own owner,
//! without creating ownership cycles. Targets are looked up by name at
//! resolution time.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::error::{ModelError, ModelResult};
use super::types::{Field, FieldDef, FieldId, FieldKind, Query, Source, SourceId};

/// Owner of the model definition for one compilation session.
///
/// Cloning produces an independent copy; concurrent sessions should each own
/// one rather than share a mutable store.
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    sources: Vec<Source>,
    fields: Vec<Field>,
    /// Index: source name → SourceId
    source_index: HashMap<String, SourceId>,
    /// Bumped on every successful mutation.
    revision: u64,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Definition
    // ========================================================================

    /// Register a table-backed source with its fields.
    pub fn define_source(
        &mut self,
        name: impl Into<String>,
        fields: Vec<FieldDef>,
        primary_key: Option<String>,
    ) -> ModelResult<SourceId> {
        let name = name.into();
        self.check_new_source(&name, &fields, primary_key.as_deref())?;
        let id = self.insert_source(name, fields, primary_key, None);
        Ok(id)
    }

    /// Register a source whose rows are the output of `query`.
    ///
    /// The query's own source does not need to exist yet; output fields are
    /// derived from the query's grouping keys and aggregate names alone.
    pub fn define_query_source(
        &mut self,
        name: impl Into<String>,
        query: Query,
        primary_key: Option<String>,
    ) -> ModelResult<SourceId> {
        let name = name.into();
        let fields: Vec<FieldDef> = query
            .output_names()
            .into_iter()
            .map(FieldDef::scalar)
            .collect();
        self.check_new_source(&name, &fields, primary_key.as_deref())?;
        let id = self.insert_source(name, fields, primary_key, Some(query));
        Ok(id)
    }

    fn check_new_source(
        &self,
        name: &str,
        fields: &[FieldDef],
        primary_key: Option<&str>,
    ) -> ModelResult<()> {
        if self.source_index.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }

        let mut seen = HashSet::new();
        for field in fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ModelError::DuplicateField {
                    source_name: name.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        if let Some(key) = primary_key {
            if !seen.contains(key) {
                return Err(ModelError::UnknownPrimaryKey {
                    source_name: name.to_string(),
                    key: key.to_string(),
                });
            }
        }

        Ok(())
    }

    fn insert_source(
        &mut self,
        name: String,
        fields: Vec<FieldDef>,
        primary_key: Option<String>,
        query: Option<Query>,
    ) -> SourceId {
        let id = SourceId(self.sources.len());
        self.sources.push(Source {
            id,
            name: name.clone(),
            fields: Vec::with_capacity(fields.len()),
            primary_key,
            query,
        });
        for def in fields {
            self.push_field(id, def);
        }
        self.source_index.insert(name.clone(), id);
        self.revision += 1;
        debug!(source = %name, fields = self.sources[id.0].fields.len(), "defined source");
        id
    }

    /// Append a field to a source. Callers must have validated the name.
    pub(crate) fn push_field(&mut self, owner: SourceId, def: FieldDef) -> FieldId {
        let id = FieldId(self.fields.len());
        self.fields.push(Field {
            id,
            owner,
            name: def.name,
            kind: def.kind,
        });
        self.sources[owner.0].fields.push(id);
        id
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up a source by name.
    pub fn get_source(&self, name: &str) -> ModelResult<&Source> {
        self.source_id(name)
            .map(|id| &self.sources[id.0])
            .ok_or_else(|| ModelError::UnknownSource(name.to_string()))
    }

    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.source_index.get(name).copied()
    }

    /// Get a source by id.
    ///
    /// Ids are only minted by this store, so an id from another store is a
    /// caller bug and panics on out-of-range access.
    pub fn source(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    /// Find a field on a source by name.
    pub fn field_on(&self, source: SourceId, name: &str) -> Option<&Field> {
        self.sources[source.0]
            .fields
            .iter()
            .map(|id| &self.fields[id.0])
            .find(|f| f.name == name)
    }

    /// Fields of a source in insertion order.
    pub fn fields_of(&self, source: SourceId) -> impl Iterator<Item = &Field> {
        self.sources[source.0]
            .fields
            .iter()
            .map(move |id| &self.fields[id.0])
    }

    /// Sources in definition order.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    /// Every join field in the model, in field-creation order.
    pub fn join_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_join())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Monotonic counter of successful mutations.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Qualified name of a field, `source.field`.
    pub fn qualified_name(&self, field: FieldId) -> String {
        let field = self.field(field);
        format!("{}.{}", self.source(field.owner).name, field.name)
    }

    /// Target source of a join field, if it currently resolves.
    pub fn join_target(&self, field: FieldId) -> Option<SourceId> {
        match &self.field(field).kind {
            FieldKind::Join(join) => self.source_id(&join.target),
            _ => None,
        }
    }
}
