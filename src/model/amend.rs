//! Post-load amendments to the model graph.
//!
//! Amendments are how cyclic join graphs are built: sources are declared
//! first, then join fields pointing in either direction are appended. Each
//! amendment is checked structurally (owner exists, field name is free) but
//! never referentially; a join target is only looked up when a path walks it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ModelError, ModelResult};
use super::store::ModelStore;
use super::types::{Cardinality, FieldDef, FieldId, OnExpr, SourceId};

/// A typed edit to an already-defined source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Amendment {
    /// Append a field (of any kind) to `owner`'s field sequence.
    AddField { owner: String, field: FieldDef },
}

impl Amendment {
    pub fn add_join(
        owner: impl Into<String>,
        field_name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        on: OnExpr,
    ) -> Self {
        Amendment::AddField {
            owner: owner.into(),
            field: FieldDef::join(field_name, target, cardinality, on),
        }
    }
}

impl ModelStore {
    /// Append a join field to `owner`.
    ///
    /// The target source is not required to exist.
    pub fn add_join_field(
        &mut self,
        owner: &str,
        field_name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        on: OnExpr,
    ) -> ModelResult<FieldId> {
        self.add_field(owner, FieldDef::join(field_name, target, cardinality, on))
    }

    /// Append any field to `owner`.
    pub fn add_field(&mut self, owner: &str, field: FieldDef) -> ModelResult<FieldId> {
        let owner_id = self.check_amendment(owner, &field.name, &HashSet::new())?;
        let name = field.name.clone();
        let id = self.push_field(owner_id, field);
        self.bump_revision();
        debug!(owner = %owner, field = %name, "amended source");
        Ok(id)
    }

    /// Apply a batch of amendments atomically.
    ///
    /// Every amendment is validated against the store and the amendments that
    /// precede it in the batch before anything is written, so a failing batch
    /// leaves the store untouched.
    pub fn apply(&mut self, amendments: Vec<Amendment>) -> ModelResult<Vec<FieldId>> {
        let mut pending: HashSet<(SourceId, String)> = HashSet::new();
        let mut validated = Vec::with_capacity(amendments.len());

        for amendment in amendments {
            match amendment {
                Amendment::AddField { owner, field } => {
                    let owner_id = self.check_amendment(&owner, &field.name, &pending)?;
                    pending.insert((owner_id, field.name.clone()));
                    validated.push((owner_id, field));
                }
            }
        }

        let ids = validated
            .into_iter()
            .map(|(owner, field)| {
                debug!(owner = %self.source(owner).name, field = %field.name, "amended source");
                self.push_field(owner, field)
            })
            .collect::<Vec<_>>();
        if !ids.is_empty() {
            self.bump_revision();
        }
        Ok(ids)
    }

    fn check_amendment(
        &self,
        owner: &str,
        field_name: &str,
        pending: &HashSet<(SourceId, String)>,
    ) -> ModelResult<SourceId> {
        let owner_id = self
            .source_id(owner)
            .ok_or_else(|| ModelError::UnknownSource(owner.to_string()))?;

        let taken = self.field_on(owner_id, field_name).is_some()
            || pending.contains(&(owner_id, field_name.to_string()));
        if taken {
            return Err(ModelError::DuplicateField {
                source_name: owner.to_string(),
                field: field_name.to_string(),
            });
        }

        Ok(owner_id)
    }
}
