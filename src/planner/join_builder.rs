//! Join set assembly: deduplication and on-expression binding.
//!
//! A join's identity is the chain of join fields that reaches it from the
//! root. Two requested paths that share a prefix share the joins of that
//! prefix; the same join field reached through different prefixes yields
//! distinct joins, because it joins a distinct relation instance.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{FieldId, FieldKind, ModelStore, OnExpr, Path};

use super::plan::{BoundOn, ColumnRef, PlannedJoin, RelationRef};
use super::{CompileError, CompileResult};

pub struct JoinBuilder<'a> {
    store: &'a ModelStore,
    joins: Vec<PlannedJoin>,
    /// Index: join-field chain from the root → position in `joins`
    index: HashMap<Vec<FieldId>, usize>,
}

impl<'a> JoinBuilder<'a> {
    pub fn new(store: &'a ModelStore) -> Self {
        Self {
            store,
            joins: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The join already planned for this chain, if any.
    pub fn lookup(&self, chain: &[FieldId]) -> Option<RelationRef> {
        self.index.get(chain).map(|idx| RelationRef::Join(*idx))
    }

    /// Plan the join for the last field of `chain`, hanging off `parent`.
    ///
    /// The join's target must already be known to resolve; callers obtain
    /// `chain` from the path resolver.
    pub fn push(
        &mut self,
        chain: &[FieldId],
        parent: RelationRef,
        sub_plan: Option<usize>,
    ) -> CompileResult<RelationRef> {
        if let Some(existing) = self.lookup(chain) {
            return Ok(existing);
        }

        let field_id = *chain
            .last()
            .ok_or_else(|| CompileError::Internal("empty join chain".into()))?;
        let field = self.store.field(field_id);
        let FieldKind::Join(join) = &field.kind else {
            return Err(CompileError::Internal(format!(
                "'{}' is not a join",
                self.store.qualified_name(field_id)
            )));
        };

        let position = self.joins.len();
        let relation = RelationRef::Join(position);
        let on = self.bind(field_id, &join.on, parent, relation)?;

        let alias = chain
            .iter()
            .map(|id| self.store.field(*id).name.as_str())
            .collect::<Vec<_>>()
            .join(".");

        debug!(
            alias = %alias,
            target = %join.target,
            cardinality = %join.cardinality,
            "planned join"
        );

        self.joins.push(PlannedJoin {
            alias,
            parent,
            field: field_id,
            owner: self.store.source(field.owner).name.clone(),
            name: field.name.clone(),
            target: join.target.clone(),
            cardinality: join.cardinality,
            on,
            sub_plan,
        });
        self.index.insert(chain.to_vec(), position);
        Ok(relation)
    }

    pub fn finish(self) -> Vec<PlannedJoin> {
        self.joins
    }

    /// Bind an on-expression: `[field]` refers to the owner side (`parent`),
    /// `[join_name, field]` to the join's own relation.
    fn bind(
        &self,
        join_field: FieldId,
        on: &OnExpr,
        parent: RelationRef,
        relation: RelationRef,
    ) -> CompileResult<BoundOn> {
        match on {
            OnExpr::Eq { left, right } => Ok(BoundOn::Eq {
                left: self.bind_ref(join_field, left, parent, relation)?,
                right: self.bind_ref(join_field, right, parent, relation)?,
            }),
            OnExpr::And { kids } => kids
                .iter()
                .map(|kid| self.bind(join_field, kid, parent, relation))
                .collect::<CompileResult<Vec<_>>>()
                .map(BoundOn::And),
        }
    }

    fn bind_ref(
        &self,
        join_field: FieldId,
        reference: &Path,
        parent: RelationRef,
        relation: RelationRef,
    ) -> CompileResult<ColumnRef> {
        let field = self.store.field(join_field);
        let invalid = |reason: String| CompileError::InvalidOnExpression {
            join: self.store.qualified_name(join_field),
            reference: reference.to_string(),
            reason,
        };

        let (side, side_relation, name) = match reference.segments() {
            [name] => (field.owner, parent, name),
            [join_name, name] if *join_name == field.name => {
                let target = self
                    .store
                    .join_target(join_field)
                    .ok_or_else(|| invalid("join target is not defined".into()))?;
                (target, relation, name)
            }
            _ => {
                return Err(invalid(format!(
                    "expected 'field' or '{}.field'",
                    field.name
                )))
            }
        };

        match self.store.field_on(side, name) {
            Some(f) if matches!(f.kind, FieldKind::Scalar) => {
                Ok(ColumnRef::new(side_relation, name.clone()))
            }
            Some(f) => Err(invalid(format!("'{}' is a {} field", name, f.kind_name()))),
            None => Err(invalid(format!(
                "no field '{}' on '{}'",
                name,
                self.store.source(side).name
            ))),
        }
    }
}
