//! Schema compilation: the static analysis pass that runs before any evaluation.
//!
//! [`compile`] checks a [`Schema`](crate::store::Schema) for structural
//! problems, parses and binds every formula, derives each field's
//! dependencies and lays them out in a [`FieldRegistry`]. A schema that
//! compiles is guaranteed to only reference declared fields through declared
//! relationships; cycles are left to the resolver.

pub use self::checker::compile;
pub use self::error::SchemaError;

mod binder;
mod checker;
mod error;

use crate::formula::BoundExpr;
use crate::store::{Ambiguity, EntityId, FieldKind, FieldRegistry, FieldSpec, RelationshipKind, SlotId};
use std::collections::HashMap;

/// A relationship with its target and join keys resolved to indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundRelationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: EntityId,
    /// Join key fields on the declaring entity.
    pub local_keys: Vec<usize>,
    /// Join key fields on the target entity, pairwise with `local_keys`.
    pub remote_keys: Vec<usize>,
    pub on_ambiguous: Ambiguity,
}

#[derive(Debug, Clone)]
pub struct EntityDef {
    pub id: EntityId,
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub primary_key: Vec<usize>,
    pub relationships: Vec<BoundRelationship>,
    /// Bound formula per field; `None` for raw fields.
    pub formulas: Vec<Option<BoundExpr>>,
    field_index: HashMap<String, usize>,
}

impl EntityDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn kind(&self, field: usize) -> FieldKind {
        self.fields[field].kind
    }

    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key.iter().map(|&i| self.fields[i].name.clone()).collect()
    }
}

/// An immutable, fully bound schema. Loaded once per run.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub model_name: Option<String>,
    entities: Vec<EntityDef>,
    registry: FieldRegistry,
    by_name: HashMap<String, EntityId>,
}

impl CompiledSchema {
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> &EntityDef {
        &self.entities[id.index()]
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.by_name.get(name).map(|id| &self.entities[id.index()])
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn slot(&self, entity: EntityId, field: usize) -> SlotId {
        self.registry.slot(entity, field)
    }

    /// Looks up the slot for `entity.field` by name.
    pub fn slot_by_name(&self, entity: &str, field: &str) -> Option<SlotId> {
        let def = self.entity_by_name(entity)?;
        Some(self.slot(def.id, def.field_index(field)?))
    }
}
