//! The lazy engine: resolves each field of each instance on first access,
//! recursing into whatever it reads, and memoizes the result in the ledger.
//!
//! It does not consult the resolved order at all, which makes it an
//! independent check on the eager engine.

use super::index::{JoinIndexes, RowList};
use super::kernel::{self, RowContext};
use super::ledger::{FieldError, Ledger, Slot};
use super::{qualified, Engine, EngineError, Evaluation};
use crate::analysis::ResolvedFieldGraph;
use crate::schema::CompiledSchema;
use crate::store::{Dataset, EntityId, Value};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct LazyEngine;

impl LazyEngine {
    pub const ID: &'static str = "lazy";
}

impl Engine for LazyEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn evaluate(
        &self,
        schema: &CompiledSchema,
        _graph: &ResolvedFieldGraph,
        data: &Dataset,
    ) -> Result<Evaluation, EngineError> {
        let start = Instant::now();
        info!(event = "engine_start", engine = Self::ID, rows = data.row_count());

        let mut session = LazySession::new(schema, data);
        for def in schema.entities() {
            for row in 0..data.table(def.id).len() {
                for field in 0..def.field_count() {
                    // Failures stay in the ledger and are exported from there.
                    let _ = session.resolve(def.id, row, field);
                }
            }
        }
        debug!(event = "lazy_evaluations", count = session.evaluations());

        let elapsed = start.elapsed();
        info!(event = "engine_end", engine = Self::ID, elapsed_ms = elapsed.as_millis() as u64);
        Ok(Evaluation::new(Self::ID, session.into_ledger(), elapsed))
    }
}

/// On-demand point queries against one dataset.
///
/// Each cell is computed at most once; [`evaluations`](Self::evaluations)
/// counts formula evaluations so memoization can be observed.
pub struct LazySession<'a> {
    schema: &'a CompiledSchema,
    data: &'a Dataset,
    indexes: JoinIndexes,
    ledger: Ledger,
    evaluations: usize,
}

impl<'a> LazySession<'a> {
    pub fn new(schema: &'a CompiledSchema, data: &'a Dataset) -> Self {
        Self {
            schema,
            data,
            indexes: JoinIndexes::build(schema, data),
            ledger: Ledger::seed(schema, data),
            evaluations: 0,
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Resolves a field of one instance by entity name, primary key parts (in
    /// key-field order) and field name.
    pub fn get(&mut self, entity: &str, key: &[&str], field: &str) -> Option<Result<Value, FieldError>> {
        let def = self.schema.entity_by_name(entity)?;
        let field = def.field_index(field)?;
        let row =
            self.data.table(def.id).keys.iter().position(|k| k.0.iter().map(String::as_str).eq(key.iter().copied()))?;
        Some(self.resolve(def.id, row, field))
    }

    /// Resolves one cell, computing its dependencies first if needed.
    pub fn resolve(&mut self, entity: EntityId, row: usize, field: usize) -> Result<Value, FieldError> {
        match self.ledger.begin(entity, row, field) {
            Slot::Resolved(v) => return Ok(v),
            Slot::Failed(e) => return Err(e),
            Slot::Resolving => {
                return Err(FieldError::ReentrantEvaluation { field: qualified(self.schema, entity, field).to_string() })
            }
            Slot::Unresolved => {}
        }

        let schema = self.schema;
        let def = schema.entity(entity);
        let settled = match def.formulas[field].as_ref() {
            Some(expr) => {
                self.evaluations += 1;
                let result = kernel::eval(expr, &mut LazyRow { session: self, entity, row });
                Slot::settle(result, def.fields[field].required)
            }
            None => Slot::Failed(FieldError::Unresolved { field: qualified(schema, entity, field).to_string() }),
        };
        self.ledger.fill(entity, row, field, settled.clone());
        match settled {
            Slot::Failed(e) => Err(e),
            Slot::Resolved(v) => Ok(v),
            Slot::Unresolved | Slot::Resolving => Err(FieldError::Unresolved {
                field: qualified(schema, entity, field).to_string(),
            }),
        }
    }

    /// Resolves a cell read by another field; failures are reported as upstream.
    fn read(&mut self, entity: EntityId, row: usize, field: usize) -> Result<Value, FieldError> {
        self.resolve(entity, row, field)
            .map_err(|e| FieldError::upstream(qualified(self.schema, entity, field), &e))
    }
}

struct LazyRow<'s, 'a> {
    session: &'s mut LazySession<'a>,
    entity: EntityId,
    row: usize,
}

impl RowContext for LazyRow<'_, '_> {
    fn local(&mut self, field: usize) -> Result<Value, FieldError> {
        self.session.read(self.entity, self.row, field)
    }

    fn parent(&mut self, rel: usize, field: usize) -> Result<Value, FieldError> {
        let s = &mut *self.session;
        let def = s.schema.entity(self.entity);
        let parent = s.indexes.parent_row(s.schema, s.data, def, self.row, rel)?;
        s.read(def.relationships[rel].target, parent, field)
    }

    fn children(&mut self, rel: usize) -> Result<RowList, FieldError> {
        let s = &*self.session;
        Ok(s.indexes.child_rows(s.data, s.schema.entity(self.entity), self.row, rel))
    }

    fn child(&mut self, rel: usize, row: usize, field: usize) -> Result<Value, FieldError> {
        let target = self.session.schema.entity(self.entity).relationships[rel].target;
        self.session.read(target, row, field)
    }
}
