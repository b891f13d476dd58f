//! Executes a compiled schema against raw facts.
//!
//! Every engine implements [`Engine`]; they share the expression [`kernel`],
//! the [`JoinIndexes`] and the write-once [`Ledger`], and differ only in
//! evaluation strategy.
pub mod engine;
pub mod index;
pub mod kernel;
pub mod lazy;
pub mod ledger;

pub use engine::EagerEngine;
pub use index::JoinIndexes;
pub use lazy::{LazyEngine, LazySession};
pub use ledger::{FieldError, Ledger, Slot};

use crate::analysis::ResolvedFieldGraph;
use crate::output::OutputTable;
use crate::schema::CompiledSchema;
use crate::store::{Dataset, EntityId, Value};
use std::time::Duration;
use thiserror::Error;

/// Ids of the engines this crate ships.
pub const ENGINE_IDS: [&str; 2] = [EagerEngine::ID, LazyEngine::ID];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown engine '{0}' (expected one of: eager, lazy)")]
    Unknown(String),
    #[error("engine '{engine}' failed: {message}")]
    Failed { engine: String, message: String },
}

/// A conforming evaluation engine: same schema and facts in, same table out.
pub trait Engine: Send + Sync {
    fn id(&self) -> &str;

    fn evaluate(
        &self,
        schema: &CompiledSchema,
        graph: &ResolvedFieldGraph,
        data: &Dataset,
    ) -> Result<Evaluation, EngineError>;
}

/// Builds one of the shipped engines by id.
pub fn engine_by_id(id: &str, parallel: bool) -> Result<Box<dyn Engine>, EngineError> {
    match id {
        EagerEngine::ID => Ok(Box::new(EagerEngine::new().parallel(parallel))),
        LazyEngine::ID => Ok(Box::new(LazyEngine)),
        other => Err(EngineError::Unknown(other.to_string())),
    }
}

/// The settled ledger of one engine run.
#[derive(Debug, Clone)]
pub struct Evaluation {
    engine_id: String,
    ledger: Ledger,
    elapsed: Duration,
}

impl Evaluation {
    pub fn new(engine_id: &str, ledger: Ledger, elapsed: Duration) -> Self {
        Self { engine_id: engine_id.to_string(), ledger, elapsed }
    }

    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn slot(&self, entity: EntityId, row: usize, field: usize) -> &Slot {
        self.ledger.get(entity, row, field)
    }

    /// The resolved value of a cell; `None` if the cell failed.
    pub fn value(&self, entity: EntityId, row: usize, field: usize) -> Option<&Value> {
        match self.ledger.get(entity, row, field) {
            Slot::Resolved(v) => Some(v),
            _ => None,
        }
    }

    /// Exports the run as an output table rounded to `precision` decimals.
    pub fn export(&self, schema: &CompiledSchema, data: &Dataset, precision: u32) -> OutputTable {
        crate::output::export(self, schema, data, precision)
    }
}

/// Reads a settled cell on behalf of a dependent field.
pub(crate) fn read_settled(schema: &CompiledSchema, entity: EntityId, field: usize, slot: &Slot) -> Result<Value, FieldError> {
    match slot {
        Slot::Resolved(v) => Ok(v.clone()),
        Slot::Failed(e) => Err(FieldError::upstream(qualified(schema, entity, field), e)),
        Slot::Unresolved | Slot::Resolving => {
            Err(FieldError::Unresolved { field: qualified(schema, entity, field).to_string() })
        }
    }
}

pub(crate) fn qualified(schema: &CompiledSchema, entity: EntityId, field: usize) -> &str {
    schema.registry().name(schema.slot(entity, field))
}
