//! Per-instance computed-field storage. Every (entity, row, field) cell is a
//! small state machine that is written once and then only read.

use crate::schema::CompiledSchema;
use crate::store::{Dataset, EntityId, FieldKind, Value};

pub use self::error::FieldError;
mod error {
    use thiserror::Error;

    /// Why one field of one instance has no value.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum FieldError {
        #[error("no row of '{target}' matches key {key} through '{relationship}'")]
        MissingParent { relationship: String, target: String, key: String },
        #[error("{count} rows of '{target}' share key {key} through '{relationship}'")]
        AmbiguousParent { relationship: String, target: String, key: String, count: usize },
        #[error("division by zero")]
        DivisionByZero,
        #[error("{function} is undefined for {argument}")]
        Domain { function: &'static str, argument: f64 },
        #[error("result is not a finite number")]
        NonFinite,
        #[error("'{operation}' cannot be applied to {found}")]
        TypeMismatch { operation: String, found: String },
        #[error("upstream field '{field}' failed: {source}")]
        Upstream {
            field: String,
            #[source]
            source: Box<FieldError>,
        },
        #[error("re-entrant evaluation of '{field}'")]
        ReentrantEvaluation { field: String },
        #[error("'{field}' was read before it was resolved")]
        Unresolved { field: String },
        #[error("required field resolved to null: {cause}")]
        RequiredNull { cause: Box<FieldError> },
    }

    impl FieldError {
        /// Arithmetic errors resolve to null instead of failing the field.
        pub fn is_recoverable(&self) -> bool {
            matches!(self, FieldError::DivisionByZero | FieldError::Domain { .. } | FieldError::NonFinite)
        }

        pub(crate) fn upstream(field: &str, source: &FieldError) -> Self {
            FieldError::Upstream { field: field.to_string(), source: Box::new(source.clone()) }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    #[default]
    Unresolved,
    /// Being computed; seen again only through a cycle.
    Resolving,
    Resolved(Value),
    Failed(FieldError),
}

impl Slot {
    pub fn is_settled(&self) -> bool {
        matches!(self, Slot::Resolved(_) | Slot::Failed(_))
    }

    /// Converts a kernel result into a settled slot. Recoverable errors become
    /// null unless the field is required.
    pub fn settle(result: Result<Value, FieldError>, required: bool) -> Self {
        match result {
            Ok(v) => Slot::Resolved(v),
            Err(e) if e.is_recoverable() && !required => Slot::Resolved(Value::Null),
            Err(e) if e.is_recoverable() => Slot::Failed(FieldError::RequiredNull { cause: Box::new(e) }),
            Err(e) => Slot::Failed(e),
        }
    }
}

/// Row-major slots of one entity table.
#[derive(Debug, Clone, Default)]
struct TableSlots {
    fields: usize,
    slots: Vec<Slot>,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    tables: Vec<TableSlots>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    /// Seeds raw cells from the dataset; every computed cell starts unresolved.
    pub fn seed(schema: &CompiledSchema, data: &Dataset) -> Self {
        let tables = schema
            .entities()
            .iter()
            .map(|def| {
                let fields = def.field_count();
                let rows = &data.table(def.id).rows;
                let mut slots = Vec::with_capacity(rows.len() * fields);
                for row in rows {
                    for (f, value) in row.iter().enumerate() {
                        slots.push(match def.kind(f) {
                            FieldKind::Raw => Slot::Resolved(value.clone()),
                            _ => Slot::Unresolved,
                        });
                    }
                }
                TableSlots { fields, slots }
            })
            .collect();
        Self { tables }
    }

    #[inline(always)]
    pub fn get(&self, entity: EntityId, row: usize, field: usize) -> &Slot {
        let t = &self.tables[entity.index()];
        &t.slots[row * t.fields + field]
    }

    /// Marks a cell as in progress. Returns the previous state.
    pub fn begin(&mut self, entity: EntityId, row: usize, field: usize) -> Slot {
        let t = &mut self.tables[entity.index()];
        let cell = &mut t.slots[row * t.fields + field];
        if matches!(cell, Slot::Unresolved) {
            *cell = Slot::Resolving;
            return Slot::Unresolved;
        }
        cell.clone()
    }

    /// Writes a settled value. Settled cells are never overwritten.
    #[inline(always)]
    pub fn fill(&mut self, entity: EntityId, row: usize, field: usize, slot: Slot) {
        let t = &mut self.tables[entity.index()];
        let cell = &mut t.slots[row * t.fields + field];
        debug_assert!(!cell.is_settled(), "ledger cell written twice");
        if !cell.is_settled() {
            *cell = slot;
        }
    }

    pub fn rows(&self, entity: EntityId) -> usize {
        let t = &self.tables[entity.index()];
        if t.fields == 0 { 0 } else { t.slots.len() / t.fields }
    }
}
