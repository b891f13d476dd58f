//! Defines the error types for the validation module.
use super::report::TableSide;
use thiserror::Error;

/// A structural problem that prevents two tables from being compared.
///
/// Data mismatches are never errors; they are reported in the
/// [`ValidationReport`](super::ValidationReport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("the {side} table has no '{entity}' entity")]
    MissingTable { entity: String, side: TableSide },
    #[error("record {row} of '{entity}' in the {side} table has no value for primary key field '{field}'")]
    MissingPrimaryKey { entity: String, row: usize, field: String, side: TableSide },
    #[error("duplicate primary key '{key}' in '{entity}' of the {side} table")]
    DuplicatePrimaryKey { entity: String, key: String, side: TableSide },
    #[error("record '{key}' of '{entity}' has no field '{field}'")]
    MissingField { entity: String, key: String, field: String },
}

impl ValidationError {
    /// The table at fault, when the error is tied to one side.
    pub fn side(&self) -> Option<TableSide> {
        match self {
            ValidationError::MissingTable { side, .. }
            | ValidationError::MissingPrimaryKey { side, .. }
            | ValidationError::DuplicatePrimaryKey { side, .. } => Some(*side),
            ValidationError::MissingField { .. } => None,
        }
    }
}
