//! Comparison of output tables against answer tables.
pub mod error;
pub mod report;
pub mod validator;

// Re-export key types for convenient access
pub use error::ValidationError;
pub use report::{Mismatch, MissingRecord, TableSide, ValidationReport};
pub use validator::{check_shape, validate, values_match, FieldScope, ScopedEntity, ValidationScope};
