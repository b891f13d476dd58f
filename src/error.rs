//! The crate-level error, wrapping the error of each stage of a run.

use crate::analysis::CycleError;
use crate::compute::EngineError;
use crate::config::ConfigError;
use crate::schema::SchemaError;
use crate::store::FactsError;
use crate::validation::ValidationError;
use std::fmt::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulebookError {
    #[error("schema document is not valid JSON: {0}")]
    SchemaJson(#[from] serde_json::Error),
    #[error("{}", list_schema_errors(.0))]
    Schema(Vec<SchemaError>),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Facts(#[from] FactsError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Vec<SchemaError>> for RulebookError {
    fn from(errors: Vec<SchemaError>) -> Self {
        RulebookError::Schema(errors)
    }
}

fn list_schema_errors(errors: &[SchemaError]) -> String {
    let mut out = format!("schema has {} error(s):", errors.len());
    for e in errors {
        let _ = write!(out, "\n  - {}", e);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_are_listed() {
        let err = RulebookError::from(vec![
            SchemaError::EmptyEntity("a".into()),
            SchemaError::MissingPrimaryKey("b".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "schema has 2 error(s):\n  - entity 'a' declares no fields\n  - entity 'b' has no primary key"
        );
    }
}
