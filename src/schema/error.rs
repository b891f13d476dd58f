//! Defines the error types for schema checking.
use crate::formula::ParseError;
use thiserror::Error;

/// A structural or formula problem found while compiling a schema.
///
/// The checker collects every error it can find before giving up, like a
/// linter, so one bad field does not hide the rest.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("duplicate entity '{0}'")]
    DuplicateEntity(String),
    #[error("entity '{0}' declares no fields")]
    EmptyEntity(String),
    #[error("duplicate field '{entity}.{field}'")]
    DuplicateField { entity: String, field: String },
    #[error("entity '{0}' has no primary key")]
    MissingPrimaryKey(String),
    #[error("primary key of '{entity}' references unknown field '{field}'")]
    UnknownKeyField { entity: String, field: String },
    #[error("primary key of '{entity}' references non-raw field '{field}'")]
    PrimaryKeyNotRaw { entity: String, field: String },
    #[error("raw field '{entity}.{field}' must not have a formula")]
    RawWithFormula { entity: String, field: String },
    #[error("raw field '{entity}.{field}' must not declare dependencies")]
    RawWithDependencies { entity: String, field: String },
    #[error("{kind} field '{entity}.{field}' has no formula")]
    MissingFormula { entity: String, field: String, kind: &'static str },
    #[error("duplicate relationship '{relationship}' on '{entity}'")]
    DuplicateRelationship { entity: String, relationship: String },
    #[error("relationship '{entity}.{relationship}' targets unknown entity '{target}'")]
    UnknownTarget { entity: String, relationship: String, target: String },
    #[error("relationship '{entity}.{relationship}' declares no join keys")]
    EmptyJoin { entity: String, relationship: String },
    #[error("relationship '{entity}.{relationship}' joins on unknown field '{on}.{field}'")]
    UnknownJoinField { entity: String, relationship: String, on: String, field: String },
    #[error("relationship '{entity}.{relationship}' joins on non-raw field '{on}.{field}'")]
    JoinFieldNotRaw { entity: String, relationship: String, on: String, field: String },
    #[error("formula of '{entity}.{field}' does not parse: {source}")]
    Syntax {
        entity: String,
        field: String,
        #[source]
        source: ParseError,
    },
    #[error("formula of '{entity}.{field}' references unknown field '{reference}'")]
    UnknownReference { entity: String, field: String, reference: String },
    #[error("formula of '{entity}.{field}' uses '{qualifier}', which is not a declared relationship of '{entity}'")]
    UndeclaredRelationship { entity: String, field: String, qualifier: String },
    #[error("formula of '{entity}.{field}': {message}")]
    Formula { entity: String, field: String, message: String },
}

impl SchemaError {
    pub(crate) fn formula(entity: &str, field: &str, message: impl Into<String>) -> Self {
        SchemaError::Formula { entity: entity.into(), field: field.into(), message: message.into() }
    }
}
