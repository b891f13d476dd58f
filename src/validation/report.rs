//! The pass/fail report produced by comparing a candidate table with an answer table.
use crate::store::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableSide {
    Candidate,
    Answer,
}

impl fmt::Display for TableSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSide::Candidate => write!(f, "candidate"),
            TableSide::Answer => write!(f, "answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    pub entity: String,
    pub primary_key: String,
    pub field: String,
    pub expected: Value,
    pub actual: Value,
}

/// A primary key present in one table but not the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingRecord {
    pub entity: String,
    pub primary_key: String,
    pub missing_from: TableSide,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub pass_count: usize,
    pub fail_count: usize,
    pub mismatches: Vec<Mismatch>,
    pub missing_records: Vec<MissingRecord>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.fail_count == 0
    }

    pub fn total(&self) -> usize {
        self.pass_count + self.fail_count
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} passed, {} failed", self.pass_count, self.fail_count)?;
        for m in &self.mismatches {
            writeln!(f, "  {}[{}].{}: expected {}, got {}", m.entity, m.primary_key, m.field, m.expected, m.actual)?;
        }
        for r in &self.missing_records {
            writeln!(f, "  {}[{}]: missing from the {} table", r.entity, r.primary_key, r.missing_from)?;
        }
        Ok(())
    }
}
