//! The dynamically typed cell value shared by facts, the ledger and exports.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Integral numbers below this magnitude serialize as JSON integers.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// The atomic unit of data in the engine.
///
/// Read untagged so that records are plain JSON objects. Integral numbers are
/// written back as JSON integers.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
        }
    }

    /// Converts to the hashable form used by join indexes. `Null` never joins.
    pub fn key_atom(&self) -> Option<KeyAtom> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(KeyAtom::Bool(*b)),
            // Normalize -0.0 so that it joins with 0.0.
            Value::Number(n) => Some(KeyAtom::Number(if *n == 0.0 { 0.0f64.to_bits() } else { n.to_bits() })),
            Value::Text(s) => Some(KeyAtom::Text(s.clone())),
        }
    }

    /// Renders the value as it appears inside a composite primary key.
    pub fn key_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => serializer.serialize_i64(*n as i64),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

/// A hashable projection of a non-null `Value`, used as a join key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyAtom {
    Bool(bool),
    Number(u64),
    Text(String),
}
