//! Raw facts: loading records from JSON and binding them to a compiled schema.
//!
//! A [`Dataset`] owns one row table per entity for the lifetime of a run.
//! Raw cells are filled from the input; computed cells start as `Null` and
//! are owned by the engines' ledgers, never written back here.

use super::types::{EntityId, FieldKind};
use super::value::Value;
use crate::schema::{CompiledSchema, EntityDef};
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// One input or output record: field name to value.
pub type Record = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum FactsError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {0} to be a JSON object")]
    NotAnObject(String),
    #[error("expected table '{0}' to be a JSON array of records")]
    NotATable(String),
    #[error("field '{entity}.{field}' holds a nested value; only scalars are allowed")]
    NotAScalar { entity: String, field: String },
    #[error("record {row} of '{entity}' has no value for primary key field '{field}'")]
    MissingPrimaryKey { entity: String, row: usize, field: String },
    #[error("duplicate primary key '{key}' in '{entity}'")]
    DuplicatePrimaryKey { entity: String, key: PrimaryKey },
}

/// A rendered primary key. Composite keys display as their parts joined by `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey(pub SmallVec<[String; 2]>);

impl PrimaryKey {
    /// Builds the key of a record from the values of its key fields.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        PrimaryKey(values.into_iter().map(Value::key_text).collect())
    }

    /// Reads the key fields out of a record; `None` if any part is missing or null.
    pub fn from_record(record: &Record, fields: &[String]) -> Option<Self> {
        let mut parts = SmallVec::with_capacity(fields.len());
        for f in fields {
            match record.get(f) {
                None | Some(Value::Null) => return None,
                Some(v) => parts.push(v.key_text()),
            }
        }
        Some(PrimaryKey(parts))
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

impl Serialize for PrimaryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Raw input records per entity name, in load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFacts {
    pub tables: BTreeMap<String, Vec<Record>>,
}

impl RawFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, entity: &str, records: Vec<Record>) -> Self {
        self.tables.insert(entity.to_string(), records);
        self
    }

    /// Parses either `{"entities": {...}}` or the flat layout where every
    /// array-valued top-level key is an entity table.
    pub fn from_json_str(s: &str) -> Result<Self, FactsError> {
        let doc: serde_json::Value = serde_json::from_str(s)?;
        Ok(Self { tables: split_tables(&doc)? })
    }

    pub fn from_path(path: &Path) -> Result<Self, FactsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| FactsError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }
}

/// Extracts entity tables from a facts or table document.
pub(crate) fn split_tables(doc: &serde_json::Value) -> Result<BTreeMap<String, Vec<Record>>, FactsError> {
    let root = doc.as_object().ok_or_else(|| FactsError::NotAnObject("the document".into()))?;

    let mut tables = BTreeMap::new();
    match root.get("entities") {
        Some(entities) => {
            let entities = entities.as_object().ok_or_else(|| FactsError::NotAnObject("'entities'".into()))?;
            for (name, table) in entities {
                tables.insert(name.clone(), read_table(name, table)?);
            }
        }
        None => {
            for (name, table) in root {
                if table.is_array() {
                    tables.insert(name.clone(), read_table(name, table)?);
                }
            }
        }
    }
    Ok(tables)
}

fn read_table(entity: &str, table: &serde_json::Value) -> Result<Vec<Record>, FactsError> {
    let rows = table.as_array().ok_or_else(|| FactsError::NotATable(entity.into()))?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let obj = row.as_object().ok_or_else(|| FactsError::NotAnObject(format!("record {} of '{}'", i, entity)))?;
            obj.iter()
                .map(|(field, v)| {
                    let value = scalar(v).ok_or_else(|| FactsError::NotAScalar {
                        entity: entity.into(),
                        field: field.clone(),
                    })?;
                    Ok((field.clone(), value))
                })
                .collect()
        })
        .collect()
}

fn scalar(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
        serde_json::Value::String(s) => Some(Value::Text(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

/// Rows of one entity, dense by field declaration index.
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    pub entity: EntityId,
    pub rows: Vec<Vec<Value>>,
    pub keys: Vec<PrimaryKey>,
}

impl FactTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Raw facts bound to a compiled schema. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: Vec<FactTable>,
}

impl Dataset {
    pub fn bind(schema: &CompiledSchema, raw: &RawFacts) -> Result<Self, FactsError> {
        for name in raw.tables.keys() {
            if schema.entity_by_name(name).is_none() {
                warn!(event = "unknown_entity_dropped", entity = %name, "facts table has no matching entity");
            }
        }

        let tables = schema
            .entities()
            .iter()
            .map(|def| {
                let records = raw.tables.get(&def.name).map(Vec::as_slice).unwrap_or_default();
                bind_table(def, records)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    #[inline(always)]
    pub fn table(&self, entity: EntityId) -> &FactTable {
        &self.tables[entity.index()]
    }

    pub fn tables(&self) -> &[FactTable] {
        &self.tables
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(FactTable::len).sum()
    }
}

fn bind_table(def: &EntityDef, records: &[Record]) -> Result<FactTable, FactsError> {
    let mut dropped: HashSet<&str> = HashSet::new();
    let mut seen = HashSet::with_capacity(records.len());
    let mut table = FactTable { entity: def.id, rows: Vec::with_capacity(records.len()), keys: Vec::with_capacity(records.len()) };

    for (row_idx, record) in records.iter().enumerate() {
        let mut row = vec![Value::Null; def.field_count()];
        for (name, value) in record {
            match def.field_index(name) {
                Some(i) if def.kind(i) == FieldKind::Raw => row[i] = value.clone(),
                _ => {
                    dropped.insert(name);
                }
            }
        }

        for &k in &def.primary_key {
            if row[k].is_null() {
                return Err(FactsError::MissingPrimaryKey {
                    entity: def.name.clone(),
                    row: row_idx,
                    field: def.fields[k].name.clone(),
                });
            }
        }
        let key = PrimaryKey::from_values(def.primary_key.iter().map(|&k| &row[k]));
        if !seen.insert(key.clone()) {
            return Err(FactsError::DuplicatePrimaryKey { entity: def.name.clone(), key });
        }

        table.rows.push(row);
        table.keys.push(key);
    }

    if !dropped.is_empty() {
        let mut fields: Vec<&str> = dropped.into_iter().collect();
        fields.sort_unstable();
        warn!(
            event = "input_fields_dropped",
            entity = %def.name,
            fields = ?fields,
            "input records carry fields that are not raw fields of the entity"
        );
    }
    debug!(event = "facts_bound", entity = %def.name, rows = table.len());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::store::{DataType, EntityType, FieldSpec, Schema};
    use rstest::rstest;

    fn schema() -> CompiledSchema {
        compile(&Schema::new(vec![EntityType::new("scales", &["System", "Iteration"])
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::raw("Iteration", DataType::Integer))
            .field(FieldSpec::raw("Measure", DataType::Number))
            .field(FieldSpec::calculated("Double", "Measure * 2"))]))
        .unwrap()
    }

    #[rstest]
    #[case::wrapped(r#"{"entities": {"scales": [{"System": "Koch", "Iteration": 1}]}}"#)]
    #[case::flat(r#"{"description": "rulebook", "scales": [{"System": "Koch", "Iteration": 1}]}"#)]
    fn test_both_layouts(#[case] doc: &str) {
        let raw = RawFacts::from_json_str(doc).unwrap();
        assert_eq!(raw.tables.len(), 1);
        assert_eq!(raw.tables["scales"][0]["System"], Value::from("Koch"));
    }

    #[test]
    fn test_bind_drops_computed_and_unknown_fields() {
        let raw = RawFacts::from_json_str(
            r#"{"scales": [{"System": "Koch", "Iteration": 2, "Double": 99, "Color": "red"}]}"#,
        )
        .unwrap();
        let data = Dataset::bind(&schema(), &raw).unwrap();
        let table = data.table(EntityId(0));
        assert_eq!(table.rows[0], vec![Value::from("Koch"), Value::Number(2.0), Value::Null, Value::Null]);
        assert_eq!(table.keys[0].to_string(), "Koch|2");
    }

    #[rstest]
    #[case::missing(r#"{"scales": [{"System": "Koch"}]}"#, "no value for primary key field 'Iteration'")]
    #[case::null(r#"{"scales": [{"System": null, "Iteration": 0}]}"#, "no value for primary key field 'System'")]
    #[case::duplicate(
        r#"{"scales": [{"System": "Koch", "Iteration": 1}, {"System": "Koch", "Iteration": 1.0}]}"#,
        "duplicate primary key 'Koch|1'"
    )]
    fn test_primary_key_errors(#[case] doc: &str, #[case] message: &str) {
        let raw = RawFacts::from_json_str(doc).unwrap();
        let err = Dataset::bind(&schema(), &raw).unwrap_err();
        assert!(err.to_string().contains(message), "{}", err);
    }

    #[test]
    fn test_nested_values_are_rejected() {
        let err = RawFacts::from_json_str(r#"{"scales": [{"System": ["Koch"]}]}"#).unwrap_err();
        assert!(matches!(err, FactsError::NotAScalar { .. }));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"scales": []}"#).unwrap();
        let raw = RawFacts::from_path(file.path()).unwrap();
        assert!(raw.tables["scales"].is_empty());
    }
}
