//! The externally visible result of a run, and the answer tables it is
//! compared against.

use crate::compute::kernel::round_half_away;
use crate::compute::{Evaluation, Slot};
use crate::schema::CompiledSchema;
use crate::store::facts::split_tables;
use crate::store::{Dataset, FactsError, Record, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One field of one instance that has no value, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFailure {
    pub entity: String,
    pub primary_key: String,
    pub field: String,
    pub error: String,
}

/// Every field of every instance, per entity, plus run metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTable {
    #[serde(default)]
    pub engine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub entities: BTreeMap<String, Vec<Record>>,
    #[serde(default)]
    pub failures: Vec<FieldFailure>,
}

impl OutputTable {
    /// Reads an output or answer table. Documents without an `entities` key
    /// are read in the flat layout, every array-valued key being a table.
    pub fn from_json_str(s: &str) -> Result<Self, FactsError> {
        let doc: serde_json::Value = serde_json::from_str(s)?;
        if doc.get("entities").is_some() {
            return Ok(serde_json::from_value(doc)?);
        }
        let engine_id = doc.get("engineId").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(Self { engine_id, timestamp: None, entities: split_tables(&doc)?, failures: Vec::new() })
    }

    pub fn from_path(path: &Path) -> Result<Self, FactsError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| FactsError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn records(&self, entity: &str) -> Option<&[Record]> {
        self.entities.get(entity).map(Vec::as_slice)
    }

    pub fn record_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }
}

/// Rounds numbers for export. Internal values keep full precision.
pub fn export_value(value: &Value, precision: u32) -> Value {
    match value {
        Value::Number(n) => Value::Number(round_half_away(*n, precision as i32)),
        other => other.clone(),
    }
}

pub(crate) fn export(eval: &Evaluation, schema: &CompiledSchema, data: &Dataset, precision: u32) -> OutputTable {
    let mut entities = BTreeMap::new();
    let mut failures = Vec::new();

    for def in schema.entities() {
        let table = data.table(def.id);
        let mut records = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let mut record = Record::new();
            for (f, spec) in def.fields.iter().enumerate() {
                let value = match eval.slot(def.id, row, f) {
                    Slot::Resolved(v) => export_value(v, precision),
                    failed => {
                        let error = match failed {
                            Slot::Failed(e) => e.to_string(),
                            _ => "field was never resolved".to_string(),
                        };
                        failures.push(FieldFailure {
                            entity: def.name.clone(),
                            primary_key: table.keys[row].to_string(),
                            field: spec.name.clone(),
                            error,
                        });
                        Value::Null
                    }
                };
                record.insert(spec.name.clone(), value);
            }
            records.push(record);
        }
        entities.insert(def.name.clone(), records);
    }

    OutputTable { engine_id: eval.engine_id().to_string(), timestamp: Some(Utc::now()), entities, failures }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::resolve;
    use crate::compute::{EagerEngine, Engine};
    use crate::schema::compile;
    use crate::store::{DataType, EntityType, FieldSpec, RawFacts, Schema};
    use rstest::rstest;

    #[rstest]
    #[case(Value::Number(-1.2041199826559248), 5, Value::Number(-1.20412))]
    #[case(Value::Number(0.125), 2, Value::Number(0.13))]
    #[case(Value::Number(2.5), 0, Value::Number(3.0))]
    #[case(Value::Text("Koch".into()), 6, Value::Text("Koch".into()))]
    #[case(Value::Null, 6, Value::Null)]
    fn test_export_value(#[case] input: Value, #[case] precision: u32, #[case] expected: Value) {
        match (export_value(&input, precision), expected) {
            (Value::Number(a), Value::Number(b)) => assert!((a - b).abs() < 1e-12, "{} != {}", a, b),
            (a, b) => assert_eq!(a, b),
        }
    }

    #[test]
    fn test_export_lists_failures_and_writes_integers() {
        let schema = compile(&Schema::new(vec![EntityType::new("t", &["Id"])
            .field(FieldSpec::raw("Id", DataType::Integer))
            .field(FieldSpec::raw("Label", DataType::Text))
            .field(FieldSpec::calculated("Third", "Id / 3"))
            .field(FieldSpec::calculated("Bad", "Label * 2"))]))
        .unwrap();
        let raw = RawFacts::from_json_str(r#"{"t": [{"Id": 2, "Label": "x"}]}"#).unwrap();
        let data = Dataset::bind(&schema, &raw).unwrap();
        let graph = resolve(&schema).unwrap();
        let table = EagerEngine::new().evaluate(&schema, &graph, &data).unwrap().export(&schema, &data, 6);

        assert_eq!(table.engine_id, "eager");
        let record = &table.records("t").unwrap()[0];
        assert_eq!(record["Third"], Value::Number(0.666667));
        assert_eq!(record["Bad"], Value::Null);
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].field, "Bad");
        assert_eq!(table.failures[0].primary_key, "2");

        let json = table.to_json_pretty().unwrap();
        assert!(json.contains("\"Id\": 2,"), "{}", json);
        assert!(json.contains("\"engineId\": \"eager\""));
    }

    #[test]
    fn test_reads_flat_answer_key() {
        let table = OutputTable::from_json_str(
            r#"{"description": "answer key", "generated": "2025-01-01", "scales": [{"ScaleID": "s0", "Scale": 1}]}"#,
        )
        .unwrap();
        assert_eq!(table.engine_id, "");
        assert_eq!(table.record_count(), 1);
        assert_eq!(table.records("scales").unwrap()[0]["Scale"], Value::Number(1.0));
    }

    #[test]
    fn test_output_round_trips_through_json() {
        let mut table = OutputTable { engine_id: "lazy".into(), ..Default::default() };
        table.entities.insert("t".into(), vec![Record::from([("A".to_string(), Value::Number(0.5))])]);
        let back = OutputTable::from_json_str(&table.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, table);
    }
}
