//! The validator: joins a candidate table to an answer table by primary key and
//! compares the fields in scope.
use super::error::ValidationError;
use super::report::{Mismatch, MissingRecord, TableSide, ValidationReport};
use crate::compute::kernel::values_equal;
use crate::output::OutputTable;
use crate::schema::CompiledSchema;
use crate::store::{DataType, PrimaryKey, Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Which fields a validation run compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationScope {
    /// Lookup, calculated and aggregation fields.
    #[default]
    Computed,
    /// Every non-key field.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedEntity {
    pub name: String,
    pub primary_key: Vec<String>,
    pub fields: Vec<(String, DataType)>,
}

/// The fields to compare, per entity, with their declared datatypes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldScope {
    entities: Vec<ScopedEntity>,
}

impl FieldScope {
    pub fn from_schema(schema: &CompiledSchema, scope: ValidationScope) -> Self {
        let entities = schema
            .entities()
            .iter()
            .map(|def| ScopedEntity {
                name: def.name.clone(),
                primary_key: def.primary_key_names(),
                fields: def
                    .fields
                    .iter()
                    .enumerate()
                    .filter(|(i, f)| match scope {
                        ValidationScope::Computed => f.kind.is_computed(),
                        ValidationScope::All => !def.primary_key.contains(i),
                    })
                    .map(|(_, f)| (f.name.clone(), f.datatype))
                    .collect(),
            })
            .filter(|e: &ScopedEntity| !e.fields.is_empty())
            .collect();
        Self { entities }
    }

    /// Narrows one entity to the named fields; other entities are unchanged.
    pub fn only(mut self, entity: &str, fields: &[&str]) -> Self {
        if let Some(e) = self.entities.iter_mut().find(|e| e.name == entity) {
            e.fields.retain(|(name, _)| fields.contains(&name.as_str()));
        }
        self
    }

    pub fn entities(&self) -> &[ScopedEntity] {
        &self.entities
    }
}

/// Compares two values of a field with the given datatype.
///
/// Numbers match when `|expected - actual| < tolerance`; everything else,
/// including numeric fields holding text, must match exactly. Null matches null.
pub fn values_match(expected: &Value, actual: &Value, datatype: DataType, tolerance: f64) -> bool {
    match (expected, actual) {
        (Value::Number(e), Value::Number(a)) if datatype.is_numeric() => (e - a).abs() < tolerance,
        _ => values_equal(expected, actual),
    }
}

fn index<'t>(
    table: &'t OutputTable,
    entity: &ScopedEntity,
    side: TableSide,
) -> Result<BTreeMap<PrimaryKey, &'t Record>, ValidationError> {
    let records = table
        .records(&entity.name)
        .ok_or_else(|| ValidationError::MissingTable { entity: entity.name.clone(), side })?;

    let mut by_key = BTreeMap::new();
    for (row, record) in records.iter().enumerate() {
        let key = PrimaryKey::from_record(record, &entity.primary_key).ok_or_else(|| {
            let field = entity
                .primary_key
                .iter()
                .find(|f| record.get(*f).map_or(true, Value::is_null))
                .cloned()
                .unwrap_or_default();
            ValidationError::MissingPrimaryKey { entity: entity.name.clone(), row, field, side }
        })?;
        if by_key.insert(key.clone(), record).is_some() {
            return Err(ValidationError::DuplicatePrimaryKey { entity: entity.name.clone(), key: key.to_string(), side });
        }
    }
    Ok(by_key)
}

/// Validates a candidate table against the answer table.
///
/// Records are counted over the union of primary keys: a record passes when
/// every field in scope matches, and a key present on only one side counts
/// as one failure. Only structural problems are errors.
pub fn validate(
    candidate: &OutputTable,
    answer: &OutputTable,
    scope: &FieldScope,
    tolerance: f64,
) -> Result<ValidationReport, ValidationError> {
    let mut report = ValidationReport::default();

    for entity in scope.entities() {
        let expected = index(answer, entity, TableSide::Answer)?;
        let actual = index(candidate, entity, TableSide::Candidate)?;
        let keys: BTreeSet<&PrimaryKey> = expected.keys().chain(actual.keys()).collect();

        for key in keys {
            let (e, a) = match (expected.get(key), actual.get(key)) {
                (Some(e), Some(a)) => (e, a),
                (e, _) => {
                    let missing_from = if e.is_some() { TableSide::Candidate } else { TableSide::Answer };
                    report.fail_count += 1;
                    report.missing_records.push(MissingRecord {
                        entity: entity.name.clone(),
                        primary_key: key.to_string(),
                        missing_from,
                    });
                    continue;
                }
            };

            let before = report.mismatches.len();
            for (field, datatype) in &entity.fields {
                let expected_value = e.get(field).ok_or_else(|| ValidationError::MissingField {
                    entity: entity.name.clone(),
                    key: key.to_string(),
                    field: field.clone(),
                })?;
                let actual_value = a.get(field).unwrap_or(&Value::Null);
                if !values_match(expected_value, actual_value, *datatype, tolerance) {
                    report.mismatches.push(Mismatch {
                        entity: entity.name.clone(),
                        primary_key: key.to_string(),
                        field: field.clone(),
                        expected: expected_value.clone(),
                        actual: actual_value.clone(),
                    });
                }
            }
            if report.mismatches.len() == before {
                report.pass_count += 1;
            } else {
                report.fail_count += 1;
            }
        }
        debug!(event = "entity_validated", entity = %entity.name, records = expected.len());
    }
    Ok(report)
}

/// Checks that a table carries every entity and every field of the schema.
pub fn check_shape(schema: &CompiledSchema, table: &OutputTable) -> Result<(), ValidationError> {
    for def in schema.entities() {
        let records = table
            .records(&def.name)
            .ok_or_else(|| ValidationError::MissingTable { entity: def.name.clone(), side: TableSide::Candidate })?;
        let key_fields = def.primary_key_names();
        for (row, record) in records.iter().enumerate() {
            let key = PrimaryKey::from_record(record, &key_fields).map(|k| k.to_string()).unwrap_or_else(|| row.to_string());
            if let Some(spec) = def.fields.iter().find(|f| !record.contains_key(&f.name)) {
                return Err(ValidationError::MissingField { entity: def.name.clone(), key, field: spec.name.clone() });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::store::{EntityType, FieldSpec, Schema};
    use rstest::rstest;

    fn schema() -> CompiledSchema {
        compile(&Schema::new(vec![EntityType::new("scales", &["System", "Iteration"])
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::raw("Iteration", DataType::Integer))
            .field(FieldSpec::raw("Measure", DataType::Number))
            .field(FieldSpec::calculated("Scale", "POWER(0.5, Iteration)"))
            .field(FieldSpec::calculated("Label", "System").with_datatype(DataType::Text))]))
        .unwrap()
    }

    fn table(rows: &[(&str, f64, f64, &str)]) -> OutputTable {
        let records = rows
            .iter()
            .map(|(system, iteration, scale, label)| {
                Record::from([
                    ("System".to_string(), Value::from(*system)),
                    ("Iteration".to_string(), Value::Number(*iteration)),
                    ("Measure".to_string(), Value::Number(1.0)),
                    ("Scale".to_string(), Value::Number(*scale)),
                    ("Label".to_string(), Value::from(*label)),
                ])
            })
            .collect();
        OutputTable { entities: BTreeMap::from([("scales".to_string(), records)]), ..Default::default() }
    }

    fn answer() -> OutputTable {
        table(&[("Koch", 0.0, 1.0, "Koch"), ("Koch", 1.0, 0.5, "Koch"), ("Koch", 2.0, 0.25, "Koch")])
    }

    #[test]
    fn test_identical_tables_pass() {
        let scope = FieldScope::from_schema(&schema(), ValidationScope::Computed);
        let report = validate(&answer(), &answer(), &scope, 1e-4).unwrap();
        assert_eq!((report.pass_count, report.fail_count), (3, 0));
        assert!(report.is_clean());
    }

    #[test]
    fn test_one_perturbed_field_is_one_mismatch() {
        let candidate = table(&[("Koch", 0.0, 1.0, "Koch"), ("Koch", 1.0, 0.51, "Koch"), ("Koch", 2.0, 0.25, "Koch")]);
        let scope = FieldScope::from_schema(&schema(), ValidationScope::Computed);
        let report = validate(&candidate, &answer(), &scope, 1e-4).unwrap();

        assert_eq!(report.pass_count, report.total() - 1);
        assert_eq!(report.mismatches.len(), 1);
        let m = &report.mismatches[0];
        assert_eq!((m.primary_key.as_str(), m.field.as_str()), ("Koch|1", "Scale"));
        assert_eq!((m.expected.clone(), m.actual.clone()), (Value::Number(0.5), Value::Number(0.51)));
    }

    #[test]
    fn test_missing_record_is_reported_not_fatal() {
        let candidate = table(&[("Koch", 0.0, 1.0, "Koch"), ("Koch", 2.0, 0.25, "Koch"), ("Koch", 3.0, 0.125, "Koch")]);
        let scope = FieldScope::from_schema(&schema(), ValidationScope::Computed);
        let report = validate(&candidate, &answer(), &scope, 1e-4).unwrap();

        assert_eq!((report.pass_count, report.fail_count), (2, 2));
        assert_eq!(
            report.missing_records,
            vec![
                MissingRecord { entity: "scales".into(), primary_key: "Koch|1".into(), missing_from: TableSide::Candidate },
                MissingRecord { entity: "scales".into(), primary_key: "Koch|3".into(), missing_from: TableSide::Answer },
            ]
        );
    }

    #[rstest]
    #[case::inside(1.0000014, 1.5e-6, DataType::Number, true)]
    #[case::boundary_is_exclusive(1.5, 0.5, DataType::Number, false)]
    #[case::outside(1.000002, 1.5e-6, DataType::Number, false)]
    #[case::text_is_exact(1.0000001, 1.5e-6, DataType::Text, false)]
    fn test_tolerance(#[case] actual: f64, #[case] tolerance: f64, #[case] datatype: DataType, #[case] matches: bool) {
        assert_eq!(values_match(&Value::Number(1.0), &Value::Number(actual), datatype, tolerance), matches);
    }

    #[rstest]
    #[case::null_null(Value::Null, Value::Null, true)]
    #[case::null_number(Value::Null, Value::Number(0.0), false)]
    #[case::type_mismatch(Value::Number(1.0), Value::Text("1".into()), false)]
    fn test_non_numeric_comparisons(#[case] expected: Value, #[case] actual: Value, #[case] matches: bool) {
        assert_eq!(values_match(&expected, &actual, DataType::Number, 1e-4), matches);
    }

    #[test]
    fn test_scope_selection() {
        let computed = FieldScope::from_schema(&schema(), ValidationScope::Computed);
        let names: Vec<&str> = computed.entities()[0].fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Scale", "Label"]);

        let all = FieldScope::from_schema(&schema(), ValidationScope::All).only("scales", &["Measure"]);
        assert_eq!(all.entities()[0].fields, vec![("Measure".to_string(), DataType::Number)]);
    }

    #[test]
    fn test_structural_errors() {
        let scope = FieldScope::from_schema(&schema(), ValidationScope::Computed);
        let err = validate(&OutputTable::default(), &answer(), &scope, 1e-4).unwrap_err();
        assert_eq!(err, ValidationError::MissingTable { entity: "scales".into(), side: TableSide::Candidate });

        let duplicated = table(&[("Koch", 0.0, 1.0, "Koch"), ("Koch", 0.0, 1.0, "Koch")]);
        let err = validate(&duplicated, &answer(), &scope, 1e-4).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicatePrimaryKey { side: TableSide::Candidate, .. }));
    }

    #[test]
    fn test_composite_keys_join_part_by_part() {
        let schema = compile(&Schema::new(vec![EntityType::new("t", &["A", "B"])
            .field(FieldSpec::raw("A", DataType::Text))
            .field(FieldSpec::raw("B", DataType::Text))
            .field(FieldSpec::calculated("C", "1"))]))
        .unwrap();
        let row = |a: &str, b: &str| {
            Record::from([
                ("A".to_string(), Value::from(a)),
                ("B".to_string(), Value::from(b)),
                ("C".to_string(), Value::Number(1.0)),
            ])
        };
        // Both keys render as "x|y|z" but differ part by part.
        let table = OutputTable {
            entities: BTreeMap::from([("t".to_string(), vec![row("x|y", "z"), row("x", "y|z")])]),
            ..Default::default()
        };
        let scope = FieldScope::from_schema(&schema, ValidationScope::Computed);
        let report = validate(&table, &table, &scope, 1e-4).unwrap();
        assert_eq!((report.pass_count, report.fail_count), (2, 0));
    }

    #[test]
    fn test_check_shape() {
        let schema = schema();
        assert!(check_shape(&schema, &answer()).is_ok());
        let mut partial = answer();
        for record in partial.entities.get_mut("scales").unwrap() {
            record.remove("Label");
        }
        assert!(matches!(check_shape(&schema, &partial), Err(ValidationError::MissingField { field, .. }) if field == "Label"));
    }
}
