//! The eager engine: walks the resolved order once, computing every instance
//! of each (entity, field) step before moving on.
use super::index::{JoinIndexes, RowList};
use super::kernel::{self, RowContext};
use super::ledger::{FieldError, Ledger, Slot};
use super::{read_settled, Engine, EngineError, Evaluation};
use crate::analysis::ResolvedFieldGraph;
use crate::schema::{CompiledSchema, EntityDef};
use crate::store::{Dataset, Value};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct EagerEngine {
    parallel: bool,
}

impl EagerEngine {
    pub const ID: &'static str = "eager";

    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the rows of each step on the rayon pool.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Reads for one row. Every cell it touches precedes the current step in the
/// resolved order, so it is already settled.
struct SettledRow<'a> {
    schema: &'a CompiledSchema,
    data: &'a Dataset,
    indexes: &'a JoinIndexes,
    ledger: &'a Ledger,
    def: &'a EntityDef,
    row: usize,
}

impl RowContext for SettledRow<'_> {
    fn local(&mut self, field: usize) -> Result<Value, FieldError> {
        read_settled(self.schema, self.def.id, field, self.ledger.get(self.def.id, self.row, field))
    }

    fn parent(&mut self, rel: usize, field: usize) -> Result<Value, FieldError> {
        let parent = self.indexes.parent_row(self.schema, self.data, self.def, self.row, rel)?;
        let target = self.def.relationships[rel].target;
        read_settled(self.schema, target, field, self.ledger.get(target, parent, field))
    }

    fn children(&mut self, rel: usize) -> Result<RowList, FieldError> {
        Ok(self.indexes.child_rows(self.data, self.def, self.row, rel))
    }

    fn child(&mut self, rel: usize, row: usize, field: usize) -> Result<Value, FieldError> {
        let target = self.def.relationships[rel].target;
        read_settled(self.schema, target, field, self.ledger.get(target, row, field))
    }
}

impl Engine for EagerEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn evaluate(
        &self,
        schema: &CompiledSchema,
        graph: &ResolvedFieldGraph,
        data: &Dataset,
    ) -> Result<Evaluation, EngineError> {
        let start = Instant::now();
        info!(event = "engine_start", engine = Self::ID, slots = graph.len(), rows = data.row_count(), parallel = self.parallel);

        let indexes = JoinIndexes::build(schema, data);
        let mut ledger = Ledger::seed(schema, data);

        for &slot in graph.order() {
            let meta = &schema.registry().meta[slot.index()];
            let def = schema.entity(meta.entity);
            let Some(expr) = def.formulas[meta.field].as_ref() else { continue };
            let required = def.fields[meta.field].required;
            let rows = data.table(def.id).len();

            let step = |row: usize| {
                let mut ctx = SettledRow { schema, data, indexes: &indexes, ledger: &ledger, def, row };
                Slot::settle(kernel::eval(expr, &mut ctx), required)
            };
            let settled: Vec<Slot> = if self.parallel {
                (0..rows).into_par_iter().map(step).collect()
            } else {
                (0..rows).map(step).collect()
            };

            for (row, cell) in settled.into_iter().enumerate() {
                ledger.fill(def.id, row, meta.field, cell);
            }
            debug!(event = "step_done", field = %meta.name, rows);
        }

        let elapsed = start.elapsed();
        info!(event = "engine_end", engine = Self::ID, elapsed_ms = elapsed.as_millis() as u64);
        Ok(Evaluation::new(Self::ID, ledger, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::resolve;
    use crate::schema::compile;
    use crate::compute::LazyEngine;
    use crate::store::{DataType, EntityType, FieldSpec, RawFacts, Record, Relationship, Schema};
    use rstest::rstest;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn setup(on_ambiguous_first: bool) -> (CompiledSchema, Dataset) {
        let mut parent = Relationship::parent("system", "systems", "System", "SystemID");
        if on_ambiguous_first {
            parent = parent.first_on_ambiguous();
        }
        let schema = compile(&Schema::new(vec![
            EntityType::new("systems", &["Id"])
                .field(FieldSpec::raw("Id", DataType::Integer))
                .field(FieldSpec::raw("SystemID", DataType::Text))
                .field(FieldSpec::raw("Base", DataType::Number)),
            EntityType::new("scales", &["ScaleID"])
                .field(FieldSpec::raw("ScaleID", DataType::Text))
                .field(FieldSpec::raw("System", DataType::Text))
                .field(FieldSpec::lookup("Base", "system.Base"))
                .field(FieldSpec::calculated("Inverse", "1 / Base"))
                .field(FieldSpec::calculated("Strict", "1 / Base").required())
                .field(FieldSpec::calculated("Doubled", "Strict * 2"))
                .relationship(parent),
        ]))
        .unwrap();
        let raw = RawFacts::new()
            .with_table(
                "systems",
                vec![
                    record(&[("Id", 1.0.into()), ("SystemID", "Koch".into()), ("Base", 2.0.into())]),
                    record(&[("Id", 2.0.into()), ("SystemID", "Flat".into()), ("Base", 0.0.into())]),
                    record(&[("Id", 3.0.into()), ("SystemID", "Twin".into()), ("Base", 4.0.into())]),
                    record(&[("Id", 4.0.into()), ("SystemID", "Twin".into()), ("Base", 8.0.into())]),
                ],
            )
            .with_table(
                "scales",
                vec![
                    record(&[("ScaleID", "k".into()), ("System", "Koch".into())]),
                    record(&[("ScaleID", "f".into()), ("System", "Flat".into())]),
                    record(&[("ScaleID", "t".into()), ("System", "Twin".into())]),
                    record(&[("ScaleID", "m".into()), ("System", "Missing".into())]),
                ],
            );
        let data = Dataset::bind(&schema, &raw).unwrap();
        (schema, data)
    }

    fn cell(eval: &Evaluation, schema: &CompiledSchema, row: usize, field: &str) -> Slot {
        let def = schema.entity_by_name("scales").unwrap();
        eval.slot(def.id, row, def.field_index(field).unwrap()).clone()
    }

    #[test]
    fn test_failures_and_recoverable_nulls() {
        let (schema, data) = setup(false);
        let graph = resolve(&schema).unwrap();
        let eval = EagerEngine::new().evaluate(&schema, &graph, &data).unwrap();

        assert_eq!(cell(&eval, &schema, 0, "Inverse"), Slot::Resolved(Value::Number(0.5)));
        // Division by zero is a null unless the field is required.
        assert_eq!(cell(&eval, &schema, 1, "Inverse"), Slot::Resolved(Value::Null));
        assert!(matches!(cell(&eval, &schema, 1, "Strict"), Slot::Failed(FieldError::RequiredNull { .. })));
        assert!(matches!(
            cell(&eval, &schema, 1, "Doubled"),
            Slot::Failed(FieldError::Upstream { field, .. }) if field == "scales.Strict"
        ));
        assert!(matches!(cell(&eval, &schema, 2, "Base"), Slot::Failed(FieldError::AmbiguousParent { count: 2, .. })));
        assert!(matches!(cell(&eval, &schema, 3, "Base"), Slot::Failed(FieldError::MissingParent { .. })));
        assert!(matches!(cell(&eval, &schema, 3, "Inverse"), Slot::Failed(FieldError::Upstream { .. })));
    }

    #[test]
    fn test_ambiguous_parent_takes_first_in_load_order() {
        let (schema, data) = setup(true);
        let graph = resolve(&schema).unwrap();
        let eval = EagerEngine::new().evaluate(&schema, &graph, &data).unwrap();
        assert_eq!(cell(&eval, &schema, 2, "Base"), Slot::Resolved(Value::Number(4.0)));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (schema, data) = setup(false);
        let graph = resolve(&schema).unwrap();
        let sequential = EagerEngine::new().evaluate(&schema, &graph, &data).unwrap();
        let parallel = EagerEngine::new().parallel(true).evaluate(&schema, &graph, &data).unwrap();
        let def = schema.entity_by_name("scales").unwrap();
        for row in 0..4 {
            for field in 0..def.field_count() {
                assert_eq!(sequential.slot(def.id, row, field), parallel.slot(def.id, row, field));
            }
        }
    }

    #[rstest]
    #[case::ambiguous_fails(false)]
    #[case::ambiguous_takes_first(true)]
    fn test_lazy_engine_settles_failures_identically(#[case] on_ambiguous_first: bool) {
        let (schema, data) = setup(on_ambiguous_first);
        let graph = resolve(&schema).unwrap();
        let eager = EagerEngine::new().evaluate(&schema, &graph, &data).unwrap();
        let lazy = LazyEngine.evaluate(&schema, &graph, &data).unwrap();
        for def in schema.entities() {
            for row in 0..data.table(def.id).len() {
                for field in 0..def.field_count() {
                    assert_eq!(eager.slot(def.id, row, field), lazy.slot(def.id, row, field), "{}[{}].{}", def.name, row, field);
                }
            }
        }
        if !on_ambiguous_first {
            assert!(matches!(cell(&lazy, &schema, 2, "Base"), Slot::Failed(FieldError::AmbiguousParent { .. })));
            assert!(matches!(cell(&lazy, &schema, 1, "Doubled"), Slot::Failed(FieldError::Upstream { .. })));
        }
    }
}
