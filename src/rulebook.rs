//! The main entry point: a compiled, cycle-checked schema ready to evaluate
//! raw facts with any engine.

use crate::analysis::{resolve, ResolvedFieldGraph};
use crate::compute::Engine;
use crate::error::RulebookError;
use crate::output::OutputTable;
use crate::schema::{compile, CompiledSchema};
use crate::store::{Dataset, RawFacts, Schema, SlotId};
use std::path::Path;
use tracing::info;

/// A schema that passed every static check, together with its evaluation order.
#[derive(Debug, Clone)]
pub struct Rulebook {
    schema: CompiledSchema,
    graph: ResolvedFieldGraph,
}

impl Rulebook {
    pub fn new(schema: &Schema) -> Result<Self, RulebookError> {
        // 1. Structural checks and formula binding.
        let compiled = compile(schema)?;
        // 2. Cycle detection and ordering.
        let graph = resolve(&compiled)?;
        info!(
            event = "rulebook_loaded",
            model = compiled.model_name.as_deref().unwrap_or(""),
            entities = compiled.entities().len(),
            fields = graph.len(),
        );
        Ok(Self { schema: compiled, graph })
    }

    pub fn from_json_str(s: &str) -> Result<Self, RulebookError> {
        Self::new(&Schema::from_json_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RulebookError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[inline(always)]
    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    #[inline(always)]
    pub fn graph(&self) -> &ResolvedFieldGraph {
        &self.graph
    }

    /// Qualified field names in evaluation order.
    pub fn order(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.order().iter().map(|&slot: &SlotId| self.schema.registry().name(slot))
    }

    /// Binds raw facts to the schema's entity tables.
    pub fn bind(&self, raw: &RawFacts) -> Result<Dataset, RulebookError> {
        Ok(Dataset::bind(&self.schema, raw)?)
    }

    /// Runs one engine and exports its result.
    pub fn evaluate(&self, engine: &dyn Engine, data: &Dataset, precision: u32) -> Result<OutputTable, RulebookError> {
        let evaluation = engine.evaluate(&self.schema, &self.graph, data)?;
        Ok(evaluation.export(&self.schema, data, precision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::LazyEngine;
    use crate::store::Value;

    const SCHEMA: &str = r#"{
        "model_name": "Tiny",
        "entities": [{
            "name": "t",
            "primary_key": ["Id"],
            "fields": [
                {"name": "Id", "kind": "raw", "datatype": "integer"},
                {"name": "B", "kind": "calculated", "formula": "A * 2"},
                {"name": "A", "kind": "calculated", "formula": "Id + 1"}
            ]
        }]
    }"#;

    #[test]
    fn test_loads_orders_and_evaluates() {
        let rulebook = Rulebook::from_json_str(SCHEMA).unwrap();
        assert_eq!(rulebook.order().collect::<Vec<_>>(), vec!["t.Id", "t.A", "t.B"]);

        let data = rulebook.bind(&RawFacts::from_json_str(r#"{"t": [{"Id": 1}]}"#).unwrap()).unwrap();
        let table = rulebook.evaluate(&LazyEngine, &data, 6).unwrap();
        assert_eq!(table.records("t").unwrap()[0]["B"], Value::Number(4.0));
    }

    #[test]
    fn test_stage_errors_surface() {
        assert!(matches!(Rulebook::from_json_str("{"), Err(RulebookError::SchemaJson(_))));

        let cyclic = SCHEMA.replace("Id + 1", "B + 1");
        assert!(matches!(Rulebook::from_json_str(&cyclic), Err(RulebookError::Cycle(_))));

        let unknown = SCHEMA.replace("Id + 1", "Missing + 1");
        assert!(matches!(Rulebook::from_json_str(&unknown), Err(RulebookError::Schema(e)) if e.len() == 1));
    }
}
