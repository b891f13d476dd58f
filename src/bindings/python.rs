// FFI Facade: the `_core` Python module.
// Everything crosses the boundary as JSON text so the Python side needs no
// knowledge of the Rust types.

use crate::compute::engine_by_id;
use crate::output::OutputTable;
use crate::rulebook::Rulebook;
use crate::store::RawFacts;
use crate::validation::{validate, FieldScope, ValidationScope};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

#[pyclass(name = "_Rulebook")]
#[derive(Debug, Clone)]
pub struct PyRulebook {
    inner: Rulebook,
}

#[pymethods]
impl PyRulebook {
    #[new]
    pub fn new(schema_json: &str) -> PyResult<Self> {
        Rulebook::from_json_str(schema_json).map(|inner| Self { inner }).map_err(value_error)
    }

    /// Qualified field names in evaluation order.
    pub fn order(&self) -> Vec<String> {
        self.inner.order().map(str::to_string).collect()
    }

    #[pyo3(signature = (facts_json, engine = "eager", precision = 6, parallel = false))]
    pub fn evaluate(&self, facts_json: &str, engine: &str, precision: u32, parallel: bool) -> PyResult<String> {
        let raw = RawFacts::from_json_str(facts_json).map_err(value_error)?;
        let data = self.inner.bind(&raw).map_err(value_error)?;
        let engine = engine_by_id(engine, parallel).map_err(value_error)?;
        let table = self
            .inner
            .evaluate(&*engine, &data, precision)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        table.to_json_pretty().map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    /// Validates a candidate table against an answer table; returns the report as JSON.
    #[pyo3(signature = (candidate_json, answer_json, tolerance = 1.5e-6, all_fields = false))]
    pub fn validate(&self, candidate_json: &str, answer_json: &str, tolerance: f64, all_fields: bool) -> PyResult<String> {
        let candidate = OutputTable::from_json_str(candidate_json).map_err(value_error)?;
        let answer = OutputTable::from_json_str(answer_json).map_err(value_error)?;
        let scope = if all_fields { ValidationScope::All } else { ValidationScope::Computed };
        let report = validate(&candidate, &answer, &FieldScope::from_schema(self.inner.schema(), scope), tolerance)
            .map_err(value_error)?;
        serde_json::to_string_pretty(&report).map_err(|e| PyRuntimeError::new_err(e.to_string()))
    }

    pub fn field_count(&self) -> usize {
        self.inner.graph().len()
    }
}

#[pyfunction]
fn engine_ids() -> Vec<&'static str> {
    crate::compute::ENGINE_IDS.to_vec()
}

/// The `_core` module. The leading underscore marks it as the compiled
/// component behind a Python wrapper.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // 1. Classes.
    m.add_class::<PyRulebook>()?;
    // 2. Free functions.
    m.add_function(wrap_pyfunction!(engine_ids, m)?)?;
    Ok(())
}
