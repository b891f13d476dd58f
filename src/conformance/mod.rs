//! Cross-engine conformance: every engine, same inputs, same answer table.
pub mod harness;

pub use harness::{Agreement, ConformanceReport, EngineRun, Harness, Outcome};
