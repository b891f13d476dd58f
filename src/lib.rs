//! Schema-driven field evaluation.
//!
//! A rule book declares entities, their fields and the formulas between them.
//! [`Rulebook`] compiles it and orders every field; an [`Engine`](compute::Engine)
//! evaluates raw facts into an [`OutputTable`](output::OutputTable); the
//! [`validation`] module compares tables and the [`conformance`] harness
//! checks that every engine agrees.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod conformance;
pub mod error;
pub mod formula;
pub mod output;
pub mod rulebook;
pub mod schema;
pub mod store;
pub mod validation;

#[cfg(feature = "python")]
mod bindings;

// Re-export key types for convenient access
pub use config::RunConfig;
pub use error::RulebookError;
pub use rulebook::Rulebook;
