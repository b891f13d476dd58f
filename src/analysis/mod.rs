//! Static analysis over the compiled field graph.
pub mod topology;

pub use topology::{resolve, CycleError, ResolvedFieldGraph};
