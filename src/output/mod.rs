//! Export of engine results as output tables.
pub mod table;

pub use table::{export_value, FieldFailure, OutputTable};

pub(crate) use table::export;
