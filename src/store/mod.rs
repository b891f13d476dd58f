//! Defines the core data structures: the schema document, cell values, raw facts
//! and the dense field registry.
pub mod facts;
pub mod registry;
pub mod types;
pub mod value;

// Re-export key types for convenient access
pub use facts::{Dataset, FactTable, FactsError, PrimaryKey, RawFacts, Record};
pub use registry::{DepList, FieldRegistry, SlotMeta};
pub use types::{
    Ambiguity, DataType, EntityId, EntityType, FieldKind, FieldSpec, JoinKey, Relationship, RelationshipKind, Schema,
    SlotId,
};
pub use value::{KeyAtom, Value};
