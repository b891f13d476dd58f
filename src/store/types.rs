//! The declarative schema document: entities, fields, formulas and relationships.
//!
//! These types are pure data. They are checked and bound into a
//! [`CompiledSchema`](crate::schema::CompiledSchema) before anything is evaluated.

use serde::{Deserialize, Serialize};

/// A unique, stable identifier for one (entity, field) slot in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Index of an entity type inside a compiled schema (entities are sorted by name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Supplied by the raw facts. No formula, no dependencies.
    #[default]
    Raw,
    /// Reads one field of the single parent row found through a relationship.
    Lookup,
    /// Arithmetic over same-entity fields and single parent hops.
    Calculated,
    /// Reduces a field over the child rows of one relationship.
    Aggregation,
}

impl FieldKind {
    pub fn is_computed(&self) -> bool {
        !matches!(self, FieldKind::Raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Raw => "raw",
            FieldKind::Lookup => "lookup",
            FieldKind::Calculated => "calculated",
            FieldKind::Aggregation => "aggregation",
        }
    }
}

/// Declared datatype of a field. Drives export formatting and validator comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    #[serde(alias = "decimal", alias = "float")]
    Number,
    #[serde(alias = "int")]
    Integer,
    #[serde(rename = "string", alias = "text")]
    Text,
    #[serde(alias = "bool")]
    Boolean,
}

impl DataType {
    /// Numeric types are compared within tolerance; everything else exactly.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Number | DataType::Integer)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub datatype: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Explicit dependencies, as `Field` or `relationship.Field`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// A required field fails instead of resolving to null on arithmetic errors.
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "Description")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn raw(name: &str, datatype: DataType) -> Self {
        Self { name: name.into(), kind: FieldKind::Raw, datatype, ..Default::default() }
    }

    pub fn lookup(name: &str, formula: &str) -> Self {
        Self::computed(name, FieldKind::Lookup, formula)
    }

    pub fn calculated(name: &str, formula: &str) -> Self {
        Self::computed(name, FieldKind::Calculated, formula)
    }

    pub fn aggregation(name: &str, formula: &str) -> Self {
        Self::computed(name, FieldKind::Aggregation, formula)
    }

    fn computed(name: &str, kind: FieldKind, formula: &str) -> Self {
        Self { name: name.into(), kind, formula: Some(formula.into()), ..Default::default() }
    }

    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = datatype;
        self
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = Some(deps.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// Many-to-one: each row of the declaring entity has one parent row.
    Parent,
    /// One-to-many: each row of the declaring entity owns a set of child rows.
    Children,
}

/// What a parent lookup does when more than one row shares the join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ambiguity {
    #[default]
    Error,
    /// Take the first matching row in load order.
    First,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKey {
    /// Field on the declaring entity.
    pub local: String,
    /// Field on the target entity.
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: String,
    pub keys: Vec<JoinKey>,
    #[serde(default)]
    pub on_ambiguous: Ambiguity,
}

impl Relationship {
    pub fn parent(name: &str, target: &str, local: &str, remote: &str) -> Self {
        Self::new(name, RelationshipKind::Parent, target, local, remote)
    }

    pub fn children(name: &str, target: &str, local: &str, remote: &str) -> Self {
        Self::new(name, RelationshipKind::Children, target, local, remote)
    }

    fn new(name: &str, kind: RelationshipKind, target: &str, local: &str, remote: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            keys: vec![JoinKey { local: local.into(), remote: remote.into() }],
            on_ambiguous: Ambiguity::Error,
        }
    }

    pub fn with_key(mut self, local: &str, remote: &str) -> Self {
        self.keys.push(JoinKey { local: local.into(), remote: remote.into() });
        self
    }

    pub fn first_on_ambiguous(mut self) -> Self {
        self.on_ambiguous = Ambiguity::First;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub primary_key: Vec<String>,
    #[serde(alias = "schema")]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "Description")]
    pub description: Option<String>,
}

impl EntityType {
    pub fn new(name: &str, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, rel: Relationship) -> Self {
        self.relationships.push(rel);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// The schema document ("rule book").
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub entities: Vec<EntityType>,
}

impl Schema {
    pub fn new(entities: Vec<EntityType>) -> Self {
        Self { model_name: None, entities }
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn get_entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.name == name)
    }
}
