//! Hash indexes over relationship join keys, built once per run from raw facts.

use super::ledger::FieldError;
use crate::schema::{BoundRelationship, CompiledSchema, EntityDef};
use crate::store::{Ambiguity, Dataset, KeyAtom, PrimaryKey, Value};
use smallvec::SmallVec;
use std::collections::HashMap;

pub type JoinKey = SmallVec<[KeyAtom; 2]>;
pub type RowList = SmallVec<[usize; 1]>;

/// Target rows of one relationship grouped by their join key, in load order.
#[derive(Debug, Clone, Default)]
pub struct JoinIndex {
    rows: HashMap<JoinKey, RowList>,
}

impl JoinIndex {
    fn build(rel: &BoundRelationship, data: &Dataset) -> Self {
        let mut rows: HashMap<JoinKey, RowList> = HashMap::new();
        for (i, row) in data.table(rel.target).rows.iter().enumerate() {
            if let Some(key) = join_key(row, &rel.remote_keys) {
                rows.entry(key).or_default().push(i);
            }
        }
        Self { rows }
    }

    /// Rows of the target entity matching `key`. Empty for unknown keys.
    pub fn lookup(&self, key: &JoinKey) -> &[usize] {
        self.rows.get(key).map(|r| r.as_slice()).unwrap_or(&[])
    }
}

/// Builds the join key of a row; `None` if any key cell is null.
pub fn join_key(row: &[Value], fields: &[usize]) -> Option<JoinKey> {
    fields.iter().map(|&f| row[f].key_atom()).collect()
}

/// One index per declared relationship, addressed by (entity, relationship).
#[derive(Debug, Clone, Default)]
pub struct JoinIndexes {
    by_entity: Vec<Vec<JoinIndex>>,
}

impl JoinIndexes {
    pub fn build(schema: &CompiledSchema, data: &Dataset) -> Self {
        let by_entity = schema
            .entities()
            .iter()
            .map(|def| def.relationships.iter().map(|rel| JoinIndex::build(rel, data)).collect())
            .collect();
        Self { by_entity }
    }

    #[inline(always)]
    pub fn get(&self, entity: usize, rel: usize) -> &JoinIndex {
        &self.by_entity[entity][rel]
    }

    fn matches(&self, data: &Dataset, def: &EntityDef, row: usize, rel: usize) -> &[usize] {
        let values = &data.table(def.id).rows[row];
        match join_key(values, &def.relationships[rel].local_keys) {
            Some(key) => self.get(def.id.index(), rel).lookup(&key),
            None => &[],
        }
    }

    /// The single parent row of `row` through a parent relationship.
    pub fn parent_row(
        &self,
        schema: &CompiledSchema,
        data: &Dataset,
        def: &EntityDef,
        row: usize,
        rel: usize,
    ) -> Result<usize, FieldError> {
        let r = &def.relationships[rel];
        match (self.matches(data, def, row, rel), r.on_ambiguous) {
            ([only], _) => Ok(*only),
            ([first, ..], Ambiguity::First) => Ok(*first),
            (rows, _) => {
                let values = &data.table(def.id).rows[row];
                let key = PrimaryKey::from_values(r.local_keys.iter().map(|&k| &values[k])).to_string();
                let relationship = r.name.clone();
                let target = schema.entity(r.target).name.clone();
                Err(match rows.len() {
                    0 => FieldError::MissingParent { relationship, target, key },
                    count => FieldError::AmbiguousParent { relationship, target, key, count },
                })
            }
        }
    }

    /// Child rows of `row` through a children relationship, in load order.
    pub fn child_rows(&self, data: &Dataset, def: &EntityDef, row: usize, rel: usize) -> RowList {
        RowList::from_slice(self.matches(data, def, row, rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::store::{DataType, EntityType, FieldSpec, RawFacts, Record, Relationship, Schema};

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_children_are_grouped_in_load_order() {
        let schema = compile(&Schema::new(vec![
            EntityType::new("systems", &["SystemID"])
                .field(FieldSpec::raw("SystemID", DataType::Text))
                .relationship(Relationship::children("scales", "scales", "SystemID", "System")),
            EntityType::new("scales", &["ScaleID"])
                .field(FieldSpec::raw("ScaleID", DataType::Text))
                .field(FieldSpec::raw("System", DataType::Text)),
        ]))
        .unwrap();
        let raw = RawFacts::new()
            .with_table("systems", vec![record(&[("SystemID", "Koch".into())])])
            .with_table(
                "scales",
                vec![
                    record(&[("ScaleID", "k0".into()), ("System", "Koch".into())]),
                    record(&[("ScaleID", "c0".into()), ("System", "Cantor".into())]),
                    record(&[("ScaleID", "k1".into()), ("System", "Koch".into())]),
                    record(&[("ScaleID", "n0".into()), ("System", Value::Null)]),
                ],
            );
        let data = Dataset::bind(&schema, &raw).unwrap();
        let indexes = JoinIndexes::build(&schema, &data);

        let systems = schema.entity_by_name("systems").unwrap();
        let index = indexes.get(systems.id.index(), 0);
        let key = join_key(&data.table(systems.id).rows[0], &systems.relationships[0].local_keys).unwrap();
        assert_eq!(index.lookup(&key), &[0, 2]);

        let unknown: JoinKey = [KeyAtom::Text("Sierpinski".into())].into_iter().collect();
        assert!(index.lookup(&unknown).is_empty());
    }
}
