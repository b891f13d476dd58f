//! The Dependency Resolver: orders every (entity, field) slot so that each
//! dependency precedes its dependents.

use crate::schema::CompiledSchema;
use crate::store::{FieldRegistry, SlotId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

/// The schema's field graph contains a dependency cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle among fields: {}", fields.join(", "))]
pub struct CycleError {
    /// Qualified names (`entity.field`) of every field on a cycle, sorted.
    pub fields: Vec<String>,
}

/// A topological ordering of every slot. Rebuilt whenever the schema changes;
/// never mutated during evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFieldGraph {
    order: Vec<SlotId>,
    position: Vec<usize>,
}

impl ResolvedFieldGraph {
    pub fn order(&self) -> &[SlotId] {
        &self.order
    }

    /// Position of a slot in the evaluation order.
    #[inline(always)]
    pub fn position(&self, slot: SlotId) -> usize {
        self.position[slot.index()]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Kahn's algorithm with a ready set ordered by slot id.
///
/// Slots are laid out by entity (sorted by name) and then by field declaration
/// order, so the smallest ready slot is the (entity name, field order)
/// tie-break and the output is fully deterministic.
pub fn resolve(schema: &CompiledSchema) -> Result<ResolvedFieldGraph, CycleError> {
    let registry = schema.registry();
    let count = registry.count();
    let mut in_degree: Vec<usize> = registry.parents_ranges.iter().map(|&(_, c)| c as usize).collect();
    let mut ready: BTreeSet<SlotId> = (0..count).filter(|&i| in_degree[i] == 0).map(SlotId::new).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for child in registry.children(node) {
            let degree = &mut in_degree[child.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != count {
        return Err(cycle_members(registry, &in_degree));
    }

    let mut position = vec![0; count];
    for (i, slot) in order.iter().enumerate() {
        position[slot.index()] = i;
    }
    debug!(event = "fields_resolved", slots = count);
    Ok(ResolvedFieldGraph { order, position })
}

/// Names the fields that actually sit on a cycle. Slots left over by Kahn's
/// algorithm also include everything downstream of a cycle, so those are
/// peeled off before the strongly connected components are computed.
fn cycle_members(registry: &FieldRegistry, in_degree: &[usize]) -> CycleError {
    let mut remaining: BTreeSet<SlotId> =
        (0..registry.count()).filter(|&i| in_degree[i] > 0).map(SlotId::new).collect();

    loop {
        let leaves: Vec<SlotId> = remaining
            .iter()
            .copied()
            .filter(|&s| !registry.children(s).any(|c| remaining.contains(&c)))
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(&leaf);
        }
    }

    let mut graph = DiGraph::<SlotId, ()>::with_capacity(remaining.len(), 0);
    let nodes: HashMap<SlotId, NodeIndex> = remaining.iter().map(|&s| (s, graph.add_node(s))).collect();
    for (&slot, &node) in &nodes {
        for child in registry.children(slot) {
            if let Some(&target) = nodes.get(&child) {
                graph.add_edge(node, target, ());
            }
        }
    }

    let mut fields: Vec<String> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|n| registry.name(graph[n]).to_string())
        .collect();
    fields.sort();
    CycleError { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::store::{DataType, EntityType, FieldSpec, Relationship, Schema};

    fn compiled(entities: Vec<EntityType>) -> CompiledSchema {
        compile(&Schema::new(entities)).unwrap()
    }

    #[test]
    fn test_resolve_diamond_dependency() {
        // Id -> B, Id -> C, B + C -> D
        let schema = compiled(vec![EntityType::new("t", &["Id"])
            .field(FieldSpec::calculated("D", "B + C"))
            .field(FieldSpec::calculated("C", "Id * 3"))
            .field(FieldSpec::calculated("B", "Id * 2"))
            .field(FieldSpec::raw("Id", DataType::Number))]);
        let graph = resolve(&schema).unwrap();

        let pos = |name: &str| graph.position(schema.slot_by_name("t", name).unwrap());
        assert!(pos("Id") < pos("B"));
        assert!(pos("Id") < pos("C"));
        assert!(pos("B") < pos("D"));
        assert!(pos("C") < pos("D"));
        // Tie-break between B and C follows declaration order.
        assert!(pos("C") < pos("B"));
    }

    #[test]
    fn test_every_dependency_precedes_its_dependents() {
        let systems = EntityType::new("systems", &["SystemID"])
            .field(FieldSpec::raw("SystemID", DataType::Text))
            .field(FieldSpec::raw("BaseScale", DataType::Number))
            .field(FieldSpec::aggregation("MaxScale", "MAX(scales.Scale)"))
            .relationship(Relationship::children("scales", "scales", "SystemID", "System"));
        let scales = EntityType::new("scales", &["ScaleID"])
            .field(FieldSpec::raw("ScaleID", DataType::Text))
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::lookup("BaseScale", "system.BaseScale"))
            .field(FieldSpec::calculated("Scale", "BaseScale / 2"))
            .relationship(Relationship::parent("system", "systems", "System", "SystemID"));
        let schema = compiled(vec![systems, scales]);
        let graph = resolve(&schema).unwrap();

        assert_eq!(graph.len(), schema.registry().count());
        for &slot in graph.order() {
            for &parent in schema.registry().get_parents(slot) {
                assert!(graph.position(parent) < graph.position(slot));
            }
        }
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let build = || {
            compiled(vec![
                EntityType::new("b", &["Id"])
                    .field(FieldSpec::raw("Id", DataType::Number))
                    .field(FieldSpec::calculated("X", "Id + 1")),
                EntityType::new("a", &["Id"])
                    .field(FieldSpec::raw("Id", DataType::Number))
                    .field(FieldSpec::calculated("Y", "Id - 1")),
            ])
        };
        let first = resolve(&build()).unwrap();
        let schema = build();
        let second = resolve(&schema).unwrap();
        assert_eq!(first, second);
        let names: Vec<&str> = second.order().iter().map(|&s| schema.registry().name(s)).collect();
        assert_eq!(names, vec!["a.Id", "a.Y", "b.Id", "b.X"]);
    }

    #[test]
    fn test_cycle_names_only_cycle_members() {
        let schema = compiled(vec![EntityType::new("t", &["Id"])
            .field(FieldSpec::raw("Id", DataType::Number))
            .field(FieldSpec::calculated("A", "B + 1"))
            .field(FieldSpec::calculated("B", "A * 2"))
            .field(FieldSpec::calculated("C", "A + Id"))]);
        let err = resolve(&schema).unwrap_err();
        assert_eq!(err.fields, vec!["t.A".to_string(), "t.B".to_string()]);
        assert_eq!(err.to_string(), "dependency cycle among fields: t.A, t.B");
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let schema = compiled(vec![EntityType::new("t", &["Id"])
            .field(FieldSpec::raw("Id", DataType::Number))
            .field(FieldSpec::calculated("A", "A + Id"))]);
        assert_eq!(resolve(&schema).unwrap_err().fields, vec!["t.A".to_string()]);
    }

    #[test]
    fn test_cycle_through_explicit_depends_on() {
        let schema = compiled(vec![EntityType::new("t", &["Id"])
            .field(FieldSpec::raw("Id", DataType::Number))
            .field(FieldSpec::calculated("A", "Id + 1").with_depends_on(&["B"]))
            .field(FieldSpec::calculated("B", "A * 2"))]);
        assert_eq!(resolve(&schema).unwrap_err().fields.len(), 2);
    }
}
