//! Dense columnar layout of every (entity, field) slot and its dependency topology.
//!
//! Parents (dependencies) are stored CSR style; children (dependents) as an
//! intrusive linked list so downstream walks never allocate.

use super::types::{EntityId, FieldKind, SlotId};
use smallvec::SmallVec;

/// Dependency list of one slot. Most fields reference a handful of others.
pub type DepList = SmallVec<[SlotId; 4]>;

const NO_EDGE: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMeta {
    pub entity: EntityId,
    /// Declaration index of the field within its entity.
    pub field: usize,
    pub kind: FieldKind,
    /// Qualified name, `entity.field`.
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    pub meta: Vec<SlotMeta>,

    // Dense Topology
    pub parents_flat: Vec<SlotId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Adjacency List (Children)
    pub first_child: Vec<u32>,
    pub child_targets: Vec<SlotId>,
    pub next_child: Vec<u32>,

    // First slot of each entity; slots of one entity are contiguous.
    entity_offsets: Vec<u32>,
}

impl FieldRegistry {
    /// Builds the registry from slot metadata (grouped by entity, in field order)
    /// and the dependency list of every slot.
    pub fn build(meta: Vec<SlotMeta>, deps: Vec<DepList>) -> Self {
        debug_assert_eq!(meta.len(), deps.len());
        let count = meta.len();
        let mut reg = FieldRegistry {
            parents_ranges: Vec::with_capacity(count),
            first_child: vec![NO_EDGE; count],
            ..Default::default()
        };

        for (i, m) in meta.iter().enumerate() {
            if m.field == 0 {
                reg.entity_offsets.push(i as u32);
            }
        }

        for (i, mut parents) in deps.into_iter().enumerate() {
            parents.sort_unstable();
            parents.dedup();
            let id = SlotId::new(i);

            // 1. Children (Adjacency List append)
            for &parent in &parents {
                let p_idx = parent.index();
                let head = reg.first_child[p_idx];
                let new_edge = reg.child_targets.len() as u32;
                reg.child_targets.push(id);
                reg.next_child.push(head);
                reg.first_child[p_idx] = new_edge;
            }

            // 2. Parents (CSR append)
            let start = reg.parents_flat.len() as u32;
            reg.parents_flat.extend_from_slice(&parents);
            reg.parents_ranges.push((start, parents.len() as u32));
        }

        reg.meta = meta;
        reg
    }

    pub fn count(&self) -> usize { self.meta.len() }

    #[inline(always)]
    pub fn slot(&self, entity: EntityId, field: usize) -> SlotId {
        SlotId(self.entity_offsets[entity.index()] + field as u32)
    }

    #[inline(always)]
    pub fn get_parents(&self, id: SlotId) -> &[SlotId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    pub fn children(&self, id: SlotId) -> Children<'_> {
        Children { registry: self, edge: self.first_child[id.index()] }
    }

    pub fn name(&self, id: SlotId) -> &str {
        &self.meta[id.index()].name
    }
}

/// Iterator over the dependents of one slot.
pub struct Children<'a> {
    registry: &'a FieldRegistry,
    edge: u32,
}

impl Iterator for Children<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        if self.edge == NO_EDGE {
            return None;
        }
        let child = self.registry.child_targets[self.edge as usize];
        self.edge = self.registry.next_child[self.edge as usize];
        Some(child)
    }
}
