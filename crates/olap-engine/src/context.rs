//! The evaluation context: one current member per cube hierarchy.
//!
//! Changes are journaled so that any scope can be rolled back with [`EvalContext::restore`]
//! no matter how it exits.
use olap_model::{CubeId, HierarchyId, MemberId, Schema};

use crate::calc::{HierarchySet, Tuple};
use crate::error::{OlapError, OlapResult};

#[derive(Clone, Debug)]
pub struct EvalContext {
    cube: CubeId,
    hierarchies: Vec<HierarchyId>,
    /// Slot of each hierarchy, indexed by hierarchy id.
    slot_of: Vec<Option<usize>>,
    members: Vec<MemberId>,
    journal: Vec<(usize, MemberId)>,
}

/// Journal position returned by [`EvalContext::savepoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Savepoint(usize);

impl EvalContext {
    /// Context positioned on every hierarchy's default member.
    pub fn new(schema: &Schema, cube: CubeId) -> Self {
        let hierarchies = schema.cube_hierarchies(cube);
        let mut slot_of = Vec::new();
        for (slot, h) in hierarchies.iter().enumerate() {
            if slot_of.len() <= h.index() {
                slot_of.resize(h.index() + 1, None);
            }
            slot_of[h.index()] = Some(slot);
        }
        let members = hierarchies
            .iter()
            .map(|h| schema.hierarchy(*h).default_member)
            .collect();
        Self {
            cube,
            hierarchies,
            slot_of,
            members,
            journal: Vec::new(),
        }
    }

    fn slot(&self, hierarchy: HierarchyId) -> OlapResult<usize> {
        self.slot_of
            .get(hierarchy.index())
            .copied()
            .flatten()
            .ok_or_else(|| OlapError::eval(format!("hierarchy {hierarchy} is not in the cube")))
    }

    pub fn cube(&self) -> CubeId {
        self.cube
    }

    pub fn hierarchies(&self) -> &[HierarchyId] {
        &self.hierarchies
    }

    /// Current members in cube hierarchy order.
    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn get(&self, hierarchy: HierarchyId) -> OlapResult<MemberId> {
        Ok(self.members[self.slot(hierarchy)?])
    }

    pub fn set(&mut self, hierarchy: HierarchyId, member: MemberId) -> OlapResult<()> {
        let slot = self.slot(hierarchy)?;
        self.journal.push((slot, self.members[slot]));
        self.members[slot] = member;
        Ok(())
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.journal.len())
    }

    /// Undo every change made since `savepoint`.
    pub fn restore(&mut self, savepoint: Savepoint) {
        while self.journal.len() > savepoint.0 {
            if let Some((slot, member)) = self.journal.pop() {
                self.members[slot] = member;
            }
        }
    }

    /// Current members of the given hierarchies, in id order.
    pub fn project(&self, hierarchies: &HierarchySet) -> Tuple {
        hierarchies
            .iter()
            .filter_map(|h| self.get(h).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::food_mart;
    use pretty_assertions::assert_eq;

    #[test]
    fn restore_undoes_nested_changes() {
        let (schema, ids) = food_mart();
        let mut ctx = EvalContext::new(&schema, ids.cube);
        let initial = ctx.members().to_vec();

        let outer = ctx.savepoint();
        ctx.set(ids.time, ids.y1997).unwrap();
        let inner = ctx.savepoint();
        ctx.set(ids.time, ids.q1_1997).unwrap();
        ctx.set(ids.store, ids.ca).unwrap();
        assert_eq!(ctx.get(ids.time).unwrap(), ids.q1_1997);

        ctx.restore(inner);
        assert_eq!(ctx.get(ids.time).unwrap(), ids.y1997);
        assert_eq!(ctx.get(ids.store).unwrap(), initial[2]);
        ctx.restore(outer);
        assert_eq!(ctx.members(), initial.as_slice());
    }

    #[test]
    fn unknown_hierarchy_is_an_evaluation_error() {
        let (schema, ids) = food_mart();
        let mut ctx = EvalContext::new(&schema, ids.cube);
        assert!(ctx.set(HierarchyId(999), ids.y1997).is_err());
    }
}
