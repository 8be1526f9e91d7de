//! Member metadata over the stored schema plus a query's calculated members.
//!
//! Calculated members are allocated ids past [`Schema::member_count`], so a [`MemberId`] alone
//! tells which side of the overlay it lives on.
use std::collections::HashMap;

use olap_model::{
    CubeId, DimensionId, HierarchyId, LevelId, MemberId, MemberKind, Schema, Value,
};

use crate::calc::Calc;

#[derive(Clone, Debug)]
pub struct CalculatedMember {
    pub id: MemberId,
    pub name: String,
    pub unique_name: String,
    pub hierarchy: HierarchyId,
    pub dimension: DimensionId,
    pub level: LevelId,
    pub parent: Option<MemberId>,
    pub solve_order: i32,
}

/// Calculated members of one compiled query, with their formulas once compiled.
#[derive(Clone, Debug, Default)]
pub struct CalculatedMembers {
    members: Vec<CalculatedMember>,
    formulas: Vec<Option<Calc>>,
    by_name: HashMap<String, MemberId>,
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl CalculatedMembers {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalculatedMember> {
        self.members.iter()
    }

    /// Register a member; its id is the next one past the schema and earlier overlays.
    pub(crate) fn push(
        &mut self,
        schema: &Schema,
        build: impl FnOnce(MemberId) -> CalculatedMember,
    ) -> Option<MemberId> {
        let id = MemberId((schema.member_count() + self.members.len()) as u32);
        let member = build(id);
        let key = normalize(&member.unique_name);
        if self.by_name.contains_key(&key) {
            return None;
        }
        self.by_name.insert(key, id);
        self.members.push(member);
        self.formulas.push(None);
        Some(id)
    }

    pub(crate) fn set_formula(&mut self, schema: &Schema, id: MemberId, formula: Calc) {
        if let Some(slot) = id
            .index()
            .checked_sub(schema.member_count())
            .and_then(|i| self.formulas.get_mut(i))
        {
            *slot = Some(formula);
        }
    }

    pub fn by_unique_name(&self, unique_name: &str) -> Option<MemberId> {
        self.by_name.get(&normalize(unique_name)).copied()
    }
}

/// Read-only view answering member questions for stored and calculated members alike.
#[derive(Clone, Copy, Debug)]
pub struct MemberCatalog<'a> {
    pub schema: &'a Schema,
    pub overlay: &'a CalculatedMembers,
}

impl<'a> MemberCatalog<'a> {
    pub fn new(schema: &'a Schema, overlay: &'a CalculatedMembers) -> Self {
        Self { schema, overlay }
    }

    pub fn calculated(&self, id: MemberId) -> Option<&'a CalculatedMember> {
        id.index()
            .checked_sub(self.schema.member_count())
            .and_then(|i| self.overlay.members.get(i))
    }

    pub fn formula(&self, id: MemberId) -> Option<&'a Calc> {
        id.index()
            .checked_sub(self.schema.member_count())
            .and_then(|i| self.overlay.formulas.get(i))
            .and_then(Option::as_ref)
    }

    pub fn is_calculated(&self, id: MemberId) -> bool {
        id.index() >= self.schema.member_count()
    }

    pub fn exists(&self, id: MemberId) -> bool {
        self.schema.member(id).is_some() || self.calculated(id).is_some()
    }

    pub fn hierarchy_of(&self, id: MemberId) -> Option<HierarchyId> {
        match self.schema.member(id) {
            Some(m) => Some(m.hierarchy),
            None => self.calculated(id).map(|c| c.hierarchy),
        }
    }

    pub fn level_of(&self, id: MemberId) -> Option<LevelId> {
        match self.schema.member(id) {
            Some(m) => Some(m.level),
            None => self.calculated(id).map(|c| c.level),
        }
    }

    pub fn dimension_of(&self, id: MemberId) -> Option<DimensionId> {
        match self.schema.member(id) {
            Some(m) => Some(m.dimension),
            None => self.calculated(id).map(|c| c.dimension),
        }
    }

    pub fn name(&self, id: MemberId) -> &'a str {
        match self.schema.member(id) {
            Some(m) => &m.name,
            None => self.calculated(id).map_or("", |c| c.name.as_str()),
        }
    }

    pub fn unique_name(&self, id: MemberId) -> &'a str {
        match self.schema.member(id) {
            Some(m) => &m.unique_name,
            None => self.calculated(id).map_or("", |c| c.unique_name.as_str()),
        }
    }

    pub fn parent(&self, id: MemberId) -> Option<MemberId> {
        match self.schema.member(id) {
            Some(m) => m.parent,
            None => self.calculated(id).and_then(|c| c.parent),
        }
    }

    pub fn children(&self, id: MemberId) -> &'a [MemberId] {
        self.schema
            .member(id)
            .map_or(&[][..], |m| m.children.as_slice())
    }

    pub fn key(&self, id: MemberId) -> Value {
        self.schema
            .member(id)
            .map_or(Value::Null, |m| m.key.clone())
    }

    pub fn is_null(&self, id: MemberId) -> bool {
        self.schema.member(id).is_some_and(|m| m.is_null())
    }

    pub fn is_all(&self, id: MemberId) -> bool {
        self.schema.member(id).is_some_and(|m| m.is_all())
    }

    pub fn kind(&self, id: MemberId) -> MemberKind {
        match self.schema.member(id) {
            Some(m) => m.kind,
            None => MemberKind::Calculated,
        }
    }

    pub fn depth(&self, id: MemberId) -> u32 {
        self.level_of(id)
            .map_or(0, |l| self.schema.level(l).depth)
    }

    pub fn null_member(&self, hierarchy: HierarchyId) -> MemberId {
        self.schema.hierarchy(hierarchy).null_member
    }

    pub fn default_member(&self, hierarchy: HierarchyId) -> MemberId {
        self.schema.hierarchy(hierarchy).default_member
    }

    /// Position within the member's level; calculated members sort after stored ones.
    pub fn ordinal(&self, id: MemberId) -> i64 {
        match self.schema.member(id) {
            Some(m) => i64::from(m.position),
            None => (id.index() - self.schema.member_count()) as i64 + i64::from(u32::MAX),
        }
    }

    /// Sort key giving hierarchical (pre-order) order within one hierarchy.
    pub fn hierarchy_path(&self, id: MemberId) -> Vec<i64> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(m) = current {
            path.push(self.ordinal(m));
            current = self.parent(m);
        }
        path.reverse();
        path
    }

    pub fn is_ancestor_or_self(&self, ancestor: MemberId, member: MemberId) -> bool {
        let mut current = Some(member);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether two members of one hierarchy lie on the same ancestor chain.
    pub fn related(&self, a: MemberId, b: MemberId) -> bool {
        self.is_ancestor_or_self(a, b) || self.is_ancestor_or_self(b, a)
    }

    /// Resolve a member unique name: calculated members first, then the cube.
    pub fn lookup(&self, cube: CubeId, unique_name: &str) -> Option<MemberId> {
        self.overlay
            .by_unique_name(unique_name)
            .or_else(|| self.schema.member_by_unique_name(cube, unique_name))
    }
}
