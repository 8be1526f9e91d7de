//! Immutable dimensional schema.
//!
//! The schema is an arena: every entity is stored once in a flat vector and referenced by a
//! copyable typed id. Back-references (member → level → hierarchy → dimension → cube) are plain
//! ids, so the graph has no ownership cycles and can be shared freely across threads behind an
//! `Arc`.
use crate::star::{AggregateTable, Aggregator};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_id!(CubeId);
define_id!(DimensionId);
define_id!(HierarchyId);
define_id!(LevelId);
define_id!(
    /// Members of query-scoped calculated members are allocated past
    /// [`Schema::member_count`] by the engine.
    MemberId
);
define_id!(MeasureId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Regular,
    All,
    /// Placeholder returned by navigation that runs off the hierarchy (e.g. parent of a root).
    Null,
    Measure,
    Calculated,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub unique_name: String,
    pub key: Value,
    pub ordinal: Option<u32>,
    pub kind: MemberKind,
    pub level: LevelId,
    pub hierarchy: HierarchyId,
    pub dimension: DimensionId,
    pub parent: Option<MemberId>,
    pub children: Vec<MemberId>,
    pub measure: Option<MeasureId>,
    /// Position of the member within its level, in hierarchical order.
    pub position: u32,
}

impl Member {
    pub fn is_all(&self) -> bool {
        self.kind == MemberKind::All
    }

    pub fn is_null(&self) -> bool {
        self.kind == MemberKind::Null
    }

    pub fn is_calculated(&self) -> bool {
        self.kind == MemberKind::Calculated
    }
}

#[derive(Clone, Debug)]
pub struct Level {
    pub id: LevelId,
    pub name: String,
    pub unique_name: String,
    pub hierarchy: HierarchyId,
    pub depth: u32,
    /// Key column on the hierarchy's table; `None` for the All level and the Measures level.
    pub column: Option<String>,
    /// When false, a member's key is only unique within its parent, so SQL predicates must
    /// also constrain the ancestor levels.
    pub unique_members: bool,
    pub is_all: bool,
    pub members: Vec<MemberId>,
}

#[derive(Clone, Debug)]
pub struct Hierarchy {
    pub id: HierarchyId,
    pub name: String,
    pub unique_name: String,
    pub dimension: DimensionId,
    pub cube: CubeId,
    pub levels: Vec<LevelId>,
    pub has_all: bool,
    pub all_member: Option<MemberId>,
    pub null_member: MemberId,
    pub default_member: MemberId,
    /// Dimension table; `None` when the level columns live on the fact table.
    pub table: Option<String>,
    pub primary_key: Option<String>,
    /// Column of the fact table joined to `primary_key`.
    pub foreign_key: Option<String>,
    pub is_measures: bool,
}

#[derive(Clone, Debug)]
pub struct Dimension {
    pub id: DimensionId,
    pub name: String,
    pub unique_name: String,
    pub cube: CubeId,
    pub hierarchies: Vec<HierarchyId>,
    pub is_measures: bool,
}

#[derive(Clone, Debug)]
pub struct Measure {
    pub id: MeasureId,
    pub name: String,
    pub cube: CubeId,
    pub member: MemberId,
    pub column: String,
    pub aggregator: Aggregator,
}

#[derive(Clone, Debug)]
pub struct Cube {
    pub id: CubeId,
    pub name: String,
    pub fact_table: String,
    /// Measures dimension first, then the regular dimensions in declaration order.
    pub dimensions: Vec<DimensionId>,
    pub measures: Vec<MeasureId>,
    pub aggregate_tables: Vec<AggregateTable>,
}

/// A catalog of cubes and their dimensional metadata.
#[derive(Clone, Debug)]
pub struct Schema {
    pub(crate) name: String,
    pub(crate) cubes: Vec<Cube>,
    pub(crate) dimensions: Vec<Dimension>,
    pub(crate) hierarchies: Vec<Hierarchy>,
    pub(crate) levels: Vec<Level>,
    pub(crate) members: Vec<Member>,
    pub(crate) measures: Vec<Measure>,
    pub(crate) cube_index: HashMap<String, CubeId>,
    pub(crate) member_index: HashMap<(CubeId, String), MemberId>,
    pub(crate) hierarchy_index: HashMap<(CubeId, String), HierarchyId>,
    pub(crate) level_index: HashMap<(CubeId, String), LevelId>,
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    pub fn cube(&self, id: CubeId) -> &Cube {
        &self.cubes[id.index()]
    }

    pub fn cube_by_name(&self, name: &str) -> Option<&Cube> {
        self.cube_index
            .get(&normalize_name(name))
            .map(|id| self.cube(*id))
    }

    pub fn dimension(&self, id: DimensionId) -> &Dimension {
        &self.dimensions[id.index()]
    }

    pub fn hierarchy(&self, id: HierarchyId) -> &Hierarchy {
        &self.hierarchies[id.index()]
    }

    pub fn level(&self, id: LevelId) -> &Level {
        &self.levels[id.index()]
    }

    pub fn measure(&self, id: MeasureId) -> &Measure {
        &self.measures[id.index()]
    }

    /// Stored member lookup. Ids past [`Schema::member_count`] belong to query overlays and
    /// return `None`.
    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(id.index())
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Hierarchies of a cube in dimension order; the Measures hierarchy is always first.
    pub fn cube_hierarchies(&self, cube: CubeId) -> Vec<HierarchyId> {
        self.cube(cube)
            .dimensions
            .iter()
            .flat_map(|d| self.dimension(*d).hierarchies.iter().copied())
            .collect()
    }

    pub fn measures_hierarchy(&self, cube: CubeId) -> HierarchyId {
        let measures_dim = self.cube(cube).dimensions[0];
        self.dimension(measures_dim).hierarchies[0]
    }

    pub fn member_by_unique_name(&self, cube: CubeId, unique_name: &str) -> Option<MemberId> {
        self.member_index
            .get(&(cube, normalize_name(unique_name)))
            .copied()
    }

    pub fn hierarchy_by_unique_name(&self, cube: CubeId, unique_name: &str) -> Option<HierarchyId> {
        self.hierarchy_index
            .get(&(cube, normalize_name(unique_name)))
            .copied()
    }

    pub fn level_by_unique_name(&self, cube: CubeId, unique_name: &str) -> Option<LevelId> {
        self.level_index
            .get(&(cube, normalize_name(unique_name)))
            .copied()
    }

    pub fn measure_by_name(&self, cube: CubeId, name: &str) -> Option<MeasureId> {
        let wanted = normalize_name(name);
        self.cube(cube)
            .measures
            .iter()
            .copied()
            .find(|m| normalize_name(&self.measure(*m).name) == wanted)
    }

    /// Members of the hierarchy in hierarchical (pre-order) order, excluding the null member.
    pub fn hierarchy_members(&self, hierarchy: HierarchyId) -> Vec<MemberId> {
        let h = self.hierarchy(hierarchy);
        let mut out = Vec::new();
        let roots = &self.level(h.levels[0]).members;
        for root in roots {
            self.push_preorder(*root, &mut out);
        }
        out
    }

    fn push_preorder(&self, member: MemberId, out: &mut Vec<MemberId>) {
        out.push(member);
        if let Some(m) = self.member(member) {
            for child in &m.children {
                self.push_preorder(*child, out);
            }
        }
    }

    /// Ancestor of `member` at `level`, the member itself if it is at that level, or `None`
    /// when `level` is below the member.
    pub fn ancestor_at_level(&self, member: MemberId, level: LevelId) -> Option<MemberId> {
        let target_depth = self.level(level).depth;
        let mut current = self.member(member)?;
        if self.level(current.level).depth < target_depth {
            return None;
        }
        while current.level != level {
            current = self.member(current.parent?)?;
        }
        Some(current.id)
    }

    /// Whether `ancestor` is `member` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: MemberId, member: MemberId) -> bool {
        let mut current = Some(member);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.member(id).and_then(|m| m.parent);
        }
        false
    }

    /// The member `offset` positions away within the same level (negative = earlier), or the
    /// hierarchy's null member when that runs off the level.
    pub fn member_at_offset(&self, member: MemberId, offset: i64) -> Option<MemberId> {
        let m = self.member(member)?;
        let level = self.level(m.level);
        let target = m.position as i64 + offset;
        if target < 0 || target >= level.members.len() as i64 {
            return Some(self.hierarchy(m.hierarchy).null_member);
        }
        Some(level.members[target as usize])
    }

    /// Descendants of `member` at `level`, in hierarchical order.
    pub fn descendants_at_level(&self, member: MemberId, level: LevelId) -> Vec<MemberId> {
        let Some(m) = self.member(member) else {
            return Vec::new();
        };
        let target_depth = self.level(level).depth;
        let own_depth = self.level(m.level).depth;
        if target_depth < own_depth {
            return Vec::new();
        }
        let mut frontier = vec![member];
        for _ in own_depth..target_depth {
            frontier = frontier
                .iter()
                .filter_map(|id| self.member(*id))
                .flat_map(|m| m.children.iter().copied())
                .collect();
        }
        frontier
    }

    /// Key path from the hierarchy's first non-All level down to `member`.
    pub fn key_path(&self, member: MemberId) -> Vec<(LevelId, Value)> {
        let mut path = Vec::new();
        let mut current = self.member(member);
        while let Some(m) = current {
            if m.kind == MemberKind::Regular {
                path.push((m.level, m.key.clone()));
            }
            current = m.parent.and_then(|p| self.member(p));
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::food_mart;
    use pretty_assertions::assert_eq;

    #[test]
    fn measures_hierarchy_is_first() {
        let (schema, ids) = food_mart();
        let hierarchies = schema.cube_hierarchies(ids.cube);
        assert_eq!(hierarchies[0], schema.measures_hierarchy(ids.cube));
        assert!(schema.hierarchy(hierarchies[0]).is_measures);
    }

    #[test]
    fn ancestors_and_offsets_follow_level_order() {
        let (schema, ids) = food_mart();
        assert_eq!(schema.ancestor_at_level(ids.q2_1997, ids.year), Some(ids.y1997));
        assert_eq!(schema.ancestor_at_level(ids.y1997, ids.quarter), None);
        assert_eq!(schema.member_at_offset(ids.q1_1998, -1), Some(ids.q4_1997));
        let null = schema.hierarchy(ids.time).null_member;
        assert_eq!(schema.member_at_offset(ids.y1997, -1), Some(null));
    }

    #[test]
    fn unique_name_lookup_is_case_insensitive() {
        let (schema, ids) = food_mart();
        assert_eq!(
            schema.member_by_unique_name(ids.cube, "[time].[1997].[q2]"),
            Some(ids.q2_1997)
        );
    }

    #[test]
    fn key_path_skips_all_member() {
        let (schema, ids) = food_mart();
        let path = schema.key_path(ids.q2_1997);
        assert_eq!(
            path,
            vec![(ids.year, 1997.into()), (ids.quarter, "Q2".into())]
        );
    }
}
