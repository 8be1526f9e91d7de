//! Construction API used by schema loaders.
//!
//! Loaders (XML mappings, catalogs read from a database, test fixtures) describe the catalog
//! incrementally; [`SchemaBuilder::build`] then orders members hierarchically, assigns default
//! members and validates the structural invariants before handing out an immutable [`Schema`].
use crate::error::{ModelError, ModelResult};
use crate::schema::{
    normalize_name, Cube, CubeId, Dimension, DimensionId, Hierarchy, HierarchyId, Level, LevelId,
    Measure, MeasureId, Member, MemberId, MemberKind, Schema,
};
use crate::star::{AggregateTable, Aggregator};
use crate::value::{cmp_values, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Description of a hierarchy and its star-schema mapping.
#[derive(Clone, Debug)]
pub struct HierarchyDef {
    /// Hierarchy name; `None` uses the dimension name.
    pub name: Option<String>,
    pub has_all: bool,
    pub all_member_name: Option<String>,
    pub table: Option<String>,
    pub primary_key: Option<String>,
    pub foreign_key: Option<String>,
}

impl HierarchyDef {
    /// A hierarchy whose level columns live directly on the fact table.
    pub fn degenerate() -> Self {
        Self {
            name: None,
            has_all: true,
            all_member_name: None,
            table: None,
            primary_key: None,
            foreign_key: None,
        }
    }

    /// A hierarchy stored in its own dimension table, joined to the fact table.
    pub fn joined(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            has_all: true,
            all_member_name: None,
            table: Some(table.into()),
            primary_key: Some(primary_key.into()),
            foreign_key: Some(foreign_key.into()),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn without_all(mut self) -> Self {
        self.has_all = false;
        self
    }

    pub fn with_all_member_name(mut self, name: impl Into<String>) -> Self {
        self.all_member_name = Some(name.into());
        self
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                name: name.into(),
                cubes: Vec::new(),
                dimensions: Vec::new(),
                hierarchies: Vec::new(),
                levels: Vec::new(),
                members: Vec::new(),
                measures: Vec::new(),
                cube_index: HashMap::new(),
                member_index: HashMap::new(),
                hierarchy_index: HashMap::new(),
                level_index: HashMap::new(),
            },
        }
    }

    /// Add a cube over `fact_table`. The cube's Measures dimension is created alongside.
    pub fn add_cube(
        &mut self,
        name: impl Into<String>,
        fact_table: impl Into<String>,
    ) -> ModelResult<CubeId> {
        let name = name.into();
        let key = normalize_name(&name);
        if self.schema.cube_index.contains_key(&key) {
            return Err(ModelError::DuplicateCube(name));
        }
        let id = CubeId(self.schema.cubes.len() as u32);
        self.schema.cubes.push(Cube {
            id,
            name,
            fact_table: fact_table.into(),
            dimensions: Vec::new(),
            measures: Vec::new(),
            aggregate_tables: Vec::new(),
        });
        self.schema.cube_index.insert(key, id);

        let dim = self.push_dimension(id, "Measures", true)?;
        let hierarchy = self.push_hierarchy(dim, HierarchyDef::degenerate().without_all(), true)?;
        self.push_level(hierarchy, "MeasuresLevel", None, true)?;
        Ok(id)
    }

    pub fn add_dimension(
        &mut self,
        cube: CubeId,
        name: impl Into<String>,
    ) -> ModelResult<DimensionId> {
        self.check_cube(cube)?;
        self.push_dimension(cube, &name.into(), false)
    }

    pub fn add_hierarchy(
        &mut self,
        dimension: DimensionId,
        def: HierarchyDef,
    ) -> ModelResult<HierarchyId> {
        if dimension.index() >= self.schema.dimensions.len() {
            return Err(ModelError::UnknownId(dimension.to_string()));
        }
        self.push_hierarchy(dimension, def, false)
    }

    pub fn add_level(
        &mut self,
        hierarchy: HierarchyId,
        name: impl Into<String>,
        column: impl Into<String>,
        unique_members: bool,
    ) -> ModelResult<LevelId> {
        if hierarchy.index() >= self.schema.hierarchies.len() {
            return Err(ModelError::UnknownId(hierarchy.to_string()));
        }
        self.push_level(hierarchy, &name.into(), Some(column.into()), unique_members)
    }

    /// Add a member to `level`. Members of the first non-All level take `parent = None`; the
    /// All member (if any) becomes their parent automatically.
    pub fn add_member(
        &mut self,
        level: LevelId,
        parent: Option<MemberId>,
        key: impl Into<Value>,
        name: impl Into<String>,
    ) -> ModelResult<MemberId> {
        let key = key.into();
        let name = name.into();
        let level_ref = self
            .schema
            .levels
            .get(level.index())
            .ok_or_else(|| ModelError::UnknownId(level.to_string()))?;
        let level_name = level_ref.unique_name.clone();
        if level_ref.is_all {
            return Err(ModelError::AllLevelMember { level: level_name });
        }
        let hierarchy = &self.schema.hierarchies[level_ref.hierarchy.index()];
        let (hierarchy_id, dimension, is_measures) =
            (hierarchy.id, hierarchy.dimension, hierarchy.is_measures);
        let hierarchy_name = hierarchy.unique_name.clone();
        let all_member = hierarchy.all_member;
        let position = hierarchy
            .levels
            .iter()
            .position(|l| *l == level)
            .unwrap_or_default();
        let first_regular = usize::from(hierarchy.has_all);
        let expected = position
            .checked_sub(1)
            .map(|above| hierarchy.levels[above]);

        let parent = if position == first_regular {
            if let Some(p) = parent {
                return Err(ModelError::ParentLevelMismatch {
                    member: name,
                    parent: self.member_name(p),
                    level: level_name,
                });
            }
            all_member
        } else {
            let expected = expected.ok_or_else(|| ModelError::UnknownId(level.to_string()))?;
            let Some(p) = parent else {
                return Err(ModelError::MissingParent {
                    member: name,
                    level: level_name,
                    expected: self.schema.levels[expected.index()].unique_name.clone(),
                });
            };
            let parent_level = self
                .schema
                .members
                .get(p.index())
                .map(|m| m.level)
                .ok_or_else(|| ModelError::UnknownId(p.to_string()))?;
            if parent_level != expected {
                return Err(ModelError::ParentLevelMismatch {
                    member: name,
                    parent: self.member_name(p),
                    level: level_name,
                });
            }
            Some(p)
        };

        let prefix = match parent.and_then(|p| self.schema.members.get(p.index())) {
            Some(p) if p.kind == MemberKind::Regular => p.unique_name.clone(),
            _ => hierarchy_name,
        };
        let unique_name = format!("{prefix}.[{name}]");
        let kind = if is_measures {
            MemberKind::Measure
        } else {
            MemberKind::Regular
        };
        let id = self.push_member(Member {
            id: MemberId(0),
            name,
            unique_name,
            key,
            ordinal: None,
            kind,
            level,
            hierarchy: hierarchy_id,
            dimension,
            parent,
            children: Vec::new(),
            measure: None,
            position: 0,
        })?;
        if let Some(p) = parent {
            self.schema.members[p.index()].children.push(id);
        }
        self.schema.levels[level.index()].members.push(id);
        Ok(id)
    }

    /// Set the ordinal used to order a member among its siblings (defaults to key order).
    pub fn set_ordinal(&mut self, member: MemberId, ordinal: u32) -> ModelResult<()> {
        let m = self
            .schema
            .members
            .get_mut(member.index())
            .ok_or_else(|| ModelError::UnknownId(member.to_string()))?;
        m.ordinal = Some(ordinal);
        Ok(())
    }

    pub fn add_measure(
        &mut self,
        cube: CubeId,
        name: impl Into<String>,
        column: impl Into<String>,
        aggregator: Aggregator,
    ) -> ModelResult<MeasureId> {
        self.check_cube(cube)?;
        let name = name.into();
        let cube_ref = &self.schema.cubes[cube.index()];
        let duplicate = cube_ref
            .measures
            .iter()
            .any(|m| normalize_name(&self.schema.measures[m.index()].name) == normalize_name(&name));
        if duplicate {
            return Err(ModelError::DuplicateMeasure {
                cube: cube_ref.name.clone(),
                name,
            });
        }
        let measures_dim = cube_ref.dimensions[0];
        let measures_hierarchy = self.schema.dimensions[measures_dim.index()].hierarchies[0];
        let level = self.schema.hierarchies[measures_hierarchy.index()].levels[0];

        let member = self.add_member(level, None, name.as_str(), name.clone())?;
        let id = MeasureId(self.schema.measures.len() as u32);
        self.schema.measures.push(Measure {
            id,
            name,
            cube,
            member,
            column: column.into(),
            aggregator,
        });
        self.schema.members[member.index()].measure = Some(id);
        self.schema.members[member.index()].ordinal = Some(id.0);
        self.schema.cubes[cube.index()].measures.push(id);
        Ok(id)
    }

    pub fn add_aggregate_table(&mut self, cube: CubeId, table: AggregateTable) -> ModelResult<()> {
        self.check_cube(cube)?;
        if table.measures.is_empty() {
            return Err(ModelError::InvalidAggregateTable {
                table: table.name,
                reason: "stores no measures".into(),
            });
        }
        for (measure, _) in &table.measures {
            let owner = self.schema.measures.get(measure.index()).map(|m| m.cube);
            if owner != Some(cube) {
                return Err(ModelError::InvalidAggregateTable {
                    table: table.name.clone(),
                    reason: format!("measure {measure} does not belong to the cube"),
                });
            }
        }
        for (level, _) in &table.levels {
            let owner = self
                .schema
                .levels
                .get(level.index())
                .map(|l| self.schema.hierarchies[l.hierarchy.index()].cube);
            if owner != Some(cube) {
                return Err(ModelError::InvalidAggregateTable {
                    table: table.name.clone(),
                    reason: format!("level {level} does not belong to the cube"),
                });
            }
        }
        self.schema.cubes[cube.index()].aggregate_tables.push(table);
        Ok(())
    }

    pub fn build(mut self) -> ModelResult<Schema> {
        for h in 0..self.schema.hierarchies.len() {
            self.finish_hierarchy(HierarchyId(h as u32))?;
        }
        for member in &self.schema.members {
            let levels = self.schema.hierarchies[member.hierarchy.index()].levels.len();
            let mut steps = 0usize;
            let mut current = member.parent;
            while let Some(p) = current {
                steps += 1;
                if steps > levels {
                    return Err(ModelError::AncestorChainTooLong {
                        member: member.unique_name.clone(),
                        levels,
                    });
                }
                current = self.schema.members[p.index()].parent;
            }
        }
        Ok(self.schema)
    }

    fn finish_hierarchy(&mut self, id: HierarchyId) -> ModelResult<()> {
        let levels = self.schema.hierarchies[id.index()].levels.clone();
        if levels.is_empty() {
            return Err(ModelError::EmptyHierarchy(
                self.schema.hierarchies[id.index()].unique_name.clone(),
            ));
        }
        {
            let h = &self.schema.hierarchies[id.index()];
            if h.table.is_some() && h.foreign_key.is_none() {
                return Err(ModelError::MissingForeignKey {
                    hierarchy: h.unique_name.clone(),
                });
            }
        }

        for level in &levels {
            let mut members = std::mem::take(&mut self.schema.levels[level.index()].members);
            members.sort_by(|a, b| self.sibling_order(*a, *b));
            for (pos, m) in members.iter().enumerate() {
                self.schema.members[m.index()].position = pos as u32;
            }
            self.schema.levels[level.index()].members = members;
        }
        for level in &levels {
            let members = self.schema.levels[level.index()].members.clone();
            for m in members {
                let mut children = std::mem::take(&mut self.schema.members[m.index()].children);
                children.sort_by_key(|c| self.schema.members[c.index()].position);
                self.schema.members[m.index()].children = children;
            }
        }

        let null_member = self.schema.hierarchies[id.index()].null_member;
        self.schema.members[null_member.index()].level = levels[0];

        let h = &self.schema.hierarchies[id.index()];
        let default_member = h
            .all_member
            .or_else(|| self.schema.levels[levels[0].index()].members.first().copied())
            .unwrap_or(null_member);
        self.schema.hierarchies[id.index()].default_member = default_member;
        Ok(())
    }

    fn sibling_order(&self, a: MemberId, b: MemberId) -> Ordering {
        let ma = &self.schema.members[a.index()];
        let mb = &self.schema.members[b.index()];
        let parent_pos = |m: &Member| m.parent.map(|p| self.schema.members[p.index()].position);
        parent_pos(ma)
            .cmp(&parent_pos(mb))
            .then_with(|| match (ma.ordinal, mb.ordinal) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => cmp_values(&ma.key, &mb.key),
            })
            .then_with(|| a.cmp(&b))
    }

    fn check_cube(&self, cube: CubeId) -> ModelResult<()> {
        if cube.index() >= self.schema.cubes.len() {
            return Err(ModelError::UnknownId(cube.to_string()));
        }
        Ok(())
    }

    fn member_name(&self, id: MemberId) -> String {
        self.schema
            .members
            .get(id.index())
            .map(|m| m.unique_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn push_dimension(
        &mut self,
        cube: CubeId,
        name: &str,
        is_measures: bool,
    ) -> ModelResult<DimensionId> {
        let cube_ref = &self.schema.cubes[cube.index()];
        let exists = cube_ref
            .dimensions
            .iter()
            .any(|d| normalize_name(&self.schema.dimensions[d.index()].name) == normalize_name(name));
        if exists {
            return Err(ModelError::DuplicateDimension {
                cube: cube_ref.name.clone(),
                name: name.to_string(),
            });
        }
        let id = DimensionId(self.schema.dimensions.len() as u32);
        self.schema.dimensions.push(Dimension {
            id,
            name: name.to_string(),
            unique_name: format!("[{name}]"),
            cube,
            hierarchies: Vec::new(),
            is_measures,
        });
        self.schema.cubes[cube.index()].dimensions.push(id);
        Ok(id)
    }

    fn push_hierarchy(
        &mut self,
        dimension: DimensionId,
        def: HierarchyDef,
        is_measures: bool,
    ) -> ModelResult<HierarchyId> {
        let dim = &self.schema.dimensions[dimension.index()];
        let cube = dim.cube;
        let name = def.name.clone().unwrap_or_else(|| dim.name.clone());
        let unique_name = if name == dim.name {
            format!("[{name}]")
        } else {
            format!("[{}.{name}]", dim.name)
        };
        let key = (cube, normalize_name(&unique_name));
        if self.schema.hierarchy_index.contains_key(&key) {
            return Err(ModelError::DuplicateHierarchy(unique_name));
        }
        let id = HierarchyId(self.schema.hierarchies.len() as u32);
        self.schema.hierarchies.push(Hierarchy {
            id,
            name: name.clone(),
            unique_name: unique_name.clone(),
            dimension,
            cube,
            levels: Vec::new(),
            has_all: def.has_all,
            all_member: None,
            null_member: MemberId(u32::MAX),
            default_member: MemberId(u32::MAX),
            table: def.table,
            primary_key: def.primary_key,
            foreign_key: def.foreign_key,
            is_measures,
        });
        self.schema.hierarchy_index.insert(key, id);
        self.schema.dimensions[dimension.index()].hierarchies.push(id);

        if def.has_all {
            let all_level = self.push_level(id, "(All)", None, true)?;
            self.schema.levels[all_level.index()].is_all = true;
            let all_name = def
                .all_member_name
                .unwrap_or_else(|| format!("All {name}s"));
            let all = self.push_member(Member {
                id: MemberId(0),
                unique_name: format!("{unique_name}.[{all_name}]"),
                name: all_name,
                key: Value::Null,
                ordinal: None,
                kind: MemberKind::All,
                level: all_level,
                hierarchy: id,
                dimension,
                parent: None,
                children: Vec::new(),
                measure: None,
                position: 0,
            })?;
            self.schema.levels[all_level.index()].members.push(all);
            self.schema.hierarchies[id.index()].all_member = Some(all);
        }

        let null = self.push_member(Member {
            id: MemberId(0),
            name: "#null".into(),
            unique_name: format!("{unique_name}.[#null]"),
            key: Value::Null,
            ordinal: None,
            kind: MemberKind::Null,
            level: LevelId(u32::MAX),
            hierarchy: id,
            dimension,
            parent: None,
            children: Vec::new(),
            measure: None,
            position: 0,
        })?;
        self.schema.hierarchies[id.index()].null_member = null;
        Ok(id)
    }

    fn push_level(
        &mut self,
        hierarchy: HierarchyId,
        name: &str,
        column: Option<String>,
        unique_members: bool,
    ) -> ModelResult<LevelId> {
        let h = &self.schema.hierarchies[hierarchy.index()];
        let unique_name = format!("{}.[{name}]", h.unique_name);
        let key = (h.cube, normalize_name(&unique_name));
        if self.schema.level_index.contains_key(&key) {
            return Err(ModelError::DuplicateLevel(unique_name));
        }
        let id = LevelId(self.schema.levels.len() as u32);
        let depth = h.levels.len() as u32;
        self.schema.levels.push(Level {
            id,
            name: name.to_string(),
            unique_name,
            hierarchy,
            depth,
            column,
            unique_members,
            is_all: false,
            members: Vec::new(),
        });
        self.schema.level_index.insert(key, id);
        self.schema.hierarchies[hierarchy.index()].levels.push(id);
        Ok(id)
    }

    fn push_member(&mut self, mut member: Member) -> ModelResult<MemberId> {
        let cube = self.schema.hierarchies[member.hierarchy.index()].cube;
        let key = (cube, normalize_name(&member.unique_name));
        if self.schema.member_index.contains_key(&key) {
            return Err(ModelError::DuplicateMember(member.unique_name));
        }
        let id = MemberId(self.schema.members.len() as u32);
        member.id = id;
        self.schema.members.push(member);
        self.schema.member_index.insert(key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_member_without_parent_below_first_level() {
        let mut b = SchemaBuilder::new("t");
        let cube = b.add_cube("Sales", "fact").unwrap();
        let dim = b.add_dimension(cube, "Time").unwrap();
        let h = b.add_hierarchy(dim, HierarchyDef::degenerate()).unwrap();
        let _year = b.add_level(h, "Year", "the_year", true).unwrap();
        let quarter = b.add_level(h, "Quarter", "quarter", false).unwrap();
        let err = b.add_member(quarter, None, "Q1", "Q1").unwrap_err();
        assert!(matches!(err, ModelError::MissingParent { .. }));
    }

    #[test]
    fn members_are_ordered_by_ordinal_then_key() {
        let mut b = SchemaBuilder::new("t");
        let cube = b.add_cube("Sales", "fact").unwrap();
        let dim = b.add_dimension(cube, "Store").unwrap();
        let h = b.add_hierarchy(dim, HierarchyDef::degenerate()).unwrap();
        let country = b.add_level(h, "Country", "country", true).unwrap();
        let usa = b.add_member(country, None, "USA", "USA").unwrap();
        let canada = b.add_member(country, None, "Canada", "Canada").unwrap();
        let mexico = b.add_member(country, None, "Mexico", "Mexico").unwrap();
        b.set_ordinal(usa, 0).unwrap();
        b.set_ordinal(canada, 1).unwrap();
        b.set_ordinal(mexico, 2).unwrap();
        let schema = b.build().unwrap();
        assert_eq!(schema.level(country).members, vec![usa, canada, mexico]);
        let all = schema.hierarchy(h).all_member.unwrap();
        assert_eq!(schema.member(all).unwrap().children, vec![usa, canada, mexico]);
        assert_eq!(schema.hierarchy(h).default_member, all);
    }

    #[test]
    fn duplicate_unique_names_are_rejected() {
        let mut b = SchemaBuilder::new("t");
        let cube = b.add_cube("Sales", "fact").unwrap();
        let dim = b.add_dimension(cube, "Store").unwrap();
        let h = b.add_hierarchy(dim, HierarchyDef::degenerate()).unwrap();
        let country = b.add_level(h, "Country", "country", true).unwrap();
        b.add_member(country, None, "USA", "USA").unwrap();
        let err = b.add_member(country, None, "USA", "USA").unwrap_err();
        assert_eq!(err, ModelError::DuplicateMember("[Store].[USA]".into()));
    }

    #[test]
    fn hierarchy_without_all_defaults_to_first_root() {
        let mut b = SchemaBuilder::new("t");
        let cube = b.add_cube("Sales", "fact").unwrap();
        let dim = b.add_dimension(cube, "Scenario").unwrap();
        let h = b
            .add_hierarchy(dim, HierarchyDef::degenerate().without_all())
            .unwrap();
        let level = b.add_level(h, "Scenario", "scenario", true).unwrap();
        let budget = b.add_member(level, None, "Budget", "Budget").unwrap();
        let actual = b.add_member(level, None, "Actual", "Actual").unwrap();
        let schema = b.build().unwrap();
        assert_eq!(schema.hierarchy(h).default_member, actual);
        assert_eq!(schema.level(level).members, vec![actual, budget]);
    }

    #[test]
    fn joined_hierarchy_requires_foreign_key() {
        let mut b = SchemaBuilder::new("t");
        let cube = b.add_cube("Sales", "fact").unwrap();
        let dim = b.add_dimension(cube, "Store").unwrap();
        let mut def = HierarchyDef::joined("store", "store_id", "store_id");
        def.foreign_key = None;
        let h = b.add_hierarchy(dim, def).unwrap();
        b.add_level(h, "Country", "country", true).unwrap();
        let err = b.build().unwrap_err();
        assert!(matches!(err, ModelError::MissingForeignKey { .. }));
    }
}
