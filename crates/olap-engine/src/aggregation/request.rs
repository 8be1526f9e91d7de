use std::fmt;

use olap_model::{CubeId, LevelId, MeasureId, MemberId, MemberKind, Schema, Value};
use smallvec::SmallVec;

pub type Levels = SmallVec<[LevelId; 4]>;

/// One stored cell: a measure constrained by level key values.
///
/// Constraints are kept sorted by level so equal coordinates produce equal requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRequest {
    pub cube: CubeId,
    pub measure: MeasureId,
    pub constraints: SmallVec<[(LevelId, Value); 4]>,
}

impl CellRequest {
    /// Request for a coordinate of stored members, or `None` when the coordinate cannot hold
    /// data (a null member, or no stored measure).
    ///
    /// An All member constrains nothing. A member of a level whose keys are only unique under
    /// their parent also constrains its ancestors up to the first uniquely keyed level.
    pub fn for_coordinate(schema: &Schema, cube: CubeId, members: &[MemberId]) -> Option<Self> {
        let mut measure = None;
        let mut constraints: SmallVec<[(LevelId, Value); 4]> = SmallVec::new();
        for id in members {
            let member = schema.member(*id)?;
            match member.kind {
                MemberKind::Null | MemberKind::Calculated => return None,
                MemberKind::All => {}
                MemberKind::Measure => measure = member.measure,
                MemberKind::Regular => {
                    let mut current = Some(member);
                    while let Some(m) = current {
                        if m.kind != MemberKind::Regular {
                            break;
                        }
                        constraints.push((m.level, m.key.clone()));
                        if schema.level(m.level).unique_members {
                            break;
                        }
                        current = m.parent.and_then(|p| schema.member(p));
                    }
                }
            }
        }
        constraints.sort_by_key(|(level, _)| *level);
        Some(Self {
            cube,
            measure: measure?,
            constraints,
        })
    }

    pub fn levels(&self) -> Levels {
        self.constraints.iter().map(|(level, _)| *level).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.constraints.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn value_of(&self, level: LevelId) -> Option<&Value> {
        self.constraints
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for CellRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.measure)?;
        for (level, value) in &self.constraints {
            write!(f, " {level}={value}")?;
        }
        Ok(())
    }
}
