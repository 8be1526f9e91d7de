//! Segments: blocks of cells for one measure over a region of level values, loaded by one
//! SQL statement.
use ahash::AHashMap;
use olap_model::{CubeId, LevelId, MeasureId, Value};

use crate::aggregation::request::{CellRequest, Levels};

/// Region constraint contributed by one hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentAxis {
    /// A single column: the sorted, de-duplicated values it may take.
    Column { level: LevelId, values: Vec<Value> },
    /// Several columns of one hierarchy: exactly these value combinations.
    Compound {
        levels: Vec<LevelId>,
        rows: Vec<Vec<Value>>,
    },
}

impl SegmentAxis {
    pub fn levels(&self) -> Vec<LevelId> {
        match self {
            SegmentAxis::Column { level, .. } => vec![*level],
            SegmentAxis::Compound { levels, .. } => levels.clone(),
        }
    }

    fn covers(&self, request: &CellRequest) -> bool {
        match self {
            SegmentAxis::Column { level, values } => request
                .value_of(*level)
                .is_some_and(|v| values.binary_search(v).is_ok()),
            SegmentAxis::Compound { levels, rows } => {
                let Some(wanted) = levels
                    .iter()
                    .map(|l| request.value_of(*l).cloned())
                    .collect::<Option<Vec<_>>>()
                else {
                    return false;
                };
                rows.contains(&wanted)
            }
        }
    }
}

/// Identity of a segment: the measure, the grouping levels and the region.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub cube: CubeId,
    pub measure: MeasureId,
    /// Grouping levels, sorted.
    pub levels: Levels,
    pub axes: Vec<SegmentAxis>,
}

impl SegmentKey {
    pub fn covers(&self, request: &CellRequest) -> bool {
        request.cube == self.cube
            && request.measure == self.measure
            && request.levels() == self.levels
            && self.axes.iter().all(|axis| axis.covers(request))
    }

    /// Cells the region spans.
    pub fn cell_count(&self) -> usize {
        self.axes
            .iter()
            .map(|axis| match axis {
                SegmentAxis::Column { values, .. } => values.len(),
                SegmentAxis::Compound { rows, .. } => rows.len(),
            })
            .product()
    }
}

/// Loaded cells of a segment, keyed by level values in [`SegmentKey::levels`] order.
#[derive(Clone, Debug)]
pub struct Segment {
    pub key: SegmentKey,
    cells: AHashMap<Vec<Value>, Value>,
}

impl Segment {
    pub fn new(key: SegmentKey) -> Self {
        Self {
            key,
            cells: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, coordinates: Vec<Value>, value: Value) {
        self.cells.insert(coordinates, value);
    }

    /// Cell value when the segment covers `request`; a covered cell without a row is empty.
    pub fn get(&self, request: &CellRequest) -> Option<Value> {
        if !self.key.covers(request) {
            return None;
        }
        Some(
            self.cells
                .get(&request.values())
                .cloned()
                .unwrap_or(Value::Null),
        )
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
