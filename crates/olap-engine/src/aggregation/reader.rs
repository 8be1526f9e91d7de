//! How the evaluator obtains stored cell values.
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use olap_model::{CubeId, MeasureId, Value};

use crate::aggregation::manager::AggregationManager;
use crate::aggregation::request::{CellRequest, Levels};
use crate::aggregation::segment::Segment;
use crate::cancel::ExecutionHandle;
use crate::error::{OlapError, OlapResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellLookup {
    Ready(Value),
    /// Not loaded yet; the request was recorded for the next batch.
    Pending,
}

pub trait CellReader {
    fn read(&mut self, request: &CellRequest, handle: &ExecutionHandle) -> OlapResult<CellLookup>;
}

/// Reader for contexts that must not touch stored data, such as constant folding.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCells;

impl CellReader for NoCells {
    fn read(&mut self, request: &CellRequest, _handle: &ExecutionHandle) -> OlapResult<CellLookup> {
        Err(OlapError::eval(format!("cell {request} read outside a query")))
    }
}

/// Segments held for the lifetime of one execution, whatever the cache evicts meanwhile.
#[derive(Default)]
struct PinnedSegments {
    by_levels: AHashMap<(CubeId, MeasureId, Levels), Vec<Arc<Segment>>>,
}

impl PinnedSegments {
    fn get(&self, request: &CellRequest) -> Option<Value> {
        let segments = self
            .by_levels
            .get(&(request.cube, request.measure, request.levels()))?;
        segments.iter().find_map(|segment| segment.get(request))
    }

    fn pin(&mut self, segment: Arc<Segment>) {
        let key = &segment.key;
        let segments = self
            .by_levels
            .entry((key.cube, key.measure, key.levels.clone()))
            .or_default();
        if !segments.iter().any(|s| Arc::ptr_eq(s, &segment)) {
            segments.push(segment);
        }
    }

    fn len(&self) -> usize {
        self.by_levels.values().map(Vec::len).sum()
    }
}

/// Answers from the segment cache and records misses for one batched load.
///
/// Every segment the reader answers from, or is handed by [`BatchingCellReader::pin`], stays
/// readable until the reader is dropped.
pub struct BatchingCellReader<'m> {
    manager: &'m AggregationManager,
    pinned: PinnedSegments,
    seen: AHashSet<CellRequest>,
    pending: Vec<CellRequest>,
}

impl<'m> BatchingCellReader<'m> {
    pub fn new(manager: &'m AggregationManager) -> Self {
        Self {
            manager,
            pinned: PinnedSegments::default(),
            seen: AHashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Whether the current pass hit uncached cells.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Requests recorded since the last call, in first-seen order.
    pub fn take_pending(&mut self) -> Vec<CellRequest> {
        self.seen.clear();
        std::mem::take(&mut self.pending)
    }

    /// Keep `segments` readable for the rest of this execution.
    pub fn pin(&mut self, segments: impl IntoIterator<Item = Arc<Segment>>) {
        for segment in segments {
            self.pinned.pin(segment);
        }
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }
}

impl CellReader for BatchingCellReader<'_> {
    fn read(&mut self, request: &CellRequest, handle: &ExecutionHandle) -> OlapResult<CellLookup> {
        handle.check()?;
        if let Some(value) = self.pinned.get(request) {
            return Ok(CellLookup::Ready(value));
        }
        if let Some(segment) = self.manager.segment_for(request) {
            let value = segment.get(request).unwrap_or(Value::Null);
            self.pinned.pin(segment);
            return Ok(CellLookup::Ready(value));
        }
        if self.seen.insert(request.clone()) {
            log::trace!("cell miss {request}");
            self.pending.push(request.clone());
        }
        Ok(CellLookup::Pending)
    }
}

/// Loads each miss as soon as it is seen.
pub struct DirectCellReader<'m> {
    manager: &'m AggregationManager,
    pinned: PinnedSegments,
}

impl<'m> DirectCellReader<'m> {
    pub fn new(manager: &'m AggregationManager) -> Self {
        Self {
            manager,
            pinned: PinnedSegments::default(),
        }
    }
}

impl CellReader for DirectCellReader<'_> {
    fn read(&mut self, request: &CellRequest, handle: &ExecutionHandle) -> OlapResult<CellLookup> {
        handle.check()?;
        if let Some(value) = self.pinned.get(request) {
            return Ok(CellLookup::Ready(value));
        }
        let segments = match self.manager.segment_for(request) {
            Some(segment) => vec![segment],
            None => self.manager.load(std::slice::from_ref(request), handle)?,
        };
        for segment in segments {
            self.pinned.pin(segment);
        }
        let value = self
            .pinned
            .get(request)
            .or_else(|| self.manager.lookup(request))
            .unwrap_or(Value::Null);
        Ok(CellLookup::Ready(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::food_mart;
    use olap_sql::{Dialect, DialectKind, FixedStatistics, InMemoryDatabase};
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    use crate::config::EngineConfig;

    #[test]
    fn misses_are_recorded_once() {
        let (schema, ids) = food_mart();
        let manager = AggregationManager::new(
            Arc::new(schema),
            Arc::new(InMemoryDatabase::default()),
            Dialect::for_kind(DialectKind::Ansi),
            Arc::new(FixedStatistics::new()),
            &EngineConfig::default(),
        );
        let request = CellRequest {
            cube: ids.cube,
            measure: ids.unit_sales,
            constraints: smallvec![(ids.year, Value::from(1997))],
        };
        let handle = ExecutionHandle::new();
        let mut reader = BatchingCellReader::new(&manager);
        assert_eq!(reader.read(&request, &handle), Ok(CellLookup::Pending));
        assert_eq!(reader.read(&request, &handle), Ok(CellLookup::Pending));
        assert!(reader.is_dirty());
        assert_eq!(reader.take_pending(), vec![request]);
        assert!(!reader.is_dirty());
        assert_eq!(manager.statement_count(), 0);
    }

    #[test]
    fn pinned_segments_answer_without_the_cache() {
        let (schema, ids) = food_mart();
        let manager = AggregationManager::new(
            Arc::new(schema),
            Arc::new(InMemoryDatabase::default()),
            Dialect::for_kind(DialectKind::Ansi),
            Arc::new(FixedStatistics::new()),
            &EngineConfig::default(),
        );
        let request = CellRequest {
            cube: ids.cube,
            measure: ids.unit_sales,
            constraints: smallvec![(ids.year, Value::from(1997))],
        };
        let other_year = CellRequest {
            constraints: smallvec![(ids.year, Value::from(1998))],
            ..request.clone()
        };
        let key = manager.segment_keys(std::slice::from_ref(&request)).remove(0);
        let mut segment = Segment::new(key);
        segment.insert(vec![Value::from(1997)], Value::from(7));

        let handle = ExecutionHandle::new();
        let mut reader = BatchingCellReader::new(&manager);
        reader.pin([Arc::new(segment)]);
        assert_eq!(reader.pinned_count(), 1);
        assert_eq!(reader.read(&request, &handle), Ok(CellLookup::Ready(Value::from(7))));
        assert_eq!(reader.read(&other_year, &handle), Ok(CellLookup::Pending));
        assert!(manager.cache().lookup(&request).is_none());
        assert_eq!(manager.statement_count(), 0);
    }

    #[test]
    fn no_cells_refuses_reads() {
        let (_, ids) = food_mart();
        let request = CellRequest {
            cube: ids.cube,
            measure: ids.unit_sales,
            constraints: smallvec![],
        };
        assert!(NoCells.read(&request, &ExecutionHandle::new()).is_err());
    }
}
