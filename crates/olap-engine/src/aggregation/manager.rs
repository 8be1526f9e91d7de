//! Turns batches of cell requests into segment loads.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use olap_model::{CubeId, HierarchyId, MeasureId, Schema, Value};
use olap_sql::{ConnectionProvider, Dialect, SqlError, Statement, StatisticsProvider};

use crate::aggregation::cache::{EvictionPolicy, SegmentCache};
use crate::aggregation::request::{CellRequest, Levels};
use crate::aggregation::segment::{Segment, SegmentAxis, SegmentKey};
use crate::aggregation::selector::{choose_source, Source};
use crate::aggregation::sql_gen::{segment_query, MEASURE_ALIAS};
use crate::cancel::ExecutionHandle;
use crate::config::EngineConfig;
use crate::error::{OlapError, OlapResult};
use crate::parallel;

/// Shared by every query of a session. Owns the segment cache.
pub struct AggregationManager {
    schema: Arc<Schema>,
    connections: Arc<dyn ConnectionProvider>,
    dialect: Dialect,
    stats: Arc<dyn StatisticsProvider>,
    cache: SegmentCache,
    use_aggregate_tables: bool,
    statements: AtomicU64,
}

impl AggregationManager {
    pub fn new(
        schema: Arc<Schema>,
        connections: Arc<dyn ConnectionProvider>,
        dialect: Dialect,
        stats: Arc<dyn StatisticsProvider>,
        config: &EngineConfig,
    ) -> Self {
        let eviction = match config.max_cached_segments {
            Some(max) => EvictionPolicy::MaxSegments(max),
            None => EvictionPolicy::NoEviction,
        };
        Self {
            schema,
            connections,
            dialect,
            stats,
            cache: SegmentCache::new(eviction, Duration::from_millis(config.cache_wait_slice_ms)),
            use_aggregate_tables: config.use_aggregate_tables,
            statements: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// SQL statements executed so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    pub fn lookup(&self, request: &CellRequest) -> Option<Value> {
        self.cache.lookup(request)
    }

    pub fn flush(&self, cube: CubeId) {
        log::debug!("flushing segments of cube {}", self.schema.cube(cube).name);
        self.cache.flush(cube);
    }

    /// Completed segment covering `request`, if the cache still holds one.
    pub fn segment_for(&self, request: &CellRequest) -> Option<Arc<Segment>> {
        self.cache.segment_for(request)
    }

    /// Load every request not yet cached, one segment per (measure, level set).
    ///
    /// Returns the loaded segments. The cache may evict them as soon as they are published,
    /// so a caller that needs the cells should read them from the returned segments.
    pub fn load(
        &self,
        requests: &[CellRequest],
        handle: &ExecutionHandle,
    ) -> OlapResult<Vec<Arc<Segment>>> {
        let keys = self.segment_keys(requests);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("loading {} segment(s) for {} request(s)", keys.len(), requests.len());
        parallel::map_all(&keys, |key| {
            self.cache
                .get_or_compute(key, handle, || self.load_segment(key, handle))
        })
        .into_iter()
        .collect()
    }

    /// Group uncached requests into segment keys.
    ///
    /// A hierarchy constraining one level yields a column axis over the requested keys; one
    /// constraining several levels yields a compound axis over the exact key combinations.
    pub fn segment_keys(&self, requests: &[CellRequest]) -> Vec<SegmentKey> {
        let mut groups: AHashMap<(CubeId, MeasureId, Levels), Vec<&CellRequest>> = AHashMap::new();
        let mut order = Vec::new();
        let mut seen = AHashSet::new();
        for request in requests {
            if !seen.insert(request) || self.cache.lookup(request).is_some() {
                continue;
            }
            let group = (request.cube, request.measure, request.levels());
            groups
                .entry(group.clone())
                .or_insert_with(|| {
                    order.push(group);
                    Vec::new()
                })
                .push(request);
        }

        order
            .into_iter()
            .filter_map(|group| {
                let members = groups.remove(&group)?;
                let (cube, measure, levels) = group;
                let axes = self.axes(&levels, &members);
                Some(SegmentKey {
                    cube,
                    measure,
                    levels,
                    axes,
                })
            })
            .collect()
    }

    fn axes(&self, levels: &Levels, requests: &[&CellRequest]) -> Vec<SegmentAxis> {
        let mut by_hierarchy: Vec<(HierarchyId, Vec<usize>)> = Vec::new();
        for (i, level) in levels.iter().enumerate() {
            let h = self.schema.level(*level).hierarchy;
            match by_hierarchy.iter_mut().find(|(id, _)| *id == h) {
                Some((_, positions)) => positions.push(i),
                None => by_hierarchy.push((h, vec![i])),
            }
        }
        by_hierarchy
            .into_iter()
            .map(|(_, positions)| {
                let mut rows: Vec<Vec<Value>> = requests
                    .iter()
                    .map(|r| positions.iter().map(|&p| r.constraints[p].1.clone()).collect())
                    .collect();
                rows.sort();
                rows.dedup();
                match positions.as_slice() {
                    [single] => SegmentAxis::Column {
                        level: levels[*single],
                        values: rows.into_iter().flatten().collect(),
                    },
                    _ => SegmentAxis::Compound {
                        levels: positions.iter().map(|&p| levels[p]).collect(),
                        rows,
                    },
                }
            })
            .collect()
    }

    fn load_segment(&self, key: &SegmentKey, handle: &ExecutionHandle) -> OlapResult<Segment> {
        handle.check()?;
        let cube = self.schema.cube(key.cube);
        let source = if self.use_aggregate_tables {
            choose_source(
                &self.schema,
                cube,
                key.measure,
                &key.levels,
                self.stats.as_ref(),
                self.connections.as_ref(),
            )
        } else {
            Source::Fact
        };
        let query = segment_query(&self.schema, key, source, &self.dialect)?;
        let statement = Statement::new(query, &self.dialect)?;
        let n = self.statements.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!(
            "segment statement #{n} on {} ({} cells):\n{}",
            source.name(cube),
            key.cell_count(),
            statement.sql
        );

        let rows = {
            let mut connection = self.connections.acquire()?;
            connection.execute(&statement)?
        };
        let width = key.levels.len();
        let measure_col = rows.column_index(MEASURE_ALIAS).ok_or_else(|| {
            SqlError::MalformedResult(format!("segment result lacks column {MEASURE_ALIAS}"))
        })?;
        let mut segment = Segment::new(key.clone());
        for row in rows.rows {
            if row.len() <= width.max(measure_col) {
                return Err(OlapError::Backend(SqlError::MalformedResult(format!(
                    "segment row has {} values, expected {}",
                    row.len(),
                    width + 1
                ))));
            }
            let value = row[measure_col].clone();
            segment.insert(row[..width].to_vec(), value);
        }
        if handle.is_cancelled() {
            log::debug!("statement #{n} finished after its query was cancelled");
        }
        Ok(segment)
    }
}
