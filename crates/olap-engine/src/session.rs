//! Query compilation and execution against one connection provider.
use std::sync::Arc;

use olap_model::{HierarchyId, Schema};
use olap_sql::{
    CachingStatistics, ChainedStatistics, ConnectionProvider, Dialect, StatisticsProvider,
};

use crate::aggregation::{AggregationManager, BatchingCellReader, CellReader, DirectCellReader};
use crate::calc::Tuple;
use crate::cancel::ExecutionHandle;
use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::context::EvalContext;
use crate::error::{OlapError, OlapResult};
use crate::evaluator::Evaluator;
use crate::members::MemberCatalog;
use crate::query::{Axis, Cell, CellSet, CompiledAxis, CompiledQuery, Position, Query};
use crate::types::Category;

/// Entry point for embedders. Cheap to share: every service is behind an `Arc`, and the
/// segment cache is shared by all queries of the session.
pub struct Session {
    schema: Arc<Schema>,
    manager: Arc<AggregationManager>,
    stats: Arc<dyn StatisticsProvider>,
    config: EngineConfig,
}

impl Session {
    /// Ask the backend once for its dialect; statistics come from metadata, then counting
    /// queries, memoized for the session.
    pub fn new(
        schema: Arc<Schema>,
        connections: Arc<dyn ConnectionProvider>,
        config: EngineConfig,
    ) -> OlapResult<Self> {
        let stats: Arc<dyn StatisticsProvider> =
            Arc::new(CachingStatistics::new(ChainedStatistics::standard()));
        Self::with_statistics(schema, connections, stats, config)
    }

    pub fn with_statistics(
        schema: Arc<Schema>,
        connections: Arc<dyn ConnectionProvider>,
        stats: Arc<dyn StatisticsProvider>,
        config: EngineConfig,
    ) -> OlapResult<Self> {
        config.validate()?;
        let dialect = connections.acquire()?.dialect();
        log::debug!(
            "session on schema {} uses the {:?} dialect",
            schema.name(),
            dialect.kind
        );
        let manager = Arc::new(AggregationManager::new(
            Arc::clone(&schema),
            connections,
            dialect,
            Arc::clone(&stats),
            &config,
        ));
        Ok(Self {
            schema,
            manager,
            stats,
            config,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn dialect(&self) -> &Dialect {
        self.manager.dialect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<AggregationManager> {
        &self.manager
    }

    pub fn statistics(&self) -> &Arc<dyn StatisticsProvider> {
        &self.stats
    }

    /// SQL statements executed on behalf of this session so far.
    pub fn statement_count(&self) -> u64 {
        self.manager.statement_count()
    }

    /// Drop cached segments of a cube, e.g. after its fact table changed.
    pub fn flush(&self, cube: &str) -> OlapResult<()> {
        let cube = self
            .schema
            .cube_by_name(cube)
            .ok_or_else(|| OlapError::UnknownCube(cube.to_string()))?;
        self.manager.flush(cube.id);
        Ok(())
    }

    pub fn compile(&self, query: &Query) -> OlapResult<CompiledQuery> {
        let cube = self
            .schema
            .cube_by_name(&query.cube)
            .ok_or_else(|| OlapError::UnknownCube(query.cube.clone()))?
            .id;
        let mut compiler = Compiler::new(&self.schema, cube, &self.config);

        let mut declared = Vec::with_capacity(query.calculated_members.len());
        for def in &query.calculated_members {
            let hierarchy = self
                .schema
                .hierarchy_by_unique_name(cube, &def.hierarchy)
                .ok_or_else(|| OlapError::UnknownObject(def.hierarchy.clone()))?;
            declared.push(compiler.declare_member(
                hierarchy,
                &def.name,
                def.parent.as_deref(),
                def.solve_order,
            )?);
        }
        for (member, def) in declared.into_iter().zip(&query.calculated_members) {
            compiler.define_formula(member, &def.formula)?;
        }

        let axes = query
            .axes
            .iter()
            .map(|axis| -> OlapResult<CompiledAxis> {
                Ok(CompiledAxis {
                    set: compiler.compile_as(&axis.expression, Category::Set)?,
                    non_empty: axis.non_empty,
                })
            })
            .collect::<OlapResult<Vec<_>>>()?;
        let slicer = query
            .slicer
            .as_ref()
            .map(|s| compiler.compile_as(s, Category::Tuple))
            .transpose()?;

        let mut seen: Vec<HierarchyId> = Vec::new();
        let placed = axes
            .iter()
            .map(|a| a.set.ty.known_hierarchies())
            .chain(slicer.iter().map(|s| s.ty.known_hierarchies()));
        for hierarchies in placed {
            for h in &hierarchies {
                if seen.contains(h) {
                    return Err(OlapError::HierarchyOnMultipleAxes {
                        hierarchy: compiler.hierarchy_name(*h),
                    });
                }
            }
            seen.extend(hierarchies);
        }

        Ok(CompiledQuery {
            cube,
            overlay: compiler.into_overlay(),
            axes,
            slicer,
        })
    }

    /// Evaluate a compiled query. Cell misses of each pass are loaded as one batch and the pass
    /// is repeated until it reads nothing new.
    pub fn execute(&self, query: &CompiledQuery, handle: &ExecutionHandle) -> OlapResult<CellSet> {
        handle.check()?;
        let cells = if self.config.batch_cell_requests {
            let mut reader = BatchingCellReader::new(&self.manager);
            let mut converged = None;
            for pass in 1..=self.config.max_eval_passes {
                let cells = self.evaluate(query, &mut reader, handle)?;
                if !reader.is_dirty() {
                    log::debug!(
                        "query converged after {pass} pass(es) over {} segment(s)",
                        reader.pinned_count()
                    );
                    converged = Some(cells);
                    break;
                }
                let pending = reader.take_pending();
                log::debug!("pass {pass} missed {} cell(s)", pending.len());
                let loaded = self.manager.load(&pending, handle)?;
                reader.pin(loaded);
            }
            converged.ok_or(OlapError::TooManyPasses {
                passes: self.config.max_eval_passes,
            })?
        } else {
            let mut reader = DirectCellReader::new(&self.manager);
            self.evaluate(query, &mut reader, handle)?
        };
        Ok(remove_empty(cells, query))
    }

    fn evaluate(
        &self,
        query: &CompiledQuery,
        reader: &mut dyn CellReader,
        handle: &ExecutionHandle,
    ) -> OlapResult<CellSet> {
        let catalog = MemberCatalog::new(&self.schema, &query.overlay);
        let context = EvalContext::new(&self.schema, query.cube);
        let mut ev = Evaluator::new(catalog, context, reader, handle, &self.config);

        if let Some(slicer) = &query.slicer {
            let tuple = ev.eval_tuple(slicer)?;
            ev.set_tuple(&tuple)?;
        }
        let axes: Vec<Vec<Tuple>> = query
            .axes
            .iter()
            .map(|axis| ev.eval_list(&axis.set))
            .collect::<OlapResult<_>>()?;

        let total: usize = axes.iter().map(Vec::len).product();
        let mut cells = Vec::with_capacity(total);
        let mut coords = vec![0usize; axes.len()];
        for _ in 0..total {
            let value = ev.scoped(|ev| {
                for (axis, i) in axes.iter().zip(&coords) {
                    ev.set_tuple(&axis[*i])?;
                }
                ev.cell_value()
            });
            cells.push(match value {
                Ok(value) => Cell::value(value),
                Err(err) if err.is_fatal() || self.config.fail_fast => return Err(err),
                Err(err) => {
                    log::warn!("cell {coords:?} failed: {err}");
                    Cell::error(err.to_string())
                }
            });
            advance(&mut coords, &axes);
        }

        Ok(CellSet {
            axes: axes
                .into_iter()
                .map(|tuples| Axis {
                    positions: tuples
                        .into_iter()
                        .map(|members| Position {
                            unique_names: members
                                .iter()
                                .map(|m| catalog.unique_name(*m).to_string())
                                .collect(),
                            members,
                        })
                        .collect(),
                })
                .collect(),
            cells,
        })
    }
}

/// Step `coords` to the next cell, first axis fastest.
fn advance(coords: &mut [usize], axes: &[Vec<Tuple>]) {
    for (coord, axis) in coords.iter_mut().zip(axes) {
        *coord += 1;
        if *coord < axis.len() {
            return;
        }
        *coord = 0;
    }
}

/// Drop positions of `NON EMPTY` axes whose cells are all empty across the other axes.
fn remove_empty(cells: CellSet, query: &CompiledQuery) -> CellSet {
    if !query.axes.iter().any(|a| a.non_empty) {
        return cells;
    }
    let lens: Vec<usize> = cells.axes.iter().map(Axis::len).collect();
    let mut keep: Vec<Vec<bool>> = lens
        .iter()
        .zip(&query.axes)
        .map(|(len, axis)| vec![!axis.non_empty; *len])
        .collect();
    let mut coords = vec![0usize; lens.len()];
    for cell in &cells.cells {
        if !cell.is_empty() {
            for (axis, coord) in coords.iter().enumerate() {
                keep[axis][*coord] = true;
            }
        }
        for (coord, len) in coords.iter_mut().zip(&lens) {
            *coord += 1;
            if *coord < *len {
                break;
            }
            *coord = 0;
        }
    }

    let kept: Vec<Vec<usize>> = keep
        .iter()
        .map(|k| (0..k.len()).filter(|i| k[*i]).collect())
        .collect();
    let total: usize = kept.iter().map(Vec::len).product();
    let mut out = Vec::with_capacity(total);
    let mut new_coords = vec![0usize; kept.len()];
    for _ in 0..total {
        let old: Vec<usize> = new_coords
            .iter()
            .zip(&kept)
            .map(|(i, positions)| positions[*i])
            .collect();
        if let Some(cell) = cells.cell(&old) {
            out.push(cell.clone());
        }
        for (coord, positions) in new_coords.iter_mut().zip(&kept) {
            *coord += 1;
            if *coord < positions.len() {
                break;
            }
            *coord = 0;
        }
    }

    let axes = cells
        .axes
        .into_iter()
        .zip(&kept)
        .map(|(axis, positions)| Axis {
            positions: positions
                .iter()
                .filter_map(|i| axis.positions.get(*i).cloned())
                .collect(),
        })
        .collect();
    CellSet { axes, cells: out }
}
