//! Choice between the fact table and a pre-aggregated table for one segment.
//!
//! A table is feasible when it stores the measure and a column for every grouping level.
//! When its levels are a strict superset of the grouping, rows must be rolled up, which
//! requires a decomposable aggregator. Among feasible tables the one with the smallest known
//! row count wins, provided it is strictly smaller than the fact table.
use olap_model::{AggregateTable, Cube, LevelId, MeasureId, Schema};
use olap_sql::{ConnectionProvider, Estimate, StatisticsProvider, StatsScope};

#[derive(Clone, Copy, Debug)]
pub enum Source<'s> {
    Fact,
    Aggregate {
        table: &'s AggregateTable,
        /// The table has levels beyond the grouping; rows are re-aggregated.
        rollup: bool,
    },
}

impl Source<'_> {
    pub fn name<'c>(&'c self, cube: &'c Cube) -> &'c str {
        match self {
            Source::Fact => &cube.fact_table,
            Source::Aggregate { table, .. } => &table.name,
        }
    }
}

fn is_feasible(
    schema: &Schema,
    table: &AggregateTable,
    measure: MeasureId,
    levels: &[LevelId],
) -> Option<bool> {
    table.measure_column(measure)?;
    if !levels.iter().all(|l| table.level_column(*l).is_some()) {
        return None;
    }
    let rollup = table.levels.len() != levels.len();
    if rollup && schema.measure(measure).aggregator.rollup().is_none() {
        return None;
    }
    Some(rollup)
}

pub fn choose_source<'s>(
    schema: &Schema,
    cube: &'s Cube,
    measure: MeasureId,
    levels: &[LevelId],
    stats: &dyn StatisticsProvider,
    connections: &dyn ConnectionProvider,
) -> Source<'s> {
    let candidates: Vec<(&AggregateTable, bool)> = cube
        .aggregate_tables
        .iter()
        .filter_map(|table| is_feasible(schema, table, measure, levels).map(|r| (table, r)))
        .collect();
    if candidates.is_empty() {
        return Source::Fact;
    }
    let Estimate::Known(fact_rows) =
        stats.estimate(connections, &StatsScope::table(cube.fact_table.clone()))
    else {
        log::debug!("fact table {} has no row estimate; not using aggregates", cube.fact_table);
        return Source::Fact;
    };

    let mut best: Option<(u64, &AggregateTable, bool)> = None;
    for (table, rollup) in candidates {
        let scope = StatsScope::table(table.name.clone());
        let Estimate::Known(rows) = stats.estimate(connections, &scope) else {
            continue;
        };
        if rows >= fact_rows {
            continue;
        }
        if best.map_or(true, |(current, _, _)| rows < current) {
            best = Some((rows, table, rollup));
        }
    }
    match best {
        Some((rows, table, rollup)) => {
            log::debug!(
                "using aggregate table {} ({rows} rows, fact {fact_rows})",
                table.name
            );
            Source::Aggregate { table, rollup }
        }
        None => Source::Fact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::food_mart;
    use olap_sql::{FixedStatistics, InMemoryDatabase};
    use pretty_assertions::assert_eq;

    #[test]
    fn smaller_aggregate_wins() {
        let (schema, ids) = food_mart();
        let db = InMemoryDatabase::default();
        let stats = FixedStatistics::new()
            .with(StatsScope::table("sales_fact"), 1000)
            .with(StatsScope::table("agg_sales_by_year"), 2);
        let cube = schema.cube(ids.cube);
        let source = choose_source(&schema, cube, ids.unit_sales, &[ids.year], &stats, &db);
        assert!(matches!(source, Source::Aggregate { rollup: false, .. }));
        let total = choose_source(&schema, cube, ids.unit_sales, &[], &stats, &db);
        assert!(matches!(total, Source::Aggregate { rollup: true, .. }));
        assert_eq!(source.name(cube), "agg_sales_by_year");
    }

    #[test]
    fn missing_columns_and_distinct_counts_use_the_fact_table() {
        let (schema, ids) = food_mart();
        let db = InMemoryDatabase::default();
        let stats = FixedStatistics::new()
            .with(StatsScope::table("sales_fact"), 1000)
            .with(StatsScope::table("agg_sales_by_year"), 2);
        let cube = schema.cube(ids.cube);
        let by_quarter = choose_source(
            &schema,
            cube,
            ids.unit_sales,
            &[ids.year, ids.quarter],
            &stats,
            &db,
        );
        assert!(matches!(by_quarter, Source::Fact));
        let distinct = choose_source(&schema, cube, ids.customer_count, &[ids.year], &stats, &db);
        assert!(matches!(distinct, Source::Fact));
    }

    #[test]
    fn unknown_or_equal_estimates_use_the_fact_table() {
        let (schema, ids) = food_mart();
        let db = InMemoryDatabase::default();
        let cube = schema.cube(ids.cube);
        let unknown_fact = FixedStatistics::new().with(StatsScope::table("agg_sales_by_year"), 2);
        assert!(matches!(
            choose_source(&schema, cube, ids.unit_sales, &[ids.year], &unknown_fact, &db),
            Source::Fact
        ));
        let tie = FixedStatistics::new()
            .with(StatsScope::table("sales_fact"), 2)
            .with(StatsScope::table("agg_sales_by_year"), 2);
        assert!(matches!(
            choose_source(&schema, cube, ids.unit_sales, &[ids.year], &tie, &db),
            Source::Fact
        ));
    }
}
