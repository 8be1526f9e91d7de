//! Logical SQL for loading one segment.
//!
//! Grouping columns are aliased `c0, c1, ..` in segment level order and the measure `m0`.
use olap_model::{Aggregator, Cube, HierarchyId, LevelId, Schema};
use olap_sql::{AggFunc, Dialect, FromItem, Predicate, SqlExpr, SqlQuery};

use crate::aggregation::segment::{SegmentAxis, SegmentKey};
use crate::aggregation::selector::Source;
use crate::error::{OlapError, OlapResult};

pub const MEASURE_ALIAS: &str = "m0";
const DERIVED_ALIAS: &str = "dummyname";

pub fn column_alias(i: usize) -> String {
    format!("c{i}")
}

fn agg_func(aggregator: Aggregator) -> (AggFunc, bool) {
    match aggregator {
        Aggregator::Sum => (AggFunc::Sum, false),
        Aggregator::Count => (AggFunc::Count, false),
        Aggregator::Min => (AggFunc::Min, false),
        Aggregator::Max => (AggFunc::Max, false),
        Aggregator::Avg => (AggFunc::Avg, false),
        Aggregator::DistinctCount => (AggFunc::Count, true),
    }
}

/// Column expressions of each level on one source.
struct Columns<'s> {
    schema: &'s Schema,
    cube: &'s Cube,
    source: Source<'s>,
}

impl Columns<'_> {
    fn level(&self, level: LevelId) -> OlapResult<SqlExpr> {
        let l = self.schema.level(level);
        match self.source {
            Source::Aggregate { table, .. } => {
                let column = table.level_column(level).ok_or_else(|| {
                    OlapError::UnknownObject(format!("{} in {}", l.unique_name, table.name))
                })?;
                Ok(SqlExpr::column(table.name.clone(), column))
            }
            Source::Fact => {
                let column = l.column.clone().ok_or_else(|| {
                    OlapError::UnknownObject(format!("key column of {}", l.unique_name))
                })?;
                let h = self.schema.hierarchy(l.hierarchy);
                let table = h.table.clone().unwrap_or_else(|| self.cube.fact_table.clone());
                Ok(SqlExpr::column(table, column))
            }
        }
    }

    fn predicate(&self, axis: &SegmentAxis) -> OlapResult<Predicate> {
        Ok(match axis {
            SegmentAxis::Column { level, values } => {
                let expr = self.level(*level)?;
                match values.as_slice() {
                    [single] => Predicate::Eq {
                        expr,
                        value: single.clone(),
                    },
                    _ => Predicate::In {
                        expr,
                        values: values.clone(),
                    },
                }
            }
            SegmentAxis::Compound { levels, rows } => Predicate::MultiIn {
                exprs: levels
                    .iter()
                    .map(|l| self.level(*l))
                    .collect::<OlapResult<Vec<_>>>()?,
                rows: rows.clone(),
            },
        })
    }
}

/// Build the query loading `key` from `source`.
pub fn segment_query(
    schema: &Schema,
    key: &SegmentKey,
    source: Source<'_>,
    dialect: &Dialect,
) -> OlapResult<SqlQuery> {
    let cube = schema.cube(key.cube);
    let columns = Columns {
        schema,
        cube,
        source,
    };
    let measure = schema.measure(key.measure);

    let mut query = match source {
        Source::Fact => star_join(schema, cube, &key.levels),
        Source::Aggregate { table, .. } => SqlQuery::default().from_table(table.name.clone()),
    };
    for axis in &key.axes {
        query = query.filter(columns.predicate(axis)?);
    }
    let level_exprs = key
        .levels
        .iter()
        .map(|l| columns.level(*l))
        .collect::<OlapResult<Vec<_>>>()?;

    let measure_expr = match source {
        Source::Fact => SqlExpr::column(cube.fact_table.clone(), measure.column.clone()),
        Source::Aggregate { table, .. } => {
            let column = table.measure_column(key.measure).ok_or_else(|| {
                OlapError::UnknownObject(format!("{} in {}", measure.name, table.name))
            })?;
            SqlExpr::column(table.name.clone(), column)
        }
    };

    let (func, distinct) = match source {
        Source::Fact => agg_func(measure.aggregator),
        // One row per group when the table is grouped exactly as requested.
        Source::Aggregate { .. } => measure
            .aggregator
            .rollup()
            .map_or((AggFunc::Max, false), agg_func),
    };

    if distinct && !dialect.allows_count_distinct {
        return Ok(distinct_count_emulation(query, level_exprs, measure_expr));
    }

    for (i, expr) in level_exprs.into_iter().enumerate() {
        query = query.select(expr.clone(), column_alias(i)).group(expr);
    }
    Ok(query.select(
        SqlExpr::aggregate(func, distinct, measure_expr),
        MEASURE_ALIAS,
    ))
}

/// Fact table joined to the dimension tables of `levels`.
fn star_join(schema: &Schema, cube: &Cube, levels: &[LevelId]) -> SqlQuery {
    let mut query = SqlQuery::default().from_table(cube.fact_table.clone());
    let mut joined: Vec<HierarchyId> = Vec::new();
    for level in levels {
        let h = schema.hierarchy(schema.level(*level).hierarchy);
        if joined.contains(&h.id) {
            continue;
        }
        if let (Some(table), Some(pk), Some(fk)) = (&h.table, &h.primary_key, &h.foreign_key) {
            joined.push(h.id);
            query = query.from_table(table.clone()).filter(Predicate::ColumnEq(
                SqlExpr::column(cube.fact_table.clone(), fk.clone()),
                SqlExpr::column(table.clone(), pk.clone()),
            ));
        }
    }
    query
}

/// `COUNT(DISTINCT m)` as `COUNT(*)` over a `SELECT DISTINCT` derived table of non-null `m`.
fn distinct_count_emulation(
    filtered: SqlQuery,
    level_exprs: Vec<SqlExpr>,
    measure_expr: SqlExpr,
) -> SqlQuery {
    let mut inner = SqlQuery {
        distinct: true,
        ..filtered
    };
    for (i, expr) in level_exprs.iter().enumerate() {
        inner = inner.select(expr.clone(), column_alias(i));
    }
    inner = inner
        .select(measure_expr.clone(), "m")
        .filter(Predicate::IsNotNull(measure_expr));

    let mut outer = SqlQuery {
        from: vec![FromItem::Derived {
            query: Box::new(inner),
            alias: DERIVED_ALIAS.into(),
        }],
        ..SqlQuery::default()
    };
    for i in 0..level_exprs.len() {
        let expr = SqlExpr::column(DERIVED_ALIAS, column_alias(i));
        outer = outer.select(expr.clone(), column_alias(i)).group(expr);
    }
    outer.select(SqlExpr::CountStar, MEASURE_ALIAS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use olap_model::test_support::food_mart;
    use olap_model::Value;
    use olap_sql::DialectKind;
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    #[test]
    fn fact_query_joins_dimension_tables() {
        let (schema, ids) = food_mart();
        let key = SegmentKey {
            cube: ids.cube,
            measure: ids.unit_sales,
            levels: smallvec![ids.year],
            axes: vec![SegmentAxis::Column {
                level: ids.year,
                values: vec![Value::from(1997), Value::from(1998)],
            }],
        };
        let dialect = Dialect::for_kind(DialectKind::Postgres);
        let sql = segment_query(&schema, &key, Source::Fact, &dialect)
            .unwrap()
            .render(&dialect)
            .unwrap();
        assert_eq!(
            sql,
            "SELECT\n    \"time_by_day\".\"the_year\" AS \"c0\",\n    SUM(\"sales_fact\".\"unit_sales\") AS \"m0\"\nFROM\n    \"sales_fact\",\n    \"time_by_day\"\nWHERE \"sales_fact\".\"time_id\" = \"time_by_day\".\"time_id\"\n    AND \"time_by_day\".\"the_year\" IN (1997, 1998)\nGROUP BY \"c0\""
        );
    }

    #[test]
    fn aggregate_rollup_sums_counts() {
        let (schema, ids) = food_mart();
        let cube = schema.cube(ids.cube);
        let key = SegmentKey {
            cube: ids.cube,
            measure: ids.sales_count,
            levels: smallvec![],
            axes: vec![],
        };
        let source = Source::Aggregate {
            table: &cube.aggregate_tables[0],
            rollup: true,
        };
        let query = segment_query(&schema, &key, source, &Dialect::for_kind(DialectKind::Ansi))
            .unwrap();
        assert_eq!(
            query.select[0].expr,
            SqlExpr::aggregate(
                AggFunc::Sum,
                false,
                SqlExpr::column("agg_sales_by_year", "fact_count")
            )
        );
        assert!(query.group_by.is_empty());
    }

    #[test]
    fn distinct_count_uses_derived_table_without_support() {
        let (schema, ids) = food_mart();
        let key = SegmentKey {
            cube: ids.cube,
            measure: ids.customer_count,
            levels: smallvec![ids.gender_level],
            axes: vec![SegmentAxis::Column {
                level: ids.gender_level,
                values: vec![Value::from("F")],
            }],
        };
        let dialect = Dialect::for_kind(DialectKind::Access);
        let query = segment_query(&schema, &key, Source::Fact, &dialect).unwrap();
        let FromItem::Derived { query: inner, alias } = &query.from[0] else {
            panic!("expected a derived table: {query:?}");
        };
        assert_eq!(alias, DERIVED_ALIAS);
        assert!(inner.distinct);
        assert_eq!(inner.column_aliases(), vec!["c0".to_string(), "m".to_string()]);
        assert_eq!(query.select.last().map(|s| &s.expr), Some(&SqlExpr::CountStar));
        assert!(!query.render(&dialect).unwrap().contains("COUNT(DISTINCT"));
    }
}
