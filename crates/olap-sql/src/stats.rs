//! Row and distinct-value cardinality estimates.
//!
//! Strategies never fail their caller: any backend error is logged and reported as
//! [`Estimate::Unknown`].
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use olap_model::Value;

use crate::connection::{ConnectionProvider, Statement};
use crate::error::{SqlError, SqlResult};
use crate::query::{AggFunc, FromItem, SqlExpr, SqlQuery};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Estimate {
    Known(u64),
    Unknown,
}

impl Estimate {
    /// Count with `-1` standing for unknown.
    pub fn as_i64(self) -> i64 {
        match self {
            Estimate::Known(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Estimate::Unknown => -1,
        }
    }

    pub fn known(self) -> Option<u64> {
        match self {
            Estimate::Known(n) => Some(n),
            Estimate::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Estimate::Known(_))
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimate::Known(n) => write!(f, "{n}"),
            Estimate::Unknown => f.write_str("unknown"),
        }
    }
}

/// What is being counted: the rows of a table, or the distinct values of one of its columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatsScope {
    Table(String),
    Column { table: String, column: String },
}

impl StatsScope {
    pub fn table(name: impl Into<String>) -> StatsScope {
        StatsScope::Table(name.into())
    }

    pub fn column(table: impl Into<String>, column: impl Into<String>) -> StatsScope {
        StatsScope::Column {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for StatsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsScope::Table(t) => f.write_str(t),
            StatsScope::Column { table, column } => write!(f, "{table}.{column}"),
        }
    }
}

pub trait StatisticsProvider: Send + Sync {
    fn estimate(&self, connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate;
}

/// Asks the backend's catalog metadata. Only table scopes are answered.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetadataStatistics;

impl StatisticsProvider for MetadataStatistics {
    fn estimate(&self, connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate {
        let StatsScope::Table(table) = scope else {
            return Estimate::Unknown;
        };
        let result = connections
            .acquire()
            .and_then(|mut conn| conn.table_row_estimate(table));
        match result {
            Ok(Some(n)) => Estimate::Known(n),
            Ok(None) => Estimate::Unknown,
            Err(err) => {
                log::warn!("metadata row estimate for {scope} failed: {err}");
                Estimate::Unknown
            }
        }
    }
}

/// Runs `SELECT COUNT(*)` or `COUNT(DISTINCT col)` against the backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlCountStatistics;

impl SqlCountStatistics {
    pub fn count_query(scope: &StatsScope, allows_count_distinct: bool) -> SqlQuery {
        match scope {
            StatsScope::Table(table) => SqlQuery::default()
                .select(SqlExpr::CountStar, "c")
                .from_table(table.clone()),
            StatsScope::Column { table, column } if allows_count_distinct => SqlQuery::default()
                .select(
                    SqlExpr::aggregate(
                        AggFunc::Count,
                        true,
                        SqlExpr::column(table.clone(), column.clone()),
                    ),
                    "c",
                )
                .from_table(table.clone()),
            StatsScope::Column { table, column } => {
                let inner = SqlQuery {
                    distinct: true,
                    ..SqlQuery::default()
                }
                .select(SqlExpr::column(table.clone(), column.clone()), "d0")
                .from_table(table.clone());
                SqlQuery {
                    from: vec![FromItem::Derived {
                        query: Box::new(inner),
                        alias: "dummyname".into(),
                    }],
                    ..SqlQuery::default()
                }
                .select(
                    SqlExpr::aggregate(AggFunc::Count, false, SqlExpr::column("dummyname", "d0")),
                    "c",
                )
            }
        }
    }

    fn try_estimate(
        &self,
        connections: &dyn ConnectionProvider,
        scope: &StatsScope,
    ) -> SqlResult<u64> {
        let dialect = connections.dialect();
        let statement = Statement::new(
            Self::count_query(scope, dialect.allows_count_distinct),
            &dialect,
        )?;
        log::debug!("cardinality query for {scope}: {}", statement.sql);
        let rows = connections.acquire()?.execute(&statement)?;
        let value = rows
            .rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| SqlError::MalformedResult("count query returned no rows".into()))?;
        match value {
            Value::Number(n) if n.0 >= 0.0 => Ok(n.0 as u64),
            other => Err(SqlError::MalformedResult(format!(
                "count query returned {other:?}"
            ))),
        }
    }
}

impl StatisticsProvider for SqlCountStatistics {
    fn estimate(&self, connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate {
        match self.try_estimate(connections, scope) {
            Ok(n) => Estimate::Known(n),
            Err(err) => {
                log::warn!("count estimate for {scope} failed: {err}");
                Estimate::Unknown
            }
        }
    }
}

/// Tries each strategy in order until one returns a known estimate.
pub struct ChainedStatistics {
    strategies: Vec<Box<dyn StatisticsProvider>>,
}

impl ChainedStatistics {
    pub fn new(strategies: Vec<Box<dyn StatisticsProvider>>) -> Self {
        Self { strategies }
    }

    /// Metadata first, then `COUNT` queries.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(MetadataStatistics),
            Box::new(SqlCountStatistics),
        ])
    }
}

impl StatisticsProvider for ChainedStatistics {
    fn estimate(&self, connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate {
        self.strategies
            .iter()
            .map(|s| s.estimate(connections, scope))
            .find(|e| e.is_known())
            .unwrap_or(Estimate::Unknown)
    }
}

/// Remembers every estimate for the lifetime of the wrapper (one session).
pub struct CachingStatistics<S> {
    inner: S,
    memo: Mutex<HashMap<StatsScope, Estimate>>,
}

impl<S: StatisticsProvider> CachingStatistics<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<S: StatisticsProvider> StatisticsProvider for CachingStatistics<S> {
    fn estimate(&self, connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate {
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
        {
            return *hit;
        }
        let estimate = self.inner.estimate(connections, scope);
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope.clone(), estimate);
        estimate
    }
}

/// Fixed answers, for embedders that keep their own statistics.
#[derive(Clone, Debug, Default)]
pub struct FixedStatistics {
    estimates: HashMap<StatsScope, u64>,
}

impl FixedStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scope: StatsScope, count: u64) -> Self {
        self.estimates.insert(scope, count);
        self
    }
}

impl StatisticsProvider for FixedStatistics {
    fn estimate(&self, _connections: &dyn ConnectionProvider, scope: &StatsScope) -> Estimate {
        self.estimates
            .get(scope)
            .copied()
            .map_or(Estimate::Unknown, Estimate::Known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, DialectKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_uses_negative_sentinel() {
        assert_eq!(Estimate::Unknown.as_i64(), -1);
        assert_eq!(Estimate::Known(42).as_i64(), 42);
        assert_eq!(Estimate::Known(u64::MAX).as_i64(), i64::MAX);
    }

    #[test]
    fn distinct_count_query_is_emulated_without_count_distinct() {
        let scope = StatsScope::column("sales_fact", "customer_id");
        let access = Dialect::for_kind(DialectKind::Access);
        let sql = SqlCountStatistics::count_query(&scope, access.allows_count_distinct)
            .render(&access)
            .unwrap();
        assert!(sql.contains("SELECT DISTINCT"), "{sql}");
        assert!(!sql.contains("COUNT(DISTINCT"), "{sql}");
    }
}
