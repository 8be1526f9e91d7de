#![forbid(unsafe_code)]

//! Relational side of the query core: per-backend dialect capabilities, the dialect-neutral
//! logical query and its renderer, the connection contract, cardinality statistics, and an
//! in-memory backend that executes logical queries directly.

mod connection;
pub mod dialect;
mod error;
mod memory;
mod query;
pub mod stats;

pub use crate::connection::{Connection, ConnectionProvider, RowSet, Statement};
pub use crate::dialect::{Dialect, DialectKind, NullCollation};
pub use crate::error::{SqlError, SqlResult};
pub use crate::memory::{InMemoryDatabase, Table};
pub use crate::query::{
    render_expr, render_predicate, AggFunc, FromItem, OrderItem, Predicate, SelectItem, SqlExpr,
    SqlQuery,
};
pub use crate::stats::{
    CachingStatistics, ChainedStatistics, Estimate, FixedStatistics, MetadataStatistics,
    SqlCountStatistics, StatisticsProvider, StatsScope,
};
