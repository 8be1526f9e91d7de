//! Backend connection seam.
use std::fmt;

use olap_model::Value;

use crate::dialect::Dialect;
use crate::error::SqlResult;
use crate::query::SqlQuery;

/// A rendered statement together with the logical query it was rendered from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub query: SqlQuery,
}

impl Statement {
    pub fn new(query: SqlQuery, dialect: &Dialect) -> SqlResult<Statement> {
        let sql = query.render(dialect)?;
        Ok(Statement { sql, query })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One open backend connection. Dropping it releases the connection.
pub trait Connection: Send {
    fn product_name(&self) -> &str;

    fn product_version(&self) -> &str;

    fn dialect(&self) -> Dialect {
        Dialect::detect(self.product_name(), self.product_version())
    }

    fn execute(&mut self, statement: &Statement) -> SqlResult<RowSet>;

    /// Row-count estimate from catalog metadata, when the backend keeps one.
    fn table_row_estimate(&mut self, _table: &str) -> SqlResult<Option<u64>> {
        Ok(None)
    }
}

/// Hands out connections; shared by every query of a session.
pub trait ConnectionProvider: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn acquire(&self) -> SqlResult<Box<dyn Connection>>;
}
