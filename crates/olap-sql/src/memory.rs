//! In-memory relational backend.
//!
//! Executes the logical form of each [`Statement`] over tables held in memory: nested-loop
//! joins with predicate push-down, grouping, the five aggregates, `DISTINCT` and derived
//! tables. Every executed statement is recorded so callers can assert on the SQL a query
//! produced.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use olap_model::{cmp_values, Value};

use crate::connection::{Connection, ConnectionProvider, RowSet, Statement};
use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use crate::query::{AggFunc, FromItem, Predicate, SqlExpr, SqlQuery};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug)]
struct Inner {
    product_name: String,
    product_version: String,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    row_estimates: RwLock<HashMap<String, u64>>,
    executed: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    failures_pending: AtomicUsize,
    open_connections: AtomicUsize,
}

/// Cheap to clone; clones share tables and the statement log.
#[derive(Clone, Debug)]
pub struct InMemoryDatabase {
    inner: Arc<Inner>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new("ANSI", "1.0")
    }
}

impl InMemoryDatabase {
    /// The product name and version drive dialect detection.
    pub fn new(product_name: impl Into<String>, product_version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                product_name: product_name.into(),
                product_version: product_version.into(),
                tables: RwLock::new(HashMap::new()),
                row_estimates: RwLock::new(HashMap::new()),
                executed: Mutex::new(Vec::new()),
                latency: Mutex::new(Duration::ZERO),
                failures_pending: AtomicUsize::new(0),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    pub fn add_table(
        &self,
        name: impl Into<String>,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> SqlResult<()> {
        let name = name.into();
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(SqlError::MalformedResult(format!(
                "row of {} values for table {name} with {} columns",
                bad.len(),
                columns.len()
            )));
        }
        let table = Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        };
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(table));
        Ok(())
    }

    /// Catalog row count reported through [`Connection::table_row_estimate`].
    pub fn set_row_estimate(&self, table: impl Into<String>, rows: u64) {
        self.inner
            .row_estimates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.into(), rows);
    }

    /// Delay applied to every statement before it runs.
    pub fn set_latency(&self, latency: Duration) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Make the next `count` statements fail with an execution error.
    pub fn fail_next(&self, count: usize) {
        self.inner
            .failures_pending
            .store(count, AtomicOrdering::SeqCst);
    }

    pub fn executed_statements(&self) -> Vec<String> {
        self.inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statement_count(&self) -> usize {
        self.inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_statements(&self) {
        self.inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Connections acquired and not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(AtomicOrdering::SeqCst)
    }

    fn table(&self, name: &str) -> SqlResult<Arc<Table>> {
        self.inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SqlError::UnknownTable(name.to_string()))
    }

    /// Evaluate a logical query without recording it.
    pub fn run_query(&self, query: &SqlQuery) -> SqlResult<RowSet> {
        Executor { db: self }.query(query)
    }
}

impl ConnectionProvider for InMemoryDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::detect(&self.inner.product_name, &self.inner.product_version)
    }

    fn acquire(&self) -> SqlResult<Box<dyn Connection>> {
        self.inner
            .open_connections
            .fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryConnection { db: self.clone() }))
    }
}

struct MemoryConnection {
    db: InMemoryDatabase,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.db
            .inner
            .open_connections
            .fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl Connection for MemoryConnection {
    fn product_name(&self) -> &str {
        &self.db.inner.product_name
    }

    fn product_version(&self) -> &str {
        &self.db.inner.product_version
    }

    fn execute(&mut self, statement: &Statement) -> SqlResult<RowSet> {
        self.db
            .inner
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement.sql.clone());

        let latency = *self
            .db
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let failing = self
            .db
            .inner
            .failures_pending
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(SqlError::Execution {
                sql: statement.sql.clone(),
                message: "injected failure".into(),
            });
        }

        self.db
            .run_query(&statement.query)
            .map_err(|err| match err {
                SqlError::Execution { .. } => err,
                other => SqlError::Execution {
                    sql: statement.sql.clone(),
                    message: other.to_string(),
                },
            })
    }

    fn table_row_estimate(&mut self, table: &str) -> SqlResult<Option<u64>> {
        Ok(self
            .db
            .inner
            .row_estimates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .copied())
    }
}

/// Rows of a join in progress, with `(from item, column)` names for each position.
struct Relation {
    columns: Vec<(String, String)>,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    fn index_of(&self, table: &str, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(t, c)| t == table && c == column)
    }
}

struct Executor<'a> {
    db: &'a InMemoryDatabase,
}

impl Executor<'_> {
    fn query(&self, query: &SqlQuery) -> SqlResult<RowSet> {
        let relation = self.join(query)?;
        let mut rows = if query.group_by.is_empty()
            && !query.select.iter().any(|s| s.expr.is_aggregate())
        {
            relation
                .rows
                .iter()
                .map(|row| {
                    query
                        .select
                        .iter()
                        .map(|item| scalar(&relation, row, &item.expr))
                        .collect::<SqlResult<Vec<_>>>()
                })
                .collect::<SqlResult<Vec<_>>>()?
        } else {
            self.group(query, &relation)?
        };

        if query.distinct {
            let mut seen = std::collections::HashSet::new();
            rows.retain(|row| seen.insert(row.clone()));
        }

        if !query.order_by.is_empty() {
            let mut keys = Vec::with_capacity(query.order_by.len());
            for item in &query.order_by {
                let idx = query
                    .select
                    .iter()
                    .position(|s| s.expr == item.expr)
                    .ok_or_else(|| {
                        SqlError::Unsupported("ORDER BY expression must be selected".into())
                    })?;
                keys.push((idx, item.ascending, item.nulls_last));
            }
            rows.sort_by(|a, b| {
                for &(idx, ascending, nulls_last) in &keys {
                    let ord = match (&a[idx], &b[idx]) {
                        (Value::Null, Value::Null) => Ordering::Equal,
                        (Value::Null, _) if nulls_last => Ordering::Greater,
                        (Value::Null, _) => Ordering::Less,
                        (_, Value::Null) if nulls_last => Ordering::Less,
                        (_, Value::Null) => Ordering::Greater,
                        (x, y) if ascending => cmp_values(x, y),
                        (x, y) => cmp_values(y, x),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(RowSet {
            columns: query.column_aliases(),
            rows,
        })
    }

    fn source(&self, item: &FromItem) -> SqlResult<Relation> {
        match item {
            FromItem::Table { name, .. } => {
                let table = self.db.table(name)?;
                let reference = item.reference_name().to_string();
                Ok(Relation {
                    columns: table
                        .columns
                        .iter()
                        .map(|c| (reference.clone(), c.clone()))
                        .collect(),
                    rows: table.rows.clone(),
                })
            }
            FromItem::Derived { query, alias } => {
                let rows = self.query(query)?;
                Ok(Relation {
                    columns: rows
                        .columns
                        .into_iter()
                        .map(|c| (alias.clone(), c))
                        .collect(),
                    rows: rows.rows,
                })
            }
        }
    }

    fn join(&self, query: &SqlQuery) -> SqlResult<Relation> {
        let mut acc = Relation {
            columns: Vec::new(),
            rows: vec![Vec::new()],
        };
        let mut applied = vec![false; query.predicates.len()];

        for item in &query.from {
            let right = self.source(item)?;
            let mut columns = std::mem::take(&mut acc.columns);
            columns.extend(right.columns);
            let mut joined = Relation {
                columns,
                rows: Vec::new(),
            };

            let ready: Vec<&Predicate> = query
                .predicates
                .iter()
                .zip(applied.iter_mut())
                .filter_map(|(p, done)| {
                    (!*done && references(p).iter().all(|(t, c)| joined.index_of(t, c).is_some()))
                        .then(|| {
                            *done = true;
                            p
                        })
                })
                .collect();

            for left in &acc.rows {
                for r in &right.rows {
                    let mut row = left.clone();
                    row.extend(r.iter().cloned());
                    let mut keep = true;
                    for predicate in &ready {
                        if !matches_row(&joined, &row, predicate)? {
                            keep = false;
                            break;
                        }
                    }
                    if keep {
                        joined.rows.push(row);
                    }
                }
            }
            acc = joined;
        }

        if let Some(pending) = query
            .predicates
            .iter()
            .zip(&applied)
            .find_map(|(p, done)| (!done).then_some(p))
        {
            let (table, column) = references(pending)
                .into_iter()
                .find(|(t, c)| acc.index_of(t, c).is_none())
                .unwrap_or_default();
            return Err(SqlError::UnknownColumn { table, column });
        }
        Ok(acc)
    }

    fn group(&self, query: &SqlQuery, relation: &Relation) -> SqlResult<Vec<Vec<Value>>> {
        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut groups: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (i, row) in relation.rows.iter().enumerate() {
            let key = query
                .group_by
                .iter()
                .map(|e| scalar(relation, row, e))
                .collect::<SqlResult<Vec<_>>>()?;
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(i);
        }
        if query.group_by.is_empty() && order.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), Vec::new());
        }

        let mut out = Vec::with_capacity(order.len());
        for key in order {
            let members = groups.get(&key).map(Vec::as_slice).unwrap_or_default();
            let mut row = Vec::with_capacity(query.select.len());
            for item in &query.select {
                let value = match &item.expr {
                    SqlExpr::CountStar => Value::from(members.len() as i64),
                    SqlExpr::Aggregate {
                        func,
                        distinct,
                        arg,
                    } => {
                        let values = members
                            .iter()
                            .map(|&i| scalar(relation, &relation.rows[i], arg))
                            .collect::<SqlResult<Vec<_>>>()?;
                        aggregate(*func, *distinct, values)?
                    }
                    expr => {
                        if !query.group_by.contains(expr) && !matches!(expr, SqlExpr::Literal(_))
                        {
                            return Err(SqlError::Unsupported(
                                "selected column is neither grouped nor aggregated".into(),
                            ));
                        }
                        match members.first() {
                            Some(&i) => scalar(relation, &relation.rows[i], expr)?,
                            None => Value::Null,
                        }
                    }
                };
                row.push(value);
            }
            out.push(row);
        }
        Ok(out)
    }
}

fn scalar(relation: &Relation, row: &[Value], expr: &SqlExpr) -> SqlResult<Value> {
    match expr {
        SqlExpr::Column { table, column } => relation
            .index_of(table, column)
            .map(|i| row[i].clone())
            .ok_or_else(|| SqlError::UnknownColumn {
                table: table.clone(),
                column: column.clone(),
            }),
        SqlExpr::Literal(v) => Ok(v.clone()),
        SqlExpr::CountStar | SqlExpr::Aggregate { .. } => Err(SqlError::Unsupported(
            "aggregate outside of a grouped select list".into(),
        )),
    }
}

fn references(predicate: &Predicate) -> Vec<(String, String)> {
    fn expr_refs(expr: &SqlExpr, out: &mut Vec<(String, String)>) {
        match expr {
            SqlExpr::Column { table, column } => out.push((table.clone(), column.clone())),
            SqlExpr::Aggregate { arg, .. } => expr_refs(arg, out),
            SqlExpr::Literal(_) | SqlExpr::CountStar => {}
        }
    }
    fn walk(predicate: &Predicate, out: &mut Vec<(String, String)>) {
        match predicate {
            Predicate::Eq { expr, .. }
            | Predicate::In { expr, .. }
            | Predicate::IsNull(expr)
            | Predicate::IsNotNull(expr) => expr_refs(expr, out),
            Predicate::MultiIn { exprs, .. } => exprs.iter().for_each(|e| expr_refs(e, out)),
            Predicate::ColumnEq(l, r) => {
                expr_refs(l, out);
                expr_refs(r, out);
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().for_each(|p| walk(p, out))
            }
        }
    }
    let mut out = Vec::new();
    walk(predicate, &mut out);
    out
}

fn matches_row(relation: &Relation, row: &[Value], predicate: &Predicate) -> SqlResult<bool> {
    Ok(match predicate {
        Predicate::Eq { expr, value } => &scalar(relation, row, expr)? == value,
        Predicate::In { expr, values } => values.contains(&scalar(relation, row, expr)?),
        Predicate::IsNull(expr) => scalar(relation, row, expr)?.is_null(),
        Predicate::IsNotNull(expr) => !scalar(relation, row, expr)?.is_null(),
        Predicate::MultiIn { exprs, rows } => {
            let actual = exprs
                .iter()
                .map(|e| scalar(relation, row, e))
                .collect::<SqlResult<Vec<_>>>()?;
            rows.contains(&actual)
        }
        Predicate::ColumnEq(l, r) => {
            let l = scalar(relation, row, l)?;
            !l.is_null() && l == scalar(relation, row, r)?
        }
        Predicate::And(parts) => {
            for p in parts {
                if !matches_row(relation, row, p)? {
                    return Ok(false);
                }
            }
            true
        }
        Predicate::Or(parts) => {
            for p in parts {
                if matches_row(relation, row, p)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

fn aggregate(func: AggFunc, distinct: bool, values: Vec<Value>) -> SqlResult<Value> {
    let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if distinct {
        values.sort_by(cmp_values);
        values.dedup();
    }
    let numbers = |values: &[Value]| -> SqlResult<Vec<f64>> {
        values
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    SqlError::Unsupported(format!("{} over non-numeric {v}", func.keyword()))
                })
            })
            .collect()
    };
    Ok(match func {
        AggFunc::Count => Value::from(values.len() as i64),
        _ if values.is_empty() => Value::Null,
        AggFunc::Sum => Value::from(numbers(&values)?.iter().sum::<f64>()),
        AggFunc::Avg => {
            let nums = numbers(&values)?;
            Value::from(nums.iter().sum::<f64>() / nums.len() as f64)
        }
        AggFunc::Min => values
            .into_iter()
            .min_by(cmp_values)
            .unwrap_or_default(),
        AggFunc::Max => values
            .into_iter()
            .max_by(cmp_values)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use pretty_assertions::assert_eq;

    fn db() -> InMemoryDatabase {
        let db = InMemoryDatabase::new("PostgreSQL", "16.1");
        db.add_table(
            "fact",
            &["k", "v", "c"],
            vec![
                vec![Value::from(1), Value::from(10), Value::from("a")],
                vec![Value::from(1), Value::from(5), Value::from("b")],
                vec![Value::from(2), Value::from(7), Value::from("a")],
                vec![Value::from(3), Value::Null, Value::Null],
            ],
        )
        .unwrap();
        db.add_table(
            "dim",
            &["k", "name"],
            vec![
                vec![Value::from(1), Value::from("one")],
                vec![Value::from(2), Value::from("two")],
                vec![Value::from(3), Value::from("three")],
            ],
        )
        .unwrap();
        db
    }

    #[test]
    fn joins_filters_and_groups() {
        let name = SqlExpr::column("dim", "name");
        let query = SqlQuery::default()
            .select(name.clone(), "c0")
            .select(
                SqlExpr::aggregate(AggFunc::Sum, false, SqlExpr::column("fact", "v")),
                "m0",
            )
            .from_table("fact")
            .from_table("dim")
            .filter(Predicate::ColumnEq(
                SqlExpr::column("fact", "k"),
                SqlExpr::column("dim", "k"),
            ))
            .filter(Predicate::In {
                expr: name.clone(),
                values: vec![Value::from("one"), Value::from("three")],
            })
            .group(name);
        let rows = db().run_query(&query).unwrap();
        assert_eq!(
            rows.rows,
            vec![
                vec![Value::from("one"), Value::from(15)],
                vec![Value::from("three"), Value::Null],
            ]
        );
    }

    #[test]
    fn count_distinct_and_derived_table_agree() {
        let direct = SqlQuery::default()
            .select(
                SqlExpr::aggregate(AggFunc::Count, true, SqlExpr::column("fact", "c")),
                "m0",
            )
            .from_table("fact");
        let inner = SqlQuery {
            distinct: true,
            ..SqlQuery::default()
        }
        .select(SqlExpr::column("fact", "c"), "d0")
        .from_table("fact");
        let emulated = SqlQuery {
            from: vec![FromItem::Derived {
                query: Box::new(inner),
                alias: "dt".into(),
            }],
            ..SqlQuery::default()
        }
        .select(
            SqlExpr::aggregate(AggFunc::Count, false, SqlExpr::column("dt", "d0")),
            "m0",
        );
        let db = db();
        assert_eq!(db.run_query(&direct).unwrap().rows, vec![vec![Value::from(2)]]);
        assert_eq!(db.run_query(&emulated).unwrap().rows, vec![vec![Value::from(2)]]);
    }

    #[test]
    fn records_statements_and_releases_connections() {
        let db = db();
        let dialect = db.dialect();
        assert_eq!(dialect.kind, DialectKind::Postgres);
        let statement = Statement::new(
            SqlQuery::default()
                .select(SqlExpr::CountStar, "n")
                .from_table("fact"),
            &dialect,
        )
        .unwrap();
        {
            let mut conn = db.acquire().unwrap();
            assert_eq!(db.open_connections(), 1);
            let rows = conn.execute(&statement).unwrap();
            assert_eq!(rows.rows, vec![vec![Value::from(4)]]);
        }
        assert_eq!(db.open_connections(), 0);
        assert_eq!(db.executed_statements(), vec![statement.sql.clone()]);

        db.fail_next(1);
        let err = db.acquire().unwrap().execute(&statement).unwrap_err();
        assert!(matches!(err, SqlError::Execution { .. }));
        assert!(db.acquire().unwrap().execute(&statement).is_ok());
    }

    #[test]
    fn unknown_table_is_an_execution_error() {
        let db = db();
        let statement = Statement::new(
            SqlQuery::default()
                .select(SqlExpr::CountStar, "n")
                .from_table("missing"),
            &db.dialect(),
        )
        .unwrap();
        let err = db.acquire().unwrap().execute(&statement).unwrap_err();
        assert!(err.to_string().contains("unknown table: missing"), "{err}");
    }
}
