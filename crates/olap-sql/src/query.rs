//! Logical SQL statements and their dialect-specific rendering.
//!
//! The aggregation layer builds a [`SqlQuery`] and renders it once per statement; backends may
//! use either the text or the logical form (the in-memory backend interprets the latter).
use olap_model::Value;

use crate::dialect::{
    derived_table_alias, generate_compound_in, generate_in_predicate, generate_order_item,
    quote_identifier, quote_qualified, quote_value, Dialect,
};
use crate::error::{SqlError, SqlResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn keyword(self) -> &'static str {
        match self {
            AggFunc::Sum => "SUM",
            AggFunc::Count => "COUNT",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SqlExpr {
    /// Column of a `FROM` item, addressed by its alias (or table name when unaliased).
    Column { table: String, column: String },
    Literal(Value),
    CountStar,
    Aggregate {
        func: AggFunc,
        distinct: bool,
        arg: Box<SqlExpr>,
    },
}

impl SqlExpr {
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> SqlExpr {
        SqlExpr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn aggregate(func: AggFunc, distinct: bool, arg: SqlExpr) -> SqlExpr {
        SqlExpr::Aggregate {
            func,
            distinct,
            arg: Box::new(arg),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SqlExpr::CountStar | SqlExpr::Aggregate { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FromItem {
    Table { name: String, alias: Option<String> },
    Derived { query: Box<SqlQuery>, alias: String },
}

impl FromItem {
    pub fn table(name: impl Into<String>) -> FromItem {
        FromItem::Table {
            name: name.into(),
            alias: None,
        }
    }

    /// Name that column references use for this item.
    pub fn reference_name(&self) -> &str {
        match self {
            FromItem::Table { name, alias } => alias.as_deref().unwrap_or(name),
            FromItem::Derived { alias, .. } => alias,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// `expr = value`; a null value renders as `IS NULL`.
    Eq { expr: SqlExpr, value: Value },
    In { expr: SqlExpr, values: Vec<Value> },
    IsNull(SqlExpr),
    IsNotNull(SqlExpr),
    /// Any of `rows` over `exprs`, all from the same hierarchy.
    MultiIn {
        exprs: Vec<SqlExpr>,
        rows: Vec<Vec<Value>>,
    },
    /// Join condition.
    ColumnEq(SqlExpr, SqlExpr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub ascending: bool,
    pub nulls_last: bool,
    pub nullable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SqlQuery {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub predicates: Vec<Predicate>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
}

impl SqlQuery {
    pub fn select(mut self, expr: SqlExpr, alias: impl Into<String>) -> SqlQuery {
        self.select.push(SelectItem {
            expr,
            alias: alias.into(),
        });
        self
    }

    pub fn from_table(mut self, name: impl Into<String>) -> SqlQuery {
        self.from.push(FromItem::table(name));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> SqlQuery {
        self.predicates.push(predicate);
        self
    }

    pub fn group(mut self, expr: SqlExpr) -> SqlQuery {
        self.group_by.push(expr);
        self
    }

    pub fn column_aliases(&self) -> Vec<String> {
        self.select.iter().map(|s| s.alias.clone()).collect()
    }

    /// Render as a single SQL statement for `dialect`.
    pub fn render(&self, dialect: &Dialect) -> SqlResult<String> {
        let mut out = String::new();
        self.emit(dialect, 0, &mut out)?;
        Ok(out)
    }

    fn emit(&self, dialect: &Dialect, indent: usize, out: &mut String) -> SqlResult<()> {
        if self.select.is_empty() {
            return Err(SqlError::Unsupported("query selects no columns".into()));
        }
        if self.from.is_empty() {
            return Err(SqlError::Unsupported("query has no FROM item".into()));
        }
        let pad = pad(indent);

        out.push_str(&pad);
        out.push_str(if self.distinct {
            "SELECT DISTINCT"
        } else {
            "SELECT"
        });
        for (i, item) in self.select.iter().enumerate() {
            out.push_str(if i == 0 { "\n" } else { ",\n" });
            out.push_str(&pad);
            out.push_str("    ");
            out.push_str(&render_expr(dialect, &item.expr)?);
            out.push_str(" AS ");
            out.push_str(&quote_identifier(dialect, &item.alias));
        }

        out.push('\n');
        out.push_str(&pad);
        out.push_str("FROM");
        for (i, item) in self.from.iter().enumerate() {
            out.push_str(if i == 0 { "\n" } else { ",\n" });
            match item {
                FromItem::Table { name, alias } => {
                    out.push_str(&pad);
                    out.push_str("    ");
                    out.push_str(&quote_identifier(dialect, name));
                    if let Some(alias) = alias {
                        if let Some(clause) = derived_table_alias(dialect, alias, true) {
                            out.push(' ');
                            out.push_str(&clause);
                        }
                    }
                }
                FromItem::Derived { query, alias } => {
                    out.push_str(&pad);
                    out.push_str("    (\n");
                    query.emit(dialect, indent + 8, out)?;
                    out.push('\n');
                    out.push_str(&pad);
                    out.push_str("    )");
                    if let Some(clause) = derived_table_alias(dialect, alias, true) {
                        out.push(' ');
                        out.push_str(&clause);
                    }
                }
            }
        }

        if !self.predicates.is_empty() {
            out.push('\n');
            out.push_str(&pad);
            out.push_str("WHERE ");
            let parts = self
                .predicates
                .iter()
                .map(|p| render_predicate(dialect, p))
                .collect::<SqlResult<Vec<_>>>()?;
            out.push_str(&parts.join(&format!("\n{pad}    AND ")));
        }

        if !self.group_by.is_empty() {
            out.push('\n');
            out.push_str(&pad);
            out.push_str("GROUP BY ");
            let parts = self
                .group_by
                .iter()
                .map(|e| self.group_by_item(dialect, e))
                .collect::<SqlResult<Vec<_>>>()?;
            out.push_str(&parts.join(", "));
        }

        if !self.order_by.is_empty() {
            out.push('\n');
            out.push_str(&pad);
            out.push_str("ORDER BY ");
            let parts = self
                .order_by
                .iter()
                .map(|o| {
                    Ok(generate_order_item(
                        dialect,
                        &render_expr(dialect, &o.expr)?,
                        o.nullable,
                        o.ascending,
                        o.nulls_last,
                    ))
                })
                .collect::<SqlResult<Vec<_>>>()?;
            out.push_str(&parts.join(", "));
        }
        Ok(())
    }

    fn group_by_item(&self, dialect: &Dialect, expr: &SqlExpr) -> SqlResult<String> {
        if dialect.allows_group_by_alias {
            if let Some(item) = self.select.iter().find(|s| &s.expr == expr) {
                return Ok(quote_identifier(dialect, &item.alias));
            }
        }
        render_expr(dialect, expr)
    }
}

fn pad(indent: usize) -> String {
    " ".repeat(indent)
}

pub fn render_expr(dialect: &Dialect, expr: &SqlExpr) -> SqlResult<String> {
    Ok(match expr {
        SqlExpr::Column { table, column } => quote_qualified(dialect, table, column),
        SqlExpr::Literal(value) => quote_value(dialect, value),
        SqlExpr::CountStar => "COUNT(*)".to_string(),
        SqlExpr::Aggregate {
            func,
            distinct,
            arg,
        } => {
            if *distinct && !dialect.allows_count_distinct {
                return Err(SqlError::Unsupported(format!(
                    "{:?} does not support {}(DISTINCT ..)",
                    dialect.kind,
                    func.keyword()
                )));
            }
            format!(
                "{}({}{})",
                func.keyword(),
                if *distinct { "DISTINCT " } else { "" },
                render_expr(dialect, arg)?
            )
        }
    })
}

pub fn render_predicate(dialect: &Dialect, predicate: &Predicate) -> SqlResult<String> {
    Ok(match predicate {
        Predicate::Eq { expr, value } => {
            let expr = render_expr(dialect, expr)?;
            match value {
                Value::Null => format!("{expr} IS NULL"),
                value => format!("{expr} = {}", quote_value(dialect, value)),
            }
        }
        Predicate::In { expr, values } => {
            generate_in_predicate(dialect, &render_expr(dialect, expr)?, values)
        }
        Predicate::IsNull(expr) => format!("{} IS NULL", render_expr(dialect, expr)?),
        Predicate::IsNotNull(expr) => format!("{} IS NOT NULL", render_expr(dialect, expr)?),
        Predicate::MultiIn { exprs, rows } => {
            let exprs = exprs
                .iter()
                .map(|e| render_expr(dialect, e))
                .collect::<SqlResult<Vec<_>>>()?;
            generate_compound_in(dialect, &exprs, rows)
        }
        Predicate::ColumnEq(left, right) => format!(
            "{} = {}",
            render_expr(dialect, left)?,
            render_expr(dialect, right)?
        ),
        Predicate::And(parts) | Predicate::Or(parts) => {
            if parts.is_empty() {
                return Ok(if matches!(predicate, Predicate::And(_)) {
                    "1 = 1".to_string()
                } else {
                    "1 = 0".to_string()
                });
            }
            let joiner = if matches!(predicate, Predicate::And(_)) {
                " AND "
            } else {
                " OR "
            };
            let parts = parts
                .iter()
                .map(|p| render_predicate(dialect, p))
                .collect::<SqlResult<Vec<_>>>()?;
            format!("({})", parts.join(joiner))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use pretty_assertions::assert_eq;

    fn yearly_sales() -> SqlQuery {
        let year = SqlExpr::column("time_by_day", "the_year");
        SqlQuery::default()
            .select(year.clone(), "c0")
            .select(
                SqlExpr::aggregate(
                    AggFunc::Sum,
                    false,
                    SqlExpr::column("sales_fact", "unit_sales"),
                ),
                "m0",
            )
            .from_table("sales_fact")
            .from_table("time_by_day")
            .filter(Predicate::ColumnEq(
                SqlExpr::column("sales_fact", "time_id"),
                SqlExpr::column("time_by_day", "time_id"),
            ))
            .filter(Predicate::In {
                expr: year.clone(),
                values: vec![Value::from(1997), Value::from(1998)],
            })
            .group(year)
    }

    #[test]
    fn renders_grouped_star_join() {
        let sql = yearly_sales()
            .render(&Dialect::for_kind(DialectKind::Postgres))
            .unwrap();
        assert_eq!(
            sql,
            "SELECT\n    \"time_by_day\".\"the_year\" AS \"c0\",\n    SUM(\"sales_fact\".\"unit_sales\") AS \"m0\"\nFROM\n    \"sales_fact\",\n    \"time_by_day\"\nWHERE \"sales_fact\".\"time_id\" = \"time_by_day\".\"time_id\"\n    AND \"time_by_day\".\"the_year\" IN (1997, 1998)\nGROUP BY \"c0\""
        );
    }

    #[test]
    fn group_by_repeats_expression_without_alias_support() {
        let sql = yearly_sales()
            .render(&Dialect::for_kind(DialectKind::Oracle))
            .unwrap();
        assert!(sql.ends_with("GROUP BY \"time_by_day\".\"the_year\""), "{sql}");
    }

    #[test]
    fn distinct_aggregate_rejected_where_unsupported() {
        let query = SqlQuery::default()
            .select(
                SqlExpr::aggregate(
                    AggFunc::Count,
                    true,
                    SqlExpr::column("sales_fact", "customer_id"),
                ),
                "m0",
            )
            .from_table("sales_fact");
        let err = query
            .render(&Dialect::for_kind(DialectKind::Access))
            .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
        assert!(query
            .render(&Dialect::for_kind(DialectKind::MySql))
            .unwrap()
            .contains("COUNT(DISTINCT `sales_fact`.`customer_id`)"));
    }

    #[test]
    fn derived_table_alias_follows_dialect() {
        let inner = SqlQuery {
            distinct: true,
            ..SqlQuery::default()
        }
        .select(SqlExpr::column("sales_fact", "customer_id"), "d0")
        .from_table("sales_fact");
        let outer = SqlQuery {
            from: vec![FromItem::Derived {
                query: Box::new(inner),
                alias: "dummyname".into(),
            }],
            ..SqlQuery::default()
        }
        .select(
            SqlExpr::aggregate(AggFunc::Count, false, SqlExpr::column("dummyname", "d0")),
            "m0",
        );
        let oracle = outer
            .render(&Dialect::for_kind(DialectKind::Oracle))
            .unwrap();
        assert!(oracle.contains("    ) \"dummyname\""), "{oracle}");
        let mysql = outer
            .render(&Dialect::for_kind(DialectKind::MySql))
            .unwrap();
        assert!(mysql.contains("    ) AS `dummyname`"), "{mysql}");
    }

    #[test]
    fn empty_select_is_rejected() {
        let err = SqlQuery::default()
            .from_table("t")
            .render(&Dialect::for_kind(DialectKind::Ansi))
            .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)));
    }
}
