//! Per-backend SQL capabilities.
//!
//! Each supported backend is described by one [`Dialect`] record: plain data answering the
//! fixed list of questions the SQL generator asks (quoting, null collation, `COUNT(DISTINCT)`
//! support, derived-table aliasing, multi-value `IN`, inline rows). Behaviour is implemented
//! once by the free functions in this module, which branch on the record's fields. A missing
//! capability is always a `false` flag or an explicit `Unknown`/`None` value, never an error.
use olap_model::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialectKind {
    Ansi,
    MySql,
    MariaDb,
    SqlServer,
    Sybase,
    Access,
    ClickHouse,
    Postgres,
    Oracle,
    Db2,
    Snowflake,
    Teradata,
    Netezza,
    Vertica,
    Hive,
    Derby,
}

/// Where a backend places nulls when no explicit null ordering is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NullCollation {
    /// Nulls compare greater than every value: last when ascending, first when descending.
    High,
    /// Nulls compare less than every value: first when ascending, last when descending.
    Low,
    /// Nulls always come first.
    First,
    /// Nulls always come last.
    Last,
    /// Not documented for the backend; callers must force the order explicitly.
    Unknown,
}

impl NullCollation {
    /// Whether nulls natively land last for the given direction, when known.
    pub fn nulls_last(self, ascending: bool) -> Option<bool> {
        match self {
            NullCollation::High => Some(ascending),
            NullCollation::Low => Some(!ascending),
            NullCollation::First => Some(false),
            NullCollation::Last => Some(true),
            NullCollation::Unknown => None,
        }
    }
}

/// How a backend renders literal rows (`generate_inline`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InlineStyle {
    /// `(VALUES (..), (..)) AS t (c1, c2)`
    Values,
    /// `SELECT .. UNION ALL SELECT ..`, selecting from the named one-row table when the backend
    /// cannot `SELECT` without a `FROM` clause.
    UnionSelect { one_row_table: Option<&'static str> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DateLiteralStyle {
    /// `DATE '1997-01-01'`
    Ansi,
    /// `#1997-01-01#`
    Hash,
    /// `CONVERT(DATE, '1997-01-01')`
    Convert,
    /// `'1997-01-01'`
    Plain,
}

/// Capability record for one backend. Pure data; identical for every connection of a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dialect {
    pub kind: DialectKind,
    pub quote_open: char,
    pub quote_close: char,
    /// Backslash is an escape character inside string literals (MySQL family).
    pub backslash_escapes: bool,
    pub date_literal: DateLiteralStyle,
    pub supports_boolean_literals: bool,
    pub null_collation: NullCollation,
    /// `ORDER BY x ASC NULLS LAST` is accepted.
    pub supports_nulls_ordering: bool,
    pub allows_count_distinct: bool,
    pub allows_as_in_from_alias: bool,
    pub requires_derived_table_alias: bool,
    /// `(a, b) IN ((1, 2), (3, 4))` is accepted.
    pub supports_multi_value_in: bool,
    pub allows_group_by_alias: bool,
    pub max_in_list_values: Option<usize>,
    pub inline_style: InlineStyle,
}

const ANSI: Dialect = Dialect {
    kind: DialectKind::Ansi,
    quote_open: '"',
    quote_close: '"',
    backslash_escapes: false,
    date_literal: DateLiteralStyle::Ansi,
    supports_boolean_literals: true,
    null_collation: NullCollation::Unknown,
    supports_nulls_ordering: true,
    allows_count_distinct: true,
    allows_as_in_from_alias: true,
    requires_derived_table_alias: true,
    supports_multi_value_in: true,
    allows_group_by_alias: false,
    max_in_list_values: None,
    inline_style: InlineStyle::Values,
};

impl Dialect {
    pub const fn for_kind(kind: DialectKind) -> Dialect {
        match kind {
            DialectKind::Ansi => ANSI,
            DialectKind::MySql | DialectKind::MariaDb => Dialect {
                kind,
                quote_open: '`',
                quote_close: '`',
                backslash_escapes: true,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                allows_group_by_alias: true,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::SqlServer => Dialect {
                kind,
                quote_open: '[',
                quote_close: ']',
                date_literal: DateLiteralStyle::Convert,
                supports_boolean_literals: false,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                supports_multi_value_in: false,
                ..ANSI
            },
            DialectKind::Sybase => Dialect {
                kind,
                quote_open: '[',
                quote_close: ']',
                date_literal: DateLiteralStyle::Plain,
                supports_boolean_literals: false,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Access => Dialect {
                kind,
                quote_open: '[',
                quote_close: ']',
                date_literal: DateLiteralStyle::Hash,
                supports_boolean_literals: false,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                allows_count_distinct: false,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: Some("(SELECT COUNT(*) FROM MSysObjects)"),
                },
                ..ANSI
            },
            DialectKind::ClickHouse => Dialect {
                kind,
                quote_open: '`',
                quote_close: '`',
                backslash_escapes: true,
                null_collation: NullCollation::Last,
                allows_group_by_alias: true,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Postgres => Dialect {
                kind,
                null_collation: NullCollation::High,
                allows_group_by_alias: true,
                ..ANSI
            },
            DialectKind::Oracle => Dialect {
                kind,
                supports_boolean_literals: false,
                null_collation: NullCollation::High,
                allows_as_in_from_alias: false,
                requires_derived_table_alias: false,
                max_in_list_values: Some(1000),
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: Some("dual"),
                },
                ..ANSI
            },
            DialectKind::Db2 => Dialect {
                kind,
                supports_boolean_literals: false,
                null_collation: NullCollation::High,
                ..ANSI
            },
            DialectKind::Snowflake => Dialect {
                kind,
                null_collation: NullCollation::High,
                allows_group_by_alias: true,
                ..ANSI
            },
            DialectKind::Teradata => Dialect {
                kind,
                supports_boolean_literals: false,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Netezza => Dialect {
                kind,
                null_collation: NullCollation::High,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Vertica => Dialect {
                kind,
                null_collation: NullCollation::High,
                allows_group_by_alias: true,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Hive => Dialect {
                kind,
                quote_open: '`',
                quote_close: '`',
                backslash_escapes: true,
                date_literal: DateLiteralStyle::Plain,
                null_collation: NullCollation::Low,
                supports_nulls_ordering: false,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: None,
                },
                ..ANSI
            },
            DialectKind::Derby => Dialect {
                kind,
                supports_boolean_literals: false,
                null_collation: NullCollation::High,
                supports_multi_value_in: false,
                inline_style: InlineStyle::UnionSelect {
                    one_row_table: Some("SYSIBM.SYSDUMMY1"),
                },
                ..ANSI
            },
        }
    }

    /// Pick the dialect for a backend from its reported product name and version.
    pub fn detect(product_name: &str, product_version: &str) -> Dialect {
        let kind = DialectKind::detect(product_name, product_version);
        let mut dialect = Dialect::for_kind(kind);
        if kind == DialectKind::Hive && version_at_least(product_version, 2, 1) {
            dialect.supports_nulls_ordering = true;
        }
        if kind == DialectKind::SqlServer && !version_at_least(product_version, 10, 0) {
            dialect.inline_style = InlineStyle::UnionSelect {
                one_row_table: None,
            };
        }
        dialect
    }
}

impl DialectKind {
    pub const ALL: [DialectKind; 16] = [
        DialectKind::Ansi,
        DialectKind::MySql,
        DialectKind::MariaDb,
        DialectKind::SqlServer,
        DialectKind::Sybase,
        DialectKind::Access,
        DialectKind::ClickHouse,
        DialectKind::Postgres,
        DialectKind::Oracle,
        DialectKind::Db2,
        DialectKind::Snowflake,
        DialectKind::Teradata,
        DialectKind::Netezza,
        DialectKind::Vertica,
        DialectKind::Hive,
        DialectKind::Derby,
    ];

    pub fn detect(product_name: &str, product_version: &str) -> DialectKind {
        let name = product_name.to_ascii_lowercase();
        let version = product_version.to_ascii_lowercase();
        if name.contains("mariadb") || (name.contains("mysql") && version.contains("mariadb")) {
            DialectKind::MariaDb
        } else if name.contains("mysql") {
            DialectKind::MySql
        } else if name.contains("sql server") {
            DialectKind::SqlServer
        } else if name.contains("adaptive server") || name.contains("sybase") {
            DialectKind::Sybase
        } else if name.contains("access") {
            DialectKind::Access
        } else if name.contains("clickhouse") {
            DialectKind::ClickHouse
        } else if name.contains("postgres") {
            DialectKind::Postgres
        } else if name.contains("oracle") {
            DialectKind::Oracle
        } else if name.starts_with("db2") {
            DialectKind::Db2
        } else if name.contains("snowflake") {
            DialectKind::Snowflake
        } else if name.contains("teradata") {
            DialectKind::Teradata
        } else if name.contains("netezza") {
            DialectKind::Netezza
        } else if name.contains("vertica") {
            DialectKind::Vertica
        } else if name.contains("hive") {
            DialectKind::Hive
        } else if name.contains("derby") {
            DialectKind::Derby
        } else {
            DialectKind::Ansi
        }
    }
}

fn version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u32>().unwrap_or(0));
    let found_major = parts.next().unwrap_or(0);
    let found_minor = parts.next().unwrap_or(0);
    (found_major, found_minor) >= (major, minor)
}

pub fn quote_identifier(dialect: &Dialect, name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(dialect.quote_open);
    for c in name.chars() {
        if c == dialect.quote_close {
            out.push(c);
        }
        out.push(c);
    }
    out.push(dialect.quote_close);
    out
}

/// `table.column` with each part quoted.
pub fn quote_qualified(dialect: &Dialect, table: &str, column: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(dialect, table),
        quote_identifier(dialect, column)
    )
}

pub fn quote_string_literal(dialect: &Dialect, value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if dialect.backslash_escapes => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Date literal for an ISO `YYYY-MM-DD` string; `None` when the input is not such a date.
pub fn quote_date_literal(dialect: &Dialect, iso_date: &str) -> Option<String> {
    let bytes = iso_date.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !well_formed {
        return None;
    }
    let month: u32 = iso_date[5..7].parse().ok()?;
    let day: u32 = iso_date[8..10].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(match dialect.date_literal {
        DateLiteralStyle::Ansi => format!("DATE '{iso_date}'"),
        DateLiteralStyle::Hash => format!("#{iso_date}#"),
        DateLiteralStyle::Convert => format!("CONVERT(DATE, '{iso_date}')"),
        DateLiteralStyle::Plain => format!("'{iso_date}'"),
    })
}

pub fn quote_boolean_literal(dialect: &Dialect, value: bool) -> &'static str {
    match (dialect.supports_boolean_literals, value) {
        (true, true) => "TRUE",
        (true, false) => "FALSE",
        (false, true) => "1",
        (false, false) => "0",
    }
}

pub fn quote_value(dialect: &Dialect, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => quote_boolean_literal(dialect, *b).to_string(),
        Value::Number(n) => {
            if n.0.fract() == 0.0 && n.0.abs() < 1e15 {
                format!("{}", n.0 as i64)
            } else {
                format!("{}", n.0)
            }
        }
        Value::Text(s) => quote_string_literal(dialect, s),
    }
}

/// One key of a generated `ORDER BY` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderKey {
    /// Sort on `CASE WHEN expr IS NULL THEN null_rank ELSE 1 - null_rank END` ascending.
    NullFlag { expr: String, null_rank: u8 },
    /// Sort on the expression itself; `explicit_nulls_last` is set when the backend accepts
    /// `NULLS FIRST`/`NULLS LAST`.
    Value {
        expr: String,
        ascending: bool,
        explicit_nulls_last: Option<bool>,
    },
}

/// Order keys that place nulls where requested regardless of the backend's native collation.
pub fn order_keys(
    dialect: &Dialect,
    expr: &str,
    nullable: bool,
    ascending: bool,
    nulls_last: bool,
) -> Vec<OrderKey> {
    let value_key = |explicit| OrderKey::Value {
        expr: expr.to_string(),
        ascending,
        explicit_nulls_last: explicit,
    };
    if !nullable {
        return vec![value_key(None)];
    }
    if dialect.supports_nulls_ordering {
        return vec![value_key(Some(nulls_last))];
    }
    if dialect.null_collation.nulls_last(ascending) == Some(nulls_last) {
        return vec![value_key(None)];
    }
    vec![
        OrderKey::NullFlag {
            expr: expr.to_string(),
            null_rank: u8::from(nulls_last),
        },
        value_key(None),
    ]
}

pub fn render_order_key(key: &OrderKey) -> String {
    match key {
        OrderKey::NullFlag { expr, null_rank } => format!(
            "CASE WHEN {expr} IS NULL THEN {null_rank} ELSE {} END",
            1 - null_rank
        ),
        OrderKey::Value {
            expr,
            ascending,
            explicit_nulls_last,
        } => {
            let dir = if *ascending { "ASC" } else { "DESC" };
            match explicit_nulls_last {
                Some(true) => format!("{expr} {dir} NULLS LAST"),
                Some(false) => format!("{expr} {dir} NULLS FIRST"),
                None => format!("{expr} {dir}"),
            }
        }
    }
}

/// `ORDER BY` item(s) for `expr`, comma separated.
pub fn generate_order_item(
    dialect: &Dialect,
    expr: &str,
    nullable: bool,
    ascending: bool,
    nulls_last: bool,
) -> String {
    order_keys(dialect, expr, nullable, ascending, nulls_last)
        .iter()
        .map(render_order_key)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `expr IN (...)` for a single column, splitting long lists and adding `IS NULL` for null
/// values (a null never matches inside `IN`).
pub fn generate_in_predicate(dialect: &Dialect, expr: &str, values: &[Value]) -> String {
    let has_null = values.iter().any(Value::is_null);
    let literals: Vec<String> = values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| quote_value(dialect, v))
        .collect();

    let mut disjuncts = Vec::new();
    match literals.len() {
        0 => {}
        1 => disjuncts.push(format!("{expr} = {}", literals[0])),
        _ => {
            let chunk = dialect.max_in_list_values.unwrap_or(usize::MAX).max(1);
            for part in literals.chunks(chunk) {
                disjuncts.push(format!("{expr} IN ({})", part.join(", ")));
            }
        }
    }
    if has_null {
        disjuncts.push(format!("{expr} IS NULL"));
    }
    match disjuncts.len() {
        0 => "1 = 0".to_string(),
        1 => disjuncts.remove(0),
        _ => format!("({})", disjuncts.join(" OR ")),
    }
}

/// Predicate matching any of `rows` over `exprs`, using `(a, b) IN (...)` when the backend
/// accepts it and an `OR` of conjunctions otherwise.
pub fn generate_compound_in(dialect: &Dialect, exprs: &[String], rows: &[Vec<Value>]) -> String {
    if rows.is_empty() {
        return "1 = 0".to_string();
    }
    let any_null = rows.iter().flatten().any(Value::is_null);
    if dialect.supports_multi_value_in && !any_null && exprs.len() > 1 {
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let parts: Vec<String> = row.iter().map(|v| quote_value(dialect, v)).collect();
                format!("({})", parts.join(", "))
            })
            .collect();
        return format!("({}) IN ({})", exprs.join(", "), tuples.join(", "));
    }
    let disjuncts: Vec<String> = rows
        .iter()
        .map(|row| {
            let conj: Vec<String> = exprs
                .iter()
                .zip(row)
                .map(|(e, v)| match v {
                    Value::Null => format!("{e} IS NULL"),
                    v => format!("{e} = {}", quote_value(dialect, v)),
                })
                .collect();
            format!("({})", conj.join(" AND "))
        })
        .collect();
    if disjuncts.len() == 1 {
        disjuncts[0].clone()
    } else {
        format!("({})", disjuncts.join(" OR "))
    }
}

/// `COUNT(DISTINCT expr)`, or `None` when the backend needs the derived-table emulation.
pub fn generate_count_distinct(dialect: &Dialect, expr: &str) -> Option<String> {
    dialect
        .allows_count_distinct
        .then(|| format!("COUNT(DISTINCT {expr})"))
}

/// Inline constant table with the given column names. An empty row list yields a query with
/// no rows.
pub fn generate_inline(dialect: &Dialect, columns: &[&str], rows: &[Vec<Value>]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(dialect, c)).collect();
    match dialect.inline_style {
        InlineStyle::Values if !rows.is_empty() => {
            let tuples: Vec<String> = rows
                .iter()
                .map(|row| {
                    let parts: Vec<String> = row.iter().map(|v| quote_value(dialect, v)).collect();
                    format!("({})", parts.join(", "))
                })
                .collect();
            let alias = quote_identifier(dialect, "t");
            format!(
                "SELECT * FROM (VALUES {}) {}{alias} ({})",
                tuples.join(", "),
                if dialect.allows_as_in_from_alias { "AS " } else { "" },
                names.join(", ")
            )
        }
        InlineStyle::Values => {
            let nulls: Vec<String> = names.iter().map(|n| format!("NULL AS {n}")).collect();
            format!(
                "SELECT * FROM (SELECT {}) {}{} WHERE 1 = 0",
                nulls.join(", "),
                if dialect.allows_as_in_from_alias { "AS " } else { "" },
                quote_identifier(dialect, "t")
            )
        }
        InlineStyle::UnionSelect { one_row_table } => {
            let from = one_row_table
                .map(|t| format!(" FROM {t}"))
                .unwrap_or_default();
            if rows.is_empty() {
                let nulls: Vec<String> = names.iter().map(|n| format!("NULL AS {n}")).collect();
                return format!("SELECT {}{from} WHERE 1 = 0", nulls.join(", "));
            }
            rows.iter()
                .map(|row| {
                    let parts: Vec<String> = row
                        .iter()
                        .zip(&names)
                        .map(|(v, n)| format!("{} AS {n}", quote_value(dialect, v)))
                        .collect();
                    format!("SELECT {}{from}", parts.join(", "))
                })
                .collect::<Vec<_>>()
                .join(" UNION ALL ")
        }
    }
}

/// Alias clause for a derived table, or `None` when the backend neither needs nor wants one.
pub fn derived_table_alias(dialect: &Dialect, alias: &str, referenced: bool) -> Option<String> {
    if !referenced && !dialect.requires_derived_table_alias {
        return None;
    }
    let quoted = quote_identifier(dialect, alias);
    Some(if dialect.allows_as_in_from_alias {
        format!("AS {quoted}")
    } else {
        quoted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_backends_from_product_metadata() {
        assert_eq!(DialectKind::detect("MySQL", "8.0.33"), DialectKind::MySql);
        assert_eq!(
            DialectKind::detect("MySQL", "5.5.5-10.11.2-MariaDB"),
            DialectKind::MariaDb
        );
        assert_eq!(
            DialectKind::detect("Microsoft SQL Server", "15.00.2000"),
            DialectKind::SqlServer
        );
        assert_eq!(DialectKind::detect("PostgreSQL", "16.1"), DialectKind::Postgres);
        assert_eq!(DialectKind::detect("DB2/LINUXX8664", "11.5"), DialectKind::Db2);
        assert_eq!(DialectKind::detect("ACCESS", "04.00.0000"), DialectKind::Access);
        assert_eq!(DialectKind::detect("Frobnicator", "1.0"), DialectKind::Ansi);
    }

    #[test]
    fn version_dependent_capabilities() {
        assert!(!Dialect::detect("Apache Hive", "1.2.1").supports_nulls_ordering);
        assert!(Dialect::detect("Apache Hive", "3.1.0").supports_nulls_ordering);
        assert_eq!(
            Dialect::detect("Microsoft SQL Server", "9.00.1399").inline_style,
            InlineStyle::UnionSelect {
                one_row_table: None
            }
        );
    }

    #[test]
    fn identifiers_are_quoted_per_backend() {
        let mysql = Dialect::for_kind(DialectKind::MySql);
        let mssql = Dialect::for_kind(DialectKind::SqlServer);
        let pg = Dialect::for_kind(DialectKind::Postgres);
        assert_eq!(quote_identifier(&mysql, "unit sales"), "`unit sales`");
        assert_eq!(quote_identifier(&mssql, "a]b"), "[a]]b]");
        assert_eq!(quote_identifier(&pg, "a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn string_literals_escape_quotes_and_backslashes() {
        let mysql = Dialect::for_kind(DialectKind::MySql);
        let pg = Dialect::for_kind(DialectKind::Postgres);
        assert_eq!(quote_string_literal(&mysql, r"O'Brien\x"), r"'O''Brien\\x'");
        assert_eq!(quote_string_literal(&pg, r"O'Brien\x"), r"'O''Brien\x'");
    }

    #[test]
    fn date_and_boolean_literals() {
        let access = Dialect::for_kind(DialectKind::Access);
        let oracle = Dialect::for_kind(DialectKind::Oracle);
        assert_eq!(
            quote_date_literal(&access, "1997-03-01").as_deref(),
            Some("#1997-03-01#")
        );
        assert_eq!(
            quote_date_literal(&oracle, "1997-03-01").as_deref(),
            Some("DATE '1997-03-01'")
        );
        assert_eq!(quote_date_literal(&oracle, "1997-13-01"), None);
        assert_eq!(quote_boolean_literal(&oracle, true), "1");
        assert_eq!(
            quote_boolean_literal(&Dialect::for_kind(DialectKind::Postgres), false),
            "FALSE"
        );
    }

    #[test]
    fn order_item_forces_nulls_last_on_mysql() {
        let mysql = Dialect::for_kind(DialectKind::MySql);
        assert_eq!(
            generate_order_item(&mysql, "`c`", true, true, true),
            "CASE WHEN `c` IS NULL THEN 1 ELSE 0 END, `c` ASC"
        );
        assert_eq!(generate_order_item(&mysql, "`c`", true, false, true), "`c` DESC");
        let pg = Dialect::for_kind(DialectKind::Postgres);
        assert_eq!(
            generate_order_item(&pg, "\"c\"", true, true, false),
            "\"c\" ASC NULLS FIRST"
        );
        assert_eq!(generate_order_item(&pg, "\"c\"", false, true, false), "\"c\" ASC");
    }

    #[test]
    fn in_predicates_handle_nulls_and_chunking() {
        let oracle = Dialect::for_kind(DialectKind::Oracle);
        assert_eq!(
            generate_in_predicate(&oracle, "c", &[Value::from(1), Value::Null]),
            "(c = 1 OR c IS NULL)"
        );
        let values: Vec<Value> = (0..1001).map(Value::from).collect();
        let sql = generate_in_predicate(&oracle, "c", &values);
        assert_eq!(sql.matches(" IN (").count(), 2);
        assert_eq!(generate_in_predicate(&oracle, "c", &[]), "1 = 0");
    }

    #[test]
    fn compound_in_expands_without_multi_value_support() {
        let rows = vec![
            vec![Value::from(1997), Value::from("Q1")],
            vec![Value::from(1998), Value::from("Q1")],
        ];
        let exprs = vec!["y".to_string(), "q".to_string()];
        let pg = Dialect::for_kind(DialectKind::Postgres);
        assert_eq!(
            generate_compound_in(&pg, &exprs, &rows),
            "(y, q) IN ((1997, 'Q1'), (1998, 'Q1'))"
        );
        let mssql = Dialect::for_kind(DialectKind::SqlServer);
        assert_eq!(
            generate_compound_in(&mssql, &exprs, &rows),
            "((y = 1997 AND q = 'Q1') OR (y = 1998 AND q = 'Q1'))"
        );
    }

    #[test]
    fn inline_rows_fall_back_to_one_row_table() {
        let rows = vec![vec![Value::from(1), Value::from("a")]];
        let oracle = Dialect::for_kind(DialectKind::Oracle);
        assert_eq!(
            generate_inline(&oracle, &["id", "name"], &rows),
            "SELECT 1 AS \"id\", 'a' AS \"name\" FROM dual"
        );
        let pg = Dialect::for_kind(DialectKind::Postgres);
        assert_eq!(
            generate_inline(&pg, &["id", "name"], &rows),
            "SELECT * FROM (VALUES (1, 'a')) AS \"t\" (\"id\", \"name\")"
        );
        let mysql = Dialect::for_kind(DialectKind::MySql);
        assert_eq!(
            generate_inline(&mysql, &["id"], &[vec![Value::from(1)], vec![Value::from(2)]]),
            "SELECT 1 AS `id` UNION ALL SELECT 2 AS `id`"
        );
    }

    #[test]
    fn derived_table_alias_rules() {
        let oracle = Dialect::for_kind(DialectKind::Oracle);
        let mysql = Dialect::for_kind(DialectKind::MySql);
        assert_eq!(derived_table_alias(&oracle, "dt", false), None);
        assert_eq!(derived_table_alias(&oracle, "dt", true).as_deref(), Some("\"dt\""));
        assert_eq!(derived_table_alias(&mysql, "dt", false).as_deref(), Some("AS `dt`"));
    }
}
