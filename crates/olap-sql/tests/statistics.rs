use olap_model::Value;
use olap_sql::{
    CachingStatistics, ChainedStatistics, Estimate, InMemoryDatabase, MetadataStatistics,
    SqlCountStatistics, StatisticsProvider, StatsScope,
};
use pretty_assertions::assert_eq;

fn database(product: &str) -> InMemoryDatabase {
    let db = InMemoryDatabase::new(product, "1.0");
    db.add_table(
        "sales_fact",
        &["customer_id", "unit_sales"],
        (0..12)
            .map(|i| vec![Value::from(i % 5), Value::from(i)])
            .collect(),
    )
    .unwrap();
    db
}

#[test]
fn metadata_answers_only_known_tables() {
    let db = database("PostgreSQL");
    db.set_row_estimate("sales_fact", 86_837);
    let stats = MetadataStatistics;
    assert_eq!(
        stats.estimate(&db, &StatsScope::table("sales_fact")),
        Estimate::Known(86_837)
    );
    assert_eq!(
        stats.estimate(&db, &StatsScope::table("agg_sales")),
        Estimate::Unknown
    );
    assert_eq!(
        stats.estimate(&db, &StatsScope::column("sales_fact", "customer_id")),
        Estimate::Unknown
    );
    assert_eq!(db.statement_count(), 0);
}

#[test]
fn chain_falls_back_to_count_queries() {
    let db = database("PostgreSQL");
    let stats = ChainedStatistics::standard();
    assert_eq!(
        stats.estimate(&db, &StatsScope::table("sales_fact")),
        Estimate::Known(12)
    );
    assert_eq!(
        stats.estimate(&db, &StatsScope::column("sales_fact", "customer_id")),
        Estimate::Known(5)
    );
    let statements = db.executed_statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].contains("COUNT(DISTINCT"), "{}", statements[1]);
}

#[test]
fn distinct_count_is_emulated_on_access() {
    let db = database("ACCESS");
    let estimate =
        SqlCountStatistics.estimate(&db, &StatsScope::column("sales_fact", "customer_id"));
    assert_eq!(estimate, Estimate::Known(5));
    let sql = db.executed_statements().remove(0);
    assert!(sql.contains("SELECT DISTINCT"), "{sql}");
    assert!(!sql.contains("COUNT(DISTINCT"), "{sql}");
}

#[test]
fn failures_become_unknown() {
    let db = database("PostgreSQL");
    assert_eq!(
        SqlCountStatistics.estimate(&db, &StatsScope::table("missing_table")),
        Estimate::Unknown
    );
    db.fail_next(1);
    assert_eq!(
        SqlCountStatistics.estimate(&db, &StatsScope::table("sales_fact")),
        Estimate::Unknown
    );
    assert_eq!(Estimate::Unknown.as_i64(), -1);
}

#[test]
fn caching_never_requeries_within_a_session() {
    let db = database("PostgreSQL");
    let stats = CachingStatistics::new(ChainedStatistics::standard());
    let scope = StatsScope::table("sales_fact");
    assert_eq!(stats.estimate(&db, &scope), Estimate::Known(12));
    assert_eq!(stats.estimate(&db, &scope), Estimate::Known(12));
    assert_eq!(db.statement_count(), 1);

    stats.clear();
    assert_eq!(stats.estimate(&db, &scope), Estimate::Known(12));
    assert_eq!(db.statement_count(), 2);
}
