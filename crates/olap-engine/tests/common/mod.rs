#![allow(dead_code)]

use std::sync::Arc;

use olap_engine::{EngineConfig, Exp, Session};
use olap_model::test_support::{food_mart, FoodMartIds};
use olap_model::{Schema, Value};
use olap_sql::{FixedStatistics, InMemoryDatabase};

/// `time_id -> (year, quarter)`.
pub const TIMES: [(i64, i32, &str); 6] = [
    (1, 1997, "Q1"),
    (2, 1997, "Q2"),
    (3, 1997, "Q3"),
    (4, 1997, "Q4"),
    (5, 1998, "Q1"),
    (6, 1998, "Q2"),
];

/// `store_id -> (country, state)`.
pub const STORES: [(i64, &str, &str); 4] = [
    (1, "USA", "CA"),
    (2, "USA", "OR"),
    (3, "USA", "WA"),
    (4, "Canada", "BC"),
];

#[derive(Clone, Debug)]
pub struct FactRow {
    pub time_id: i64,
    pub store_id: i64,
    pub gender: &'static str,
    pub product_id: i64,
    pub customer_id: i64,
    pub unit_sales: f64,
    pub store_sales: f64,
}

impl FactRow {
    pub fn year(&self) -> i32 {
        TIMES[(self.time_id - 1) as usize].1
    }

    pub fn quarter(&self) -> &'static str {
        TIMES[(self.time_id - 1) as usize].2
    }

    pub fn country(&self) -> &'static str {
        STORES[(self.store_id - 1) as usize].1
    }

    pub fn state(&self) -> &'static str {
        STORES[(self.store_id - 1) as usize].2
    }
}

/// Every (time, store, gender) combination, except that the Canadian store has no sales in
/// 1998.
pub fn fact_rows() -> Vec<FactRow> {
    let mut rows = Vec::new();
    for (time_id, _, _) in TIMES {
        for (store_id, _, _) in STORES {
            if store_id == 4 && time_id >= 5 {
                continue;
            }
            for (g, gender) in ["F", "M"].into_iter().enumerate() {
                let unit_sales = (time_id * 3 + store_id * 2 + g as i64) as f64;
                rows.push(FactRow {
                    time_id,
                    store_id,
                    gender,
                    product_id: (time_id + store_id) % 3,
                    customer_id: (time_id * store_id + g as i64) % 7,
                    unit_sales,
                    store_sales: unit_sales * 2.5,
                });
            }
        }
    }
    rows
}

pub fn unit_sales(filter: impl Fn(&FactRow) -> bool) -> f64 {
    fact_rows().iter().filter(|r| filter(r)).map(|r| r.unit_sales).sum()
}

pub fn schema() -> (Arc<Schema>, FoodMartIds) {
    let (schema, ids) = food_mart();
    (Arc::new(schema), ids)
}

/// FoodMart tables in a fresh in-memory backend reporting `product` as its product name.
/// Both the fact table and the aggregate table carry catalog row estimates.
pub fn database(product: &str) -> InMemoryDatabase {
    let db = InMemoryDatabase::new(product, "1.0");
    let facts = fact_rows();
    db.add_table(
        "sales_fact",
        &[
            "time_id",
            "store_id",
            "gender",
            "product_id",
            "customer_id",
            "unit_sales",
            "store_sales",
        ],
        facts
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.time_id),
                    Value::from(r.store_id),
                    Value::from(r.gender),
                    Value::from(r.product_id),
                    Value::from(r.customer_id),
                    Value::from(r.unit_sales),
                    Value::from(r.store_sales),
                ]
            })
            .collect(),
    )
    .unwrap();
    db.add_table(
        "time_by_day",
        &["time_id", "the_year", "quarter"],
        TIMES
            .iter()
            .map(|(id, year, quarter)| {
                vec![Value::from(*id), Value::from(*year), Value::from(*quarter)]
            })
            .collect(),
    )
    .unwrap();
    db.add_table(
        "store",
        &["store_id", "store_country", "store_state"],
        STORES
            .iter()
            .map(|(id, country, state)| {
                vec![Value::from(*id), Value::from(*country), Value::from(*state)]
            })
            .collect(),
    )
    .unwrap();

    let years = [1997, 1998];
    db.add_table(
        "agg_sales_by_year",
        &["the_year", "unit_sales", "store_sales", "fact_count"],
        years
            .iter()
            .map(|year| {
                let rows: Vec<&FactRow> = facts.iter().filter(|r| r.year() == *year).collect();
                vec![
                    Value::from(*year),
                    Value::from(rows.iter().map(|r| r.unit_sales).sum::<f64>()),
                    Value::from(rows.iter().map(|r| r.store_sales).sum::<f64>()),
                    Value::from(rows.len() as i64),
                ]
            })
            .collect(),
    )
    .unwrap();
    db.set_row_estimate("sales_fact", facts.len() as u64);
    db.set_row_estimate("agg_sales_by_year", years.len() as u64);
    db
}

/// Session using catalog statistics, so choosing a source never runs a counting query.
pub fn session(db: &InMemoryDatabase, config: EngineConfig) -> Session {
    let (schema, _) = schema();
    Session::new(schema, Arc::new(db.clone()), config).unwrap()
}

/// Session whose statistics know nothing.
pub fn session_without_statistics(db: &InMemoryDatabase) -> Session {
    let (schema, _) = schema();
    Session::with_statistics(
        schema,
        Arc::new(db.clone()),
        Arc::new(FixedStatistics::new()),
        EngineConfig::default(),
    )
    .unwrap()
}

pub fn set(names: &[&str]) -> Exp {
    Exp::set(names.iter().map(|n| Exp::name(n)).collect())
}
