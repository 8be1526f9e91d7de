//! A small FoodMart-style catalog shared by unit and integration tests.
use crate::builder::{HierarchyDef, SchemaBuilder};
use crate::schema::{CubeId, HierarchyId, LevelId, MeasureId, MemberId, Schema};
use crate::star::{AggregateTable, Aggregator};

#[derive(Clone, Debug)]
pub struct FoodMartIds {
    pub cube: CubeId,
    pub time: HierarchyId,
    pub year: LevelId,
    pub quarter: LevelId,
    pub y1997: MemberId,
    pub y1998: MemberId,
    pub q1_1997: MemberId,
    pub q2_1997: MemberId,
    pub q3_1997: MemberId,
    pub q4_1997: MemberId,
    pub q1_1998: MemberId,
    pub q2_1998: MemberId,
    pub store: HierarchyId,
    pub country: LevelId,
    pub state: LevelId,
    pub usa: MemberId,
    pub canada: MemberId,
    pub ca: MemberId,
    pub or: MemberId,
    pub wa: MemberId,
    pub bc: MemberId,
    pub gender: HierarchyId,
    pub gender_level: LevelId,
    pub female: MemberId,
    pub male: MemberId,
    pub unit_sales: MeasureId,
    pub store_sales: MeasureId,
    pub sales_count: MeasureId,
    pub customer_count: MeasureId,
}

/// `Sales` cube over `sales_fact` with Time (joined `time_by_day`), Store (joined `store`) and
/// a degenerate Gender hierarchy, four measures and one yearly aggregate table.
pub fn food_mart() -> (Schema, FoodMartIds) {
    try_food_mart().expect("fixture schema is valid")
}

fn try_food_mart() -> crate::ModelResult<(Schema, FoodMartIds)> {
    let mut b = SchemaBuilder::new("FoodMart");
    let cube = b.add_cube("Sales", "sales_fact")?;

    let unit_sales = b.add_measure(cube, "Unit Sales", "unit_sales", Aggregator::Sum)?;
    let store_sales = b.add_measure(cube, "Store Sales", "store_sales", Aggregator::Sum)?;
    let sales_count = b.add_measure(cube, "Sales Count", "product_id", Aggregator::Count)?;
    let customer_count = b.add_measure(
        cube,
        "Customer Count",
        "customer_id",
        Aggregator::DistinctCount,
    )?;

    let time_dim = b.add_dimension(cube, "Time")?;
    let time = b.add_hierarchy(
        time_dim,
        HierarchyDef::joined("time_by_day", "time_id", "time_id").with_all_member_name("All Time"),
    )?;
    let year = b.add_level(time, "Year", "the_year", true)?;
    let quarter = b.add_level(time, "Quarter", "quarter", false)?;
    let y1997 = b.add_member(year, None, 1997, "1997")?;
    let y1998 = b.add_member(year, None, 1998, "1998")?;
    let q1_1997 = b.add_member(quarter, Some(y1997), "Q1", "Q1")?;
    let q2_1997 = b.add_member(quarter, Some(y1997), "Q2", "Q2")?;
    let q3_1997 = b.add_member(quarter, Some(y1997), "Q3", "Q3")?;
    let q4_1997 = b.add_member(quarter, Some(y1997), "Q4", "Q4")?;
    let q1_1998 = b.add_member(quarter, Some(y1998), "Q1", "Q1")?;
    let q2_1998 = b.add_member(quarter, Some(y1998), "Q2", "Q2")?;

    let store_dim = b.add_dimension(cube, "Store")?;
    let store = b.add_hierarchy(
        store_dim,
        HierarchyDef::joined("store", "store_id", "store_id"),
    )?;
    let country = b.add_level(store, "Country", "store_country", true)?;
    let state = b.add_level(store, "State", "store_state", true)?;
    let usa = b.add_member(country, None, "USA", "USA")?;
    let canada = b.add_member(country, None, "Canada", "Canada")?;
    b.set_ordinal(usa, 0)?;
    b.set_ordinal(canada, 1)?;
    let ca = b.add_member(state, Some(usa), "CA", "CA")?;
    let or = b.add_member(state, Some(usa), "OR", "OR")?;
    let wa = b.add_member(state, Some(usa), "WA", "WA")?;
    let bc = b.add_member(state, Some(canada), "BC", "BC")?;

    let gender_dim = b.add_dimension(cube, "Gender")?;
    let gender = b.add_hierarchy(gender_dim, HierarchyDef::degenerate())?;
    let gender_level = b.add_level(gender, "Gender", "gender", true)?;
    let female = b.add_member(gender_level, None, "F", "F")?;
    let male = b.add_member(gender_level, None, "M", "M")?;

    b.add_aggregate_table(
        cube,
        AggregateTable::new("agg_sales_by_year")
            .with_level(year, "the_year")
            .with_measure(unit_sales, "unit_sales")
            .with_measure(store_sales, "store_sales")
            .with_measure(sales_count, "fact_count")
            .with_fact_count("fact_count"),
    )?;

    let schema = b.build()?;
    Ok((
        schema,
        FoodMartIds {
            cube,
            time,
            year,
            quarter,
            y1997,
            y1998,
            q1_1997,
            q2_1997,
            q3_1997,
            q4_1997,
            q1_1998,
            q2_1998,
            store,
            country,
            state,
            usa,
            canada,
            ca,
            or,
            wa,
            bc,
            gender,
            gender_level,
            female,
            male,
            unit_sales,
            store_sales,
            sales_count,
            customer_count,
        },
    ))
}
