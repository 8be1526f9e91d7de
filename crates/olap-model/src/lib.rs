#![forbid(unsafe_code)]

//! Dimensional schema model: catalogs of cubes, dimensions, hierarchies, levels and members,
//! plus the star-schema mapping (fact table, dimension tables, aggregate tables) the SQL
//! generator needs.
//!
//! The model is read-only once built. Loaders describe a catalog through [`SchemaBuilder`];
//! the engine consumes the resulting [`Schema`] behind an `Arc`.

mod builder;
mod error;
mod schema;
mod star;
mod value;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::builder::{HierarchyDef, SchemaBuilder};
pub use crate::error::{ModelError, ModelResult};
pub use crate::schema::{
    Cube, CubeId, Dimension, DimensionId, Hierarchy, HierarchyId, Level, LevelId, Measure,
    MeasureId, Member, MemberId, MemberKind, Schema,
};
pub use crate::star::{AggregateTable, Aggregator};
pub use crate::value::{cmp_values, Value, ValueTypeError};
