#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Multidimensional query core: compiles query expression trees into executable plans,
//! evaluates them against a movable coordinate, and resolves stored cells through an
//! aggregation manager that batches requests into SQL and caches the resulting segments.
//!
//! ## Lifecycle
//!
//! A [`Session`] wraps one [`olap_sql::ConnectionProvider`]: it asks the backend once for
//! its [`olap_sql::Dialect`] and owns the [`aggregation::AggregationManager`] whose segment
//! cache is shared by every query of the session. [`Session::compile`] turns a [`Query`] into
//! an immutable [`CompiledQuery`]; [`Session::execute`] evaluates it under an
//! [`ExecutionHandle`] that can cancel it or bound its running time.
//!
//! ## Evaluation passes
//!
//! Cells missing from the cache evaluate as empty while their requests are recorded. At the
//! end of a pass the misses are loaded as one batch, one SQL statement per segment, and the
//! pass is repeated. A query that still misses cells after
//! [`EngineConfig::max_eval_passes`] fails with [`OlapError::TooManyPasses`].

pub mod aggregation;
pub mod ast;
pub mod calc;
pub mod cancel;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod function;
pub mod members;
mod parallel;
pub mod query;
pub mod session;
pub mod types;

pub use crate::ast::{Exp, Syntax};
pub use crate::cancel::ExecutionHandle;
pub use crate::compiler::Compiler;
pub use crate::config::EngineConfig;
pub use crate::error::{OlapError, OlapResult};
pub use crate::evaluator::Evaluator;
pub use crate::query::{
    Axis, AxisSpec, CalculatedMemberDef, Cell, CellSet, CompiledQuery, Position, Query,
};
pub use crate::session::Session;
pub use crate::types::{Category, Type};
