//! Cell storage: requests, segments, the shared segment cache and the SQL that fills it.
mod cache;
mod manager;
mod reader;
mod request;
mod segment;
mod selector;
mod sql_gen;

pub use cache::{EvictionPolicy, SegmentCache};
pub use manager::AggregationManager;
pub use reader::{BatchingCellReader, CellLookup, CellReader, DirectCellReader, NoCells};
pub use request::{CellRequest, Levels};
pub use segment::{Segment, SegmentAxis, SegmentKey};
pub use selector::{choose_source, Source};
pub use sql_gen::segment_query;
