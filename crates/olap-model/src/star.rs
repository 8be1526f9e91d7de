//! Star-schema mapping shared by the model and the SQL generator.
use crate::schema::{LevelId, MeasureId};
use serde::{Deserialize, Serialize};

/// How a stored measure is aggregated over fact rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    DistinctCount,
}

impl Aggregator {
    pub fn name(self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Count => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Avg => "avg",
            Aggregator::DistinctCount => "distinct-count",
        }
    }

    /// Aggregator used to combine already-aggregated values of this aggregator, if the
    /// aggregation is decomposable. Counts roll up by summing; averages and distinct counts
    /// cannot be rebuilt from partial results.
    pub fn rollup(self) -> Option<Aggregator> {
        match self {
            Aggregator::Sum | Aggregator::Count => Some(Aggregator::Sum),
            Aggregator::Min => Some(Aggregator::Min),
            Aggregator::Max => Some(Aggregator::Max),
            Aggregator::Avg | Aggregator::DistinctCount => None,
        }
    }

    pub fn is_distinct(self) -> bool {
        matches!(self, Aggregator::DistinctCount)
    }
}

/// A pre-aggregated table that can answer segments grouped by a subset of its levels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateTable {
    pub name: String,
    /// Level key columns stored in the table.
    pub levels: Vec<(LevelId, String)>,
    /// Measure columns stored in the table (already aggregated).
    pub measures: Vec<(MeasureId, String)>,
    pub fact_count_column: Option<String>,
}

impl AggregateTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: Vec::new(),
            measures: Vec::new(),
            fact_count_column: None,
        }
    }

    pub fn with_level(mut self, level: LevelId, column: impl Into<String>) -> Self {
        self.levels.push((level, column.into()));
        self
    }

    pub fn with_measure(mut self, measure: MeasureId, column: impl Into<String>) -> Self {
        self.measures.push((measure, column.into()));
        self
    }

    pub fn with_fact_count(mut self, column: impl Into<String>) -> Self {
        self.fact_count_column = Some(column.into());
        self
    }

    pub fn level_column(&self, level: LevelId) -> Option<&str> {
        self.levels
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, c)| c.as_str())
    }

    pub fn measure_column(&self, measure: MeasureId) -> Option<&str> {
        self.measures
            .iter()
            .find(|(m, _)| *m == measure)
            .map(|(_, c)| c.as_str())
    }
}
