use serde::{Deserialize, Serialize};

use crate::error::{OlapError, OlapResult};

/// Engine settings, usually supplied by the host as JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Abort the query on the first cell error instead of reporting it in the cell.
    pub fail_fast: bool,
    /// Resolve unknown member names to the hierarchy's null member instead of failing.
    pub ignore_invalid_members: bool,
    pub max_eval_passes: usize,
    pub max_calc_depth: usize,
    /// How long a cache waiter sleeps between cancellation checks.
    pub cache_wait_slice_ms: u64,
    /// `None` keeps every segment.
    pub max_cached_segments: Option<usize>,
    pub use_aggregate_tables: bool,
    /// Collect cell requests per pass and load them in batches; when false every miss is
    /// loaded as soon as it is seen.
    pub batch_cell_requests: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            ignore_invalid_members: false,
            max_eval_passes: 10,
            max_calc_depth: 64,
            cache_wait_slice_ms: 20,
            max_cached_segments: None,
            use_aggregate_tables: true,
            batch_cell_requests: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> OlapResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| OlapError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OlapResult<()> {
        if self.max_eval_passes == 0 {
            return Err(OlapError::InvalidConfig(
                "max_eval_passes must be at least 1".into(),
            ));
        }
        if self.max_calc_depth == 0 {
            return Err(OlapError::InvalidConfig(
                "max_calc_depth must be at least 1".into(),
            ));
        }
        if self.cache_wait_slice_ms == 0 {
            return Err(OlapError::InvalidConfig(
                "cache_wait_slice_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"fail_fast": true, "max_cached_segments": 8}"#)
            .unwrap();
        assert_eq!(
            config,
            EngineConfig {
                fail_fast: true,
                max_cached_segments: Some(8),
                ..EngineConfig::default()
            }
        );
    }

    #[test]
    fn rejects_zero_passes() {
        let err = EngineConfig::from_json(r#"{"max_eval_passes": 0}"#).unwrap_err();
        assert!(matches!(err, OlapError::InvalidConfig(_)));
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
