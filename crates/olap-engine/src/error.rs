use olap_model::ModelError;
use olap_sql::SqlError;

pub type OlapResult<T> = Result<T, OlapError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OlapError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("backend error: {0}")]
    Backend(#[from] SqlError),

    #[error("unknown cube: {0}")]
    UnknownCube(String),

    #[error("unknown member: {0}")]
    UnknownMember(String),

    #[error("unknown hierarchy, level or dimension: {0}")]
    UnknownObject(String),

    #[error("no function matches signature '{signature}'")]
    UnresolvedFunction { signature: String },

    #[error("type mismatch in {context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("tuple contains more than one member of hierarchy {hierarchy}")]
    DuplicateHierarchyInTuple { hierarchy: String },

    #[error("hierarchy {hierarchy} is extracted more than once")]
    DuplicateExtractTarget { hierarchy: String },

    #[error("hierarchy {hierarchy} appears on more than one axis")]
    HierarchyOnMultipleAxes { hierarchy: String },

    #[error("expression has type {actual}, but {expected} was required")]
    ResultTypeMismatch { expected: String, actual: String },

    #[error("invalid calculated member {name}: {reason}")]
    InvalidCalculatedMember { name: String, reason: String },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("calculated member {member} recursed more than {depth} levels")]
    RecursionLimit { member: String, depth: usize },

    #[error("query cancelled")]
    QueryCancelled,

    #[error("query timed out after {millis} ms")]
    QueryTimeout { millis: u64 },

    #[error("cache computation failed: {message}")]
    CacheComputationFailed { message: String, retryable: bool },

    #[error("query did not converge after {passes} evaluation passes")]
    TooManyPasses { passes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OlapError {
    /// Whether the error aborts the whole query rather than a single cell.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OlapError::Evaluation(_) | OlapError::RecursionLimit { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OlapError::CacheComputationFailed {
                retryable: true,
                ..
            }
        )
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        OlapError::Evaluation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(OlapError::QueryCancelled.is_fatal());
        assert!(OlapError::Backend(SqlError::Connection("down".into())).is_fatal());
        assert!(!OlapError::eval("division").is_fatal());
        assert!(OlapError::CacheComputationFailed {
            message: "x".into(),
            retryable: true
        }
        .is_retryable());
    }
}
