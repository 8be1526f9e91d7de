pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("duplicate cube: {0}")]
    DuplicateCube(String),

    #[error("duplicate dimension {name} in cube {cube}")]
    DuplicateDimension { cube: String, name: String },

    #[error("duplicate hierarchy: {0}")]
    DuplicateHierarchy(String),

    #[error("duplicate level: {0}")]
    DuplicateLevel(String),

    #[error("duplicate member: {0}")]
    DuplicateMember(String),

    #[error("duplicate measure {name} in cube {cube}")]
    DuplicateMeasure { cube: String, name: String },

    #[error("level {level} is an All level and cannot hold regular members")]
    AllLevelMember { level: String },

    #[error("member {member} at level {level} needs a parent at level {expected}")]
    MissingParent {
        member: String,
        level: String,
        expected: String,
    },

    #[error("member {member} has parent {parent} which is not on the level directly above {level}")]
    ParentLevelMismatch {
        member: String,
        parent: String,
        level: String,
    },

    #[error("member {member} has an ancestor chain longer than its hierarchy ({levels} levels)")]
    AncestorChainTooLong { member: String, levels: usize },

    #[error("hierarchy {0} has no levels")]
    EmptyHierarchy(String),

    #[error("hierarchy {hierarchy} maps a dimension table but has no foreign key on the fact table")]
    MissingForeignKey { hierarchy: String },

    #[error("invalid aggregate table {table}: {reason}")]
    InvalidAggregateTable { table: String, reason: String },

    #[error("unknown id {0}")]
    UnknownId(String),
}
