pub type SqlResult<T> = Result<T, SqlError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("statement failed: {message}\n  sql: {sql}")]
    Execution { sql: String, message: String },

    #[error("malformed result from backend: {0}")]
    MalformedResult(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("unsupported query shape: {0}")]
    Unsupported(String),
}
