use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SqlGenerationError {
    #[error("Expression cannot be rendered as SQL: {0}")]
    Unsupported(String),

    #[error("No SQL function for {op} with {arity} argument(s)")]
    NoFunction { op: String, arity: usize },

    #[error("Literal of type {0} cannot be rendered")]
    UnsupportedLiteral(String),

    #[error("No SQL type for {0}")]
    NoSqlType(String),

    #[error("Unknown dialect `{0}` (expected generic, postgres or oracle)")]
    UnknownDialect(String),
}

pub type SqlResult<T> = Result<T, SqlGenerationError>;
