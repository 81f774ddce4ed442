use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("Expression cannot be evaluated on the host: {0}")]
    NotHostEvaluable(String),

    #[error("Type mismatch in {operation}: {found}")]
    TypeMismatch { operation: String, found: String },

    #[error("Record `{record}` has no member `{member}`")]
    MissingMember { record: String, member: String },

    #[error("No row reader for type {0}")]
    NoRowReader(String),

    #[error("Failed to read column {index}: {message}")]
    RowRead { index: usize, message: String },

    #[error("Column {index} is NULL but {ty} is not nullable")]
    UnexpectedNull { index: usize, ty: String },

    #[error("No current row")]
    NoCurrentRow,

    #[error("Division by zero")]
    DivideByZero,

    #[error("Cannot parse `{value}` as {ty}")]
    Parse { value: String, ty: String },
}

impl EvalError {
    pub fn mismatch(operation: &str, found: impl std::fmt::Debug) -> Self {
        EvalError::TypeMismatch {
            operation: operation.to_string(),
            found: format!("{:?}", found),
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
