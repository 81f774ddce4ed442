use thiserror::Error;

use crate::materializer::errors::EvalError;
use crate::sql_generator::errors::SqlGenerationError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BuildError {
    #[error("Unsupported operation {owner}.{name}")]
    UnsupportedOperation { owner: String, name: String },

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Unsupported member {owner}.{member}")]
    UnsupportedMember { owner: String, member: String },

    #[error("Column must be mapped: {entity}.{member}")]
    ColumnNotMapped { entity: String, member: String },

    #[error("No table mapped for entity `{0}`")]
    TableNotMapped(String),

    #[error("Malformed {operation}: {message}")]
    MalformedInput { operation: String, message: String },

    #[error("Missing bound parameter `{0}`")]
    MissingBoundParameter(String),

    #[error("No common scope found while promoting table `{0}`")]
    NoCommonScope(String),

    #[error("Reference to {0} cannot be materialized")]
    DanglingReference(String),

    #[error(transparent)]
    SqlGeneration(#[from] SqlGenerationError),

    #[error(transparent)]
    Evaluation(#[from] EvalError),
}

impl BuildError {
    pub fn malformed(operation: &str, message: impl Into<String>) -> Self {
        BuildError::MalformedInput {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(owner: impl std::fmt::Debug, name: &str) -> Self {
        BuildError::UnsupportedOperation {
            owner: format!("{:?}", owner),
            name: name.to_string(),
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
