use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("Failed to read mapping file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse mapping: {error}")]
    ConfigParseError { error: String },
    #[error("Invalid mapping: {message}")]
    InvalidConfig { message: String },
    #[error("No entity mapping found for `{entity}`")]
    UnknownEntity { entity: String },
}
