//! Error types for the crate

use crate::query::error::QueryError;
use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Query pipeline error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_converts_to_configuration() {
        let err: Error = ValidationError::OutOfRange {
            field: "chunk_multiplier".to_string(),
            value: "0".to_string(),
            min: "1".to_string(),
            max: "10000".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("chunk_multiplier"));
    }

    #[test]
    fn test_query_error_wraps() {
        let err: Error = QueryError::invalid_range(10, 5).into();
        assert!(err.to_string().starts_with("Query error"));
    }
}
