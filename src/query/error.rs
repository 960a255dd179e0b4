//! Query error types
//!
//! Structured errors for every stage of a streaming execution: partitioning,
//! backend fetches, and expression evaluation.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create an invalid range error (`start > end`)
    pub fn invalid_range(start: i64, end: i64) -> Self {
        Self::new(
            QueryErrorKind::InvalidRange,
            format!("start {} is after end {}", start, end),
        )
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create a backend fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::FetchFailed, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create an expression evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::EvaluationError, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// True for errors raised before any stream exists
    pub fn is_request_error(&self) -> bool {
        matches!(
            self.kind,
            QueryErrorKind::InvalidRange | QueryErrorKind::ValidationError
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Requested range has start after end
    InvalidRange,
    /// Request could not be turned into a plan (bad step, unknown function)
    ValidationError,
    /// Backend reported a failure for a window
    FetchFailed,
    /// Backend did not answer within the fetch deadline
    Timeout,
    /// An expression failed while evaluating a window
    EvaluationError,
    /// Execution was cancelled
    Cancelled,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// Stable label used for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            QueryErrorKind::InvalidRange => "invalid_range",
            QueryErrorKind::ValidationError => "validation",
            QueryErrorKind::FetchFailed => "fetch_failed",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::EvaluationError => "evaluation",
            QueryErrorKind::Cancelled => "cancelled",
            QueryErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::InvalidRange => write!(f, "InvalidRange"),
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::FetchFailed => write!(f, "FetchFailed"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::EvaluationError => write!(f, "EvaluationError"),
            QueryErrorKind::Cancelled => write!(f, "Cancelled"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range_message() {
        let err = QueryError::invalid_range(2000, 1000);
        assert_eq!(err.kind, QueryErrorKind::InvalidRange);
        assert!(err.message.contains("2000"));
        assert!(err.is_request_error());
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::timeout("window [0, 60000) did not answer");
        let display = format!("{}", err);
        assert!(display.contains("Timeout"));
        assert!(display.contains("60000"));
        assert!(!err.is_request_error());
    }

    #[test]
    fn test_error_with_source() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = QueryError::fetch("backend unreachable").with_source(io_err);
        assert!(err.source().is_some());
        assert_eq!(err.kind.as_label(), "fetch_failed");
    }
}
