//! Request and Response Types for the Kuba Stream HTTP Server
//!
//! This module contains all serialization/deserialization types used by the HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Write API Types
// =============================================================================

/// Write request body
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    /// Base query the points belong to (e.g., "cpu.usage")
    pub query: String,
    /// Tags identifying the series within the query
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Data points to write
    pub points: Vec<WritePoint>,
}

/// Single point in write request
#[derive(Debug, Deserialize)]
pub struct WritePoint {
    /// Unix timestamp in milliseconds (defaults to the time of the write)
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Numeric value
    pub value: f64,
}

/// Write response
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub success: bool,
    pub points_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Streaming Query Types
// =============================================================================

/// Streaming query request body
///
/// ```json
/// {
///   "start": 0,
///   "end": 600000,
///   "step": 60000,
///   "expressions": [
///     {"name": "total", "function": "running_sum", "query": "cpu.usage"}
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct StreamQueryRequest {
    /// Start timestamp in milliseconds
    pub start: i64,
    /// End timestamp in milliseconds
    pub end: i64,
    /// Step resolution in milliseconds
    pub step: i64,
    /// Expressions to evaluate, in order
    pub expressions: Vec<ExpressionSpec>,
}

/// One named expression in a streaming request
#[derive(Debug, Deserialize)]
pub struct ExpressionSpec {
    /// Name attached to every result series
    pub name: String,
    /// Function name (raw, running_sum, delta)
    #[serde(default = "default_function")]
    pub function: String,
    /// Base query the function reads
    pub query: String,
}

fn default_function() -> String {
    "raw".to_string()
}

/// Error body for requests rejected before streaming starts
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Error kind label (e.g., "invalid_range")
    pub kind: &'static str,
    pub error: String,
}

// =============================================================================
// Health
// =============================================================================

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Number of series held by the backend
    pub series: usize,
}
