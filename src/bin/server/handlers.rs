//! HTTP Handlers for the Kuba Stream Server
//!
//! This module contains all HTTP endpoint handlers for the REST API.
//!
//! # Streaming Queries
//!
//! `POST /api/v1/query/stream` validates the request, builds a query plan and
//! answers with a `text/event-stream` body. Problems detected before the
//! first byte (bad range, unknown function) are returned as `400` JSON; any
//! later failure arrives as an `error` event inside the stream.

use super::config::ServerConfig;
use super::types::*;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use kuba_stream::backend::MemoryBackend;
use kuba_stream::metrics::gather_metrics;
use kuba_stream::query::functions::{build_expression, Function};
use kuba_stream::query::{execute, framed, QueryError, QueryPlan};
use kuba_stream::TagSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the backend and configuration
pub struct AppState {
    /// In-memory series store serving both writes and streaming fetches
    pub backend: Arc<MemoryBackend>,
    /// Server configuration
    pub config: ServerConfig,
}

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        series: state.backend.series_count(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(text) => (StatusCode::OK, [("content-type", "text/plain")], text),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e,
            )
        },
    }
}

// =============================================================================
// Write Handlers
// =============================================================================

/// Write data points
pub async fn write_points(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteRequest>,
) -> impl IntoResponse {
    if req.points.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(WriteResponse {
                success: false,
                points_written: 0,
                error: Some("No points provided".to_string()),
            }),
        );
    }
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(WriteResponse {
                success: false,
                points_written: 0,
                error: Some("Query name cannot be empty".to_string()),
            }),
        );
    }

    let now = Utc::now().timestamp_millis();
    let tags = TagSet::from_map(req.tags);
    let written = state.backend.write(
        req.query.as_str(),
        tags,
        req.points.iter().map(|p| (p.timestamp.unwrap_or(now), p.value)),
    );
    debug!(query = %req.query, points = written, "Points written");

    (
        StatusCode::OK,
        Json(WriteResponse {
            success: true,
            points_written: written,
            error: None,
        }),
    )
}

// =============================================================================
// Streaming Query Handler
// =============================================================================

/// Build a query plan from a request body
fn build_plan(req: &StreamQueryRequest) -> Result<QueryPlan, QueryError> {
    if req.expressions.is_empty() {
        return Err(QueryError::validation("at least one expression is required"));
    }

    let mut plan = QueryPlan::new(req.start, req.end, req.step);
    for spec in &req.expressions {
        let function: Function = spec.function.parse()?;
        if spec.query.trim().is_empty() {
            return Err(QueryError::validation(format!(
                "expression '{}' has an empty query",
                spec.name
            )));
        }
        plan = plan.with_shared_expression(
            spec.name.clone(),
            build_expression(function, spec.query.as_str()),
        );
    }
    Ok(plan)
}

fn error_response(err: &QueryError) -> Response {
    let status = if err.is_request_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            kind: err.kind.as_label(),
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Start a streaming execution and return its framed events
pub async fn stream_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamQueryRequest>,
) -> Response {
    let plan = match build_plan(&req) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "Rejected streaming query");
            return error_response(&e);
        },
    };

    let events = match execute(&plan, state.backend.clone(), &state.config.stream_options) {
        Ok(events) => events,
        Err(e) => {
            warn!(
                error = %e,
                start = req.start,
                end = req.end,
                step = req.step,
                "Rejected streaming query"
            );
            return error_response(&e);
        },
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(framed(events)));

    match response {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to build streaming response");
            error_response(&QueryError::internal(e.to_string()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(function: &str) -> ExpressionSpec {
        ExpressionSpec {
            name: "e".to_string(),
            function: function.to_string(),
            query: "cpu".to_string(),
        }
    }

    #[test]
    fn test_build_plan_rejects_unknown_function() {
        let req = StreamQueryRequest {
            start: 0,
            end: 60_000,
            step: 1_000,
            expressions: vec![spec("median")],
        };
        let err = build_plan(&req).unwrap_err();
        assert!(err.is_request_error());
    }

    #[test]
    fn test_build_plan_collects_queries() {
        let req = StreamQueryRequest {
            start: 0,
            end: 60_000,
            step: 1_000,
            expressions: vec![spec("raw"), spec("delta")],
        };
        let plan = build_plan(&req).unwrap();
        assert_eq!(plan.expressions.len(), 2);
        assert_eq!(plan.base_queries().len(), 1);
    }
}
