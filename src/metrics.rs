//! Metrics and telemetry for streaming executions
//!
//! Prometheus metrics covering execution outcomes, backend fetches, and the
//! events written to clients.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

lazy_static! {
    // === Executions ===

    /// Executions by terminal outcome
    pub static ref EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "stream_executions_total",
        "Streaming executions by outcome",
        &["outcome"]
    ).unwrap();

    /// Executions currently streaming
    pub static ref ACTIVE_EXECUTIONS: Gauge = register_gauge!(
        "stream_active_executions",
        "Number of executions currently streaming"
    ).unwrap();

    // === Backend Fetches ===

    /// Windows fetched successfully
    pub static ref WINDOWS_FETCHED: Counter = register_counter!(
        "stream_windows_fetched_total",
        "Windows fetched from the backend"
    ).unwrap();

    /// Failed fetches by reason
    pub static ref FETCH_FAILURES: CounterVec = register_counter_vec!(
        "stream_fetch_failures_total",
        "Backend fetch failures by reason",
        &["reason"]
    ).unwrap();

    /// Fetch latency
    pub static ref FETCH_DURATION: Histogram = register_histogram!(
        "stream_fetch_duration_seconds",
        "Backend fetch latency in seconds",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Events ===

    /// Events written by kind
    pub static ref EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "stream_events_total",
        "Events written to clients by kind",
        &["kind"]
    ).unwrap();

    /// Result series dropped because they held no values
    pub static ref SERIES_FILTERED: Counter = register_counter!(
        "stream_series_filtered_total",
        "Result series dropped because every step was NaN"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a completed fetch
#[inline]
pub fn record_fetch(duration_secs: f64) {
    WINDOWS_FETCHED.inc();
    FETCH_DURATION.observe(duration_secs);
}

/// Record a failed fetch
#[inline]
pub fn record_fetch_failure(reason: &str) {
    FETCH_FAILURES.with_label_values(&[reason]).inc();
}

/// Record an event written to a client
#[inline]
pub fn record_event(kind: &str) {
    EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record series dropped by the all-NaN filter
#[inline]
pub fn record_filtered(count: usize) {
    if count > 0 {
        SERIES_FILTERED.inc_by(count as f64);
    }
}

/// Record an execution starting
#[inline]
pub fn execution_started() {
    ACTIVE_EXECUTIONS.inc();
}

/// Record an execution finishing with `outcome`
#[inline]
pub fn execution_finished(outcome: &str) {
    ACTIVE_EXECUTIONS.dec();
    EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fetch() {
        record_fetch(0.002);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("stream_windows_fetched_total"));
        assert!(metrics.contains("stream_fetch_duration_seconds"));
    }

    #[test]
    fn test_record_event_labels() {
        record_event("close");
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("stream_events_total{kind=\"close\"}"));
    }
}
