//! Kuba Stream - windowed streaming evaluation of time-series queries
//!
//! Instead of computing one large answer, a query's time range is split
//! into consecutive windows that are fetched and evaluated one after the
//! other. Results are pushed to the client as server-sent events while a
//! heartbeat keeps the connection alive:
//! - Step-aligned window partitioning
//! - Backend fetches with one window of read-ahead and a per-fetch deadline
//! - Stateful expressions whose accumulators carry across windows
//! - A single terminating event stream with in-band error reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Backend fetch protocol and the in-memory backend
pub mod backend;

/// Streaming query pipeline: partition, fetch, evaluate, assemble
pub mod query;

// Re-export main types
pub use error::{Error, Result};
pub use types::{BaseQuery, RawData, TagSet, TimeSeries};
