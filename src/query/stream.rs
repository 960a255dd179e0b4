//! Stream assembler
//!
//! Builds the event stream for one execution: data batches from the
//! evaluation pipeline merged with a heartbeat, terminated by exactly one
//! `close` event. Any failure in the data path is turned into a single
//! `error` event followed by `close`, so the stream itself always completes
//! normally.
//!
//! # Event Order
//!
//! ```text
//!  info? data* info* data* ... [error] close
//! ```
//!
//! Heartbeats (`info`) interleave arbitrarily with data; data events keep
//! window order. Nothing follows `close`.
//!
//! # Framing
//!
//! Every event is sent as one transport chunk: [`FRAME_PREFIX`], the event's
//! JSON, then [`FRAME_SUFFIX`] (server-sent events).
//!
//! # Cancellation
//!
//! Dropping the stream drops the pipeline: the outstanding fetch is aborted
//! and the heartbeat timer stops.

use crate::backend::ChunkBackend;
use crate::metrics;
use crate::query::error::{QueryErrorKind, QueryResult};
use crate::query::evaluator::{EvaluationPipeline, StatefulEvaluator, WindowSeries};
use crate::query::fetch::{ChunkFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::query::plan::QueryPlan;
use crate::query::window::partition;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Literal written before every event
pub const FRAME_PREFIX: &str = "data: ";

/// Literal written after every event
pub const FRAME_SUFFIX: &str = "\n\n";

/// Default spacing between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of steps per window
pub const DEFAULT_CHUNK_MULTIPLIER: u32 = 60;

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Events
// ============================================================================

/// A single event sent to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Keep-alive or informational message
    Info {
        /// Message text
        message: String,
    },
    /// Result series for one window
    Data {
        /// Series that survived filtering
        results: Vec<WindowSeries>,
    },
    /// Terminal failure
    Error {
        /// Failure description
        message: String,
    },
    /// End of stream
    Close,
}

impl StreamEvent {
    /// Create an info event
    pub fn info(message: impl Into<String>) -> Self {
        StreamEvent::Info {
            message: message.into(),
        }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Event kind label
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Info { .. } => "info",
            StreamEvent::Data { .. } => "data",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Close => "close",
        }
    }

    /// Serialize and wrap in the transport frame
    pub fn frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            warn!(kind = self.kind(), error = %e, "Failed to serialize event");
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        let capacity = FRAME_PREFIX.len() + json.len() + FRAME_SUFFIX.len();
        let mut framed = String::with_capacity(capacity);
        framed.push_str(FRAME_PREFIX);
        framed.push_str(&json);
        framed.push_str(FRAME_SUFFIX);
        Bytes::from(framed)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Tunables for one execution
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Minimum spacing between heartbeats
    pub heartbeat_interval: Duration,
    /// Deadline for each backend fetch
    pub fetch_timeout: Duration,
    /// Steps per window
    pub chunk_multiplier: u32,
    /// Text of heartbeat events
    pub heartbeat_message: String,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            chunk_multiplier: DEFAULT_CHUNK_MULTIPLIER,
            heartbeat_message: "heartbeat".to_string(),
        }
    }
}

impl StreamOptions {
    /// Set heartbeat spacing
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set fetch deadline
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set steps per window
    pub fn with_chunk_multiplier(mut self, multiplier: u32) -> Self {
        self.chunk_multiplier = multiplier;
        self
    }
}

// ============================================================================
// Assembler
// ============================================================================

/// Boxed stream of events for one execution
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Closing,
    Finished,
}

/// Outcome label recorded when an execution ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
}

struct Assembler {
    id: u64,
    pipeline: EvaluationPipeline,
    heartbeat: Interval,
    heartbeat_message: String,
    phase: Phase,
    outcome: Outcome,
    started: Instant,
}

impl Assembler {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.advance().await?;
        metrics::record_event(event.kind());
        Some(event)
    }

    async fn advance(&mut self) -> Option<StreamEvent> {
        loop {
            match self.phase {
                Phase::Finished => return None,
                Phase::Closing => {
                    self.phase = Phase::Finished;
                    return Some(StreamEvent::Close);
                }
                Phase::Streaming => {}
            }

            tokio::select! {
                _ = self.heartbeat.tick() => {
                    return Some(StreamEvent::info(self.heartbeat_message.clone()));
                }
                next = self.pipeline.next_batch() => match next {
                    Some(Ok(batch)) => {
                        if batch.is_empty() {
                            continue;
                        }
                        return Some(StreamEvent::Data { results: batch.results });
                    }
                    Some(Err(e)) => {
                        warn!(
                            execution = self.id,
                            kind = %e.kind,
                            error = %e,
                            windows = self.pipeline.windows_evaluated(),
                            "Streaming execution failed"
                        );
                        self.outcome = Outcome::Failed;
                        self.phase = Phase::Closing;
                        return Some(StreamEvent::error(e.to_string()));
                    }
                    None => {
                        self.phase = Phase::Closing;
                    }
                },
            }
        }
    }
}

impl Drop for Assembler {
    fn drop(&mut self) {
        let outcome = match (self.phase, self.outcome) {
            (Phase::Finished, Outcome::Completed) => "completed",
            (Phase::Finished, Outcome::Failed) => "failed",
            _ => {
                debug!(
                    execution = self.id,
                    phase = ?self.pipeline.phase(),
                    windows = self.pipeline.windows_evaluated(),
                    "Client went away, execution cancelled"
                );
                metrics::execution_finished(QueryErrorKind::Cancelled.as_label());
                return;
            }
        };
        info!(
            execution = self.id,
            outcome,
            windows = self.pipeline.windows_evaluated(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Streaming execution finished"
        );
        metrics::execution_finished(outcome);
    }
}

/// Start a streaming execution of `plan` against `backend`
///
/// The range is partitioned before anything else happens, so an invalid
/// range is reported here as an error rather than as a streamed event. Once
/// this returns `Ok`, every failure is delivered inside the stream.
///
/// Must be called within a tokio runtime.
pub fn execute(
    plan: &QueryPlan,
    backend: Arc<dyn ChunkBackend>,
    options: &StreamOptions,
) -> QueryResult<EventStream> {
    let windows = partition(plan.step, plan.start, plan.end, options.chunk_multiplier)?;
    let id = NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed);

    info!(
        execution = id,
        backend = backend.backend_id(),
        start = plan.start,
        end = plan.end,
        step = plan.step,
        windows = windows.len(),
        expressions = plan.expressions.len(),
        "Starting streaming execution"
    );

    let fetcher = ChunkFetcher::new(backend, plan.base_queries(), windows, options.fetch_timeout);
    let evaluator = StatefulEvaluator::new(plan.expressions.clone());

    let mut heartbeat = tokio::time::interval(options.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    metrics::execution_started();
    let assembler = Assembler {
        id,
        pipeline: EvaluationPipeline::new(fetcher, evaluator),
        heartbeat,
        heartbeat_message: options.heartbeat_message.clone(),
        phase: Phase::Streaming,
        outcome: Outcome::Completed,
        started: Instant::now(),
    };

    let events = stream::unfold(assembler, |mut assembler| async move {
        let event = assembler.next_event().await?;
        Some((event, assembler))
    });
    Ok(Box::pin(events))
}

/// Frame every event for transport
pub fn framed(events: EventStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    events.map(|event| Ok(event.frame()))
}
