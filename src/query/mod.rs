//! Streaming query evaluation
//!
//! Evaluates a time-series query over a bounded range window by window and
//! pushes results to the client as they become ready.
//!
//! # Architecture
//!
//! ```text
//!  QueryPlan
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Partition  │  [start, end] → step-aligned windows
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  one backend request per window, one window read-ahead
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Evaluate   │  expressions in window order, carried state, NaN filter
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Assemble   │  data + heartbeat, error → close, framing
//! └─────────────┘
//! ```
//!
//! Demand flows the other way: the transport pulls events, which pulls
//! batches, which pulls chunks.
//!
//! # Example
//!
//! ```rust
//! use kuba_stream::backend::MemoryBackend;
//! use kuba_stream::query::{execute, functions::RunningSum, QueryPlan, StreamOptions};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let backend = Arc::new(MemoryBackend::new());
//! let plan = QueryPlan::new(0, 600_000, 60_000)
//!     .with_expression("total", RunningSum::new("cpu.usage"));
//!
//! let events: Vec<_> = execute(&plan, backend, &StreamOptions::default())
//!     .unwrap()
//!     .collect()
//!     .await;
//! assert_eq!(events.last().unwrap().kind(), "close");
//! # }
//! ```

pub mod error;
pub mod evaluator;
pub mod fetch;
pub mod functions;
pub mod plan;
pub mod stream;
pub mod window;

// Re-export main types
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use evaluator::{
    is_all_nan, EvaluationPipeline, EvaluatorPhase, StatefulEvaluator, WindowBatch, WindowSeries,
};
pub use fetch::{Chunk, ChunkFetcher};
pub use plan::{CarriedState, Evaluation, Expression, PlannedExpression, QueryPlan};
pub use stream::{execute, framed, EventStream, StreamEvent, StreamOptions};
pub use window::{partition, round_down, Window};
