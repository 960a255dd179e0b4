//! Stateful evaluator
//!
//! Applies every expression of a plan to each chunk, strictly in window
//! order, threading each expression's [`CarriedState`] from one window to
//! the next. Result series that are NaN at every step of their window are
//! dropped before anything is emitted.
//!
//! # State Machine
//!
//! ```text
//!            demand              chunk arrives
//!   Idle ───────────► AwaitingChunk ───────────► Evaluating
//!    ▲                     │                        │
//!    │                     │ upstream exhausted     │ batch produced
//!    │                     ▼                        │
//!    │                   Done                       │
//!    └──────────────────────────────────────────────┘
//!
//!   any state ── upstream or evaluation failure ──► Failed
//! ```
//!
//! `Done` and `Failed` are terminal. `Evaluating` never suspends.

use crate::metrics;
use crate::query::error::{QueryError, QueryResult};
use crate::query::fetch::{Chunk, ChunkFetcher};
use crate::query::plan::{CarriedState, PlannedExpression};
use crate::query::window::{step_grid, Window};
use crate::types::{TagSet, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Output Types
// ============================================================================

/// One result series tagged with the expression and window it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSeries {
    /// Name of the originating expression
    pub expression: String,
    /// Window the values are restricted to
    pub window: Window,
    /// Series labels
    pub tags: TagSet,
    /// Values by timestamp
    pub values: BTreeMap<i64, f64>,
}

/// Everything one chunk produced, across all expressions
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBatch {
    /// Window evaluated
    pub window: Window,
    /// Surviving series, grouped by expression in plan order
    pub results: Vec<WindowSeries>,
}

impl WindowBatch {
    /// Whether every series was filtered out
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

// ============================================================================
// NaN Filter
// ============================================================================

/// Whether `series` is NaN (or missing) at every `step`-aligned timestamp in
/// `[start, end)`
///
/// # Panics
///
/// Panics if `start > end` or `step <= 0`; callers always pass a window
/// produced by the partitioner.
pub fn is_all_nan(series: &TimeSeries, start: i64, end: i64, step: i64) -> bool {
    assert!(
        start <= end,
        "NaN check called with start {} after end {}",
        start,
        end
    );
    assert!(step > 0, "NaN check called with non-positive step {}", step);

    step_grid(start, end, step).all(|ts| series.value_at(ts).map_or(true, f64::is_nan))
}

// ============================================================================
// Evaluator
// ============================================================================

/// Lifecycle of an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorPhase {
    /// Waiting for downstream demand
    Idle,
    /// A chunk has been requested
    AwaitingChunk,
    /// Running expressions over a chunk
    Evaluating,
    /// Upstream exhausted
    Done,
    /// Upstream or evaluation failure
    Failed,
}

impl EvaluatorPhase {
    /// Whether no further batches can be produced
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluatorPhase::Done | EvaluatorPhase::Failed)
    }
}

/// Owner of every expression's carried state for one execution
///
/// Only [`StatefulEvaluator::evaluate`] reads or writes the states, and it
/// accepts windows only in contiguous ascending order.
pub struct StatefulEvaluator {
    expressions: Vec<PlannedExpression>,
    states: Vec<CarriedState>,
    next_start: Option<i64>,
    phase: EvaluatorPhase,
    windows_evaluated: u64,
}

impl StatefulEvaluator {
    /// Create an evaluator with empty state for every expression
    pub fn new(expressions: Vec<PlannedExpression>) -> Self {
        let states = expressions.iter().map(|_| CarriedState::empty()).collect();
        Self {
            expressions,
            states,
            next_start: None,
            phase: EvaluatorPhase::Idle,
            windows_evaluated: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> EvaluatorPhase {
        self.phase
    }

    /// Number of windows evaluated so far
    pub fn windows_evaluated(&self) -> u64 {
        self.windows_evaluated
    }

    /// Note that a chunk has been requested
    pub fn await_chunk(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = EvaluatorPhase::AwaitingChunk;
        }
    }

    /// Note that upstream has no more chunks
    pub fn finish(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = EvaluatorPhase::Done;
        }
    }

    /// Note an upstream failure
    pub fn fail(&mut self) {
        self.phase = EvaluatorPhase::Failed;
    }

    /// Evaluate one chunk
    ///
    /// # Errors
    ///
    /// Fails if the evaluator is already terminal, if `chunk` does not start
    /// where the previous window ended, or if any expression fails. Every
    /// error moves the evaluator to `Failed`.
    pub fn evaluate(&mut self, chunk: Chunk) -> QueryResult<WindowBatch> {
        if self.phase.is_terminal() {
            return Err(QueryError::internal(format!(
                "evaluator is {:?}, cannot accept more windows",
                self.phase
            )));
        }

        let window = chunk.window;
        if let Some(expected) = self.next_start {
            if window.start != expected {
                self.phase = EvaluatorPhase::Failed;
                return Err(QueryError::internal(format!(
                    "window [{}, {}) out of order, expected start {}",
                    window.start, window.end, expected
                )));
            }
        }

        self.phase = EvaluatorPhase::Evaluating;
        match self.evaluate_window(&chunk) {
            Ok(batch) => {
                self.next_start = Some(window.end);
                self.windows_evaluated += 1;
                self.phase = EvaluatorPhase::Idle;
                Ok(batch)
            }
            Err(e) => {
                self.phase = EvaluatorPhase::Failed;
                Err(e)
            }
        }
    }

    fn evaluate_window(&mut self, chunk: &Chunk) -> QueryResult<WindowBatch> {
        let window = chunk.window;
        let mut results = Vec::new();
        let mut filtered = 0;

        for (planned, slot) in self.expressions.iter().zip(self.states.iter_mut()) {
            let state = std::mem::take(slot);
            let evaluation = planned
                .expression
                .evaluate(&window, &chunk.data, state)
                .map_err(|e| {
                    QueryError::new(
                        e.kind,
                        format!("expression '{}': {}", planned.name, e.message),
                    )
                })?;
            *slot = evaluation.state;

            for series in evaluation.series {
                if is_all_nan(&series, window.start, window.end, window.step) {
                    filtered += 1;
                    continue;
                }
                results.push(WindowSeries {
                    expression: planned.name.clone(),
                    window,
                    tags: series.tags,
                    values: series.values,
                });
            }
        }

        metrics::record_filtered(filtered);
        Ok(WindowBatch { window, results })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fetcher and evaluator wired together: one chunk in, one batch out
pub struct EvaluationPipeline {
    fetcher: ChunkFetcher,
    evaluator: StatefulEvaluator,
}

impl EvaluationPipeline {
    /// Drive `evaluator` from `fetcher`
    pub fn new(fetcher: ChunkFetcher, evaluator: StatefulEvaluator) -> Self {
        Self { fetcher, evaluator }
    }

    /// Current evaluator phase
    pub fn phase(&self) -> EvaluatorPhase {
        self.evaluator.phase()
    }

    /// Number of windows evaluated so far
    pub fn windows_evaluated(&self) -> u64 {
        self.evaluator.windows_evaluated()
    }

    /// Pull and evaluate the next window
    ///
    /// Returns `None` once the windows are exhausted or after an error has
    /// been returned. Cancel safe: the only suspension point is the fetch.
    pub async fn next_batch(&mut self) -> Option<QueryResult<WindowBatch>> {
        if self.evaluator.phase().is_terminal() {
            return None;
        }

        self.evaluator.await_chunk();
        match self.fetcher.next_chunk().await {
            None => {
                self.evaluator.finish();
                None
            }
            Some(Err(e)) => {
                self.evaluator.fail();
                Some(Err(e))
            }
            Some(Ok(chunk)) => {
                let result = self.evaluator.evaluate(chunk);
                if result.is_err() {
                    self.fetcher.cancel();
                }
                Some(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;
    use crate::query::functions::RunningSum;
    use crate::query::plan::{Evaluation, Expression, QueryPlan};
    use crate::types::{BaseQuery, RawData};

    fn window(start: i64, end: i64) -> Window {
        Window {
            start,
            end,
            step: 10,
        }
    }

    fn chunk(start: i64, end: i64, points: &[(i64, f64)]) -> Chunk {
        let mut data = RawData::new();
        data.insert(
            BaseQuery::from("cpu"),
            vec![TimeSeries::from_points(TagSet::new(), points.iter().copied())],
        );
        Chunk {
            window: window(start, end),
            data,
        }
    }

    struct Failing;

    impl Expression for Failing {
        fn base_queries(&self) -> Vec<BaseQuery> {
            Vec::new()
        }

        fn evaluate(
            &self,
            _window: &Window,
            _data: &RawData,
            _state: CarriedState,
        ) -> QueryResult<Evaluation> {
            Err(QueryError::evaluation("division by zero"))
        }
    }

    #[test]
    fn test_all_nan_detection() {
        let nan_series =
            TimeSeries::from_points(TagSet::new(), [(0, f64::NAN), (10, f64::NAN)]);
        assert!(is_all_nan(&nan_series, 0, 30, 10));

        let sparse = TimeSeries::from_points(TagSet::new(), [(20, 1.0)]);
        assert!(!is_all_nan(&sparse, 0, 30, 10));

        // Off-grid samples do not count
        let off_grid = TimeSeries::from_points(TagSet::new(), [(15, 1.0)]);
        assert!(is_all_nan(&off_grid, 0, 30, 10));

        // Samples at or after the end do not count
        let outside = TimeSeries::from_points(TagSet::new(), [(30, 1.0)]);
        assert!(is_all_nan(&outside, 0, 30, 10));
    }

    #[test]
    #[should_panic(expected = "after end")]
    fn test_all_nan_rejects_inverted_range() {
        is_all_nan(&TimeSeries::default(), 30, 0, 10);
    }

    #[test]
    fn test_state_threads_across_windows() {
        let plan = QueryPlan::new(0, 40, 10).with_expression("sum", RunningSum::new("cpu"));
        let mut evaluator = StatefulEvaluator::new(plan.expressions);

        let first = evaluator.evaluate(chunk(0, 20, &[(0, 1.0), (10, 2.0)])).unwrap();
        assert_eq!(first.results[0].values[&10], 3.0);
        assert_eq!(first.results[0].expression, "sum");

        let second = evaluator.evaluate(chunk(20, 40, &[(30, 4.0)])).unwrap();
        assert_eq!(second.results[0].values[&30], 7.0);
        assert_eq!(evaluator.windows_evaluated(), 2);
        assert_eq!(evaluator.phase(), EvaluatorPhase::Idle);
    }

    #[test]
    fn test_all_nan_window_is_filtered() {
        let plan = QueryPlan::new(0, 20, 10)
            .with_expression("raw", crate::query::functions::Raw::new("cpu"));
        let mut evaluator = StatefulEvaluator::new(plan.expressions);

        let batch = evaluator
            .evaluate(chunk(0, 20, &[(0, f64::NAN), (10, f64::NAN)]))
            .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_out_of_order_window_rejected() {
        let plan = QueryPlan::new(0, 40, 10).with_expression("sum", RunningSum::new("cpu"));
        let mut evaluator = StatefulEvaluator::new(plan.expressions);

        evaluator.evaluate(chunk(0, 20, &[(0, 1.0)])).unwrap();
        let err = evaluator.evaluate(chunk(40, 60, &[(40, 1.0)])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Internal);
        assert_eq!(evaluator.phase(), EvaluatorPhase::Failed);
        assert!(evaluator.evaluate(chunk(20, 40, &[])).is_err());
    }

    #[test]
    fn test_expression_failure_names_expression() {
        let plan = QueryPlan::new(0, 20, 10).with_expression("broken", Failing);
        let mut evaluator = StatefulEvaluator::new(plan.expressions);

        let err = evaluator.evaluate(chunk(0, 20, &[])).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::EvaluationError);
        assert!(err.message.contains("broken"));
        assert!(evaluator.phase().is_terminal());
    }

    #[test]
    fn test_terminal_phases_stick() {
        let mut evaluator = StatefulEvaluator::new(Vec::new());
        evaluator.finish();
        evaluator.await_chunk();
        assert_eq!(evaluator.phase(), EvaluatorPhase::Done);
        evaluator.fail();
        assert_eq!(evaluator.phase(), EvaluatorPhase::Failed);
    }
}
