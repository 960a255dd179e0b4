//! Query plans and the expression contract
//!
//! A [`QueryPlan`] is supplied fully formed by the caller: a requested range,
//! a step, and an ordered list of named expressions. Expressions are opaque
//! to the pipeline beyond the [`Expression`] trait: given a window, the raw
//! data fetched for it, and the state they left behind on the previous
//! window, they return result series and their next state.

use crate::query::error::QueryResult;
use crate::query::window::Window;
use crate::types::{BaseQuery, RawData, TimeSeries};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Carried State
// ============================================================================

/// Accumulator value threaded from one window to the next for a single
/// expression
///
/// The concrete type is private to the expression that created it. The
/// evaluator only moves it around; it never inspects it.
#[derive(Default)]
pub struct CarriedState(Option<Box<dyn Any + Send>>);

impl CarriedState {
    /// The initial state every expression starts an execution with
    pub fn empty() -> Self {
        Self(None)
    }

    /// Wrap an expression-specific accumulator
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    /// Whether no state has been stored yet
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the accumulator as `T`
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    /// Take the accumulator out as `T`
    ///
    /// Returns `None` when the state is empty or holds another type.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.0.and_then(|b| b.downcast::<T>().ok()).map(|b| *b)
    }

    /// Take the accumulator as `T`, falling back to `T::default()`
    pub fn take_or_default<T: Any + Default>(self) -> T {
        self.into_inner().unwrap_or_default()
    }
}

impl fmt::Debug for CarriedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "CarriedState(empty)")
        } else {
            write!(f, "CarriedState(..)")
        }
    }
}

// ============================================================================
// Expression Contract
// ============================================================================

/// Output of one expression evaluation call
#[derive(Debug)]
pub struct Evaluation {
    /// Result series restricted to the evaluated window
    pub series: Vec<TimeSeries>,
    /// State to hand back on the next window
    pub state: CarriedState,
}

impl Evaluation {
    /// Evaluation result that carries `state` forward
    pub fn new(series: Vec<TimeSeries>, state: CarriedState) -> Self {
        Self { series, state }
    }

    /// Result of a stateless evaluation
    pub fn stateless(series: Vec<TimeSeries>) -> Self {
        Self::new(series, CarriedState::empty())
    }
}

/// A query expression evaluated window by window
///
/// Implementations must not block or suspend: `evaluate` is plain CPU work
/// that runs to completion once a window's data is available.
pub trait Expression: Send + Sync {
    /// Base queries this expression reads
    fn base_queries(&self) -> Vec<BaseQuery>;

    /// Evaluate one window
    ///
    /// `state` is whatever this expression returned for the previous window,
    /// or [`CarriedState::empty`] on the first window of an execution.
    fn evaluate(
        &self,
        window: &Window,
        data: &RawData,
        state: CarriedState,
    ) -> QueryResult<Evaluation>;
}

// ============================================================================
// Query Plan
// ============================================================================

/// A named expression inside a plan
#[derive(Clone)]
pub struct PlannedExpression {
    /// Name reported with every result series this expression produces
    pub name: String,
    /// The evaluator
    pub expression: Arc<dyn Expression>,
}

impl fmt::Debug for PlannedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedExpression")
            .field("name", &self.name)
            .field("base_queries", &self.expression.base_queries())
            .finish()
    }
}

/// Immutable description of one streaming execution
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Requested start (milliseconds)
    pub start: i64,
    /// Requested end (milliseconds)
    pub end: i64,
    /// Step resolution (milliseconds)
    pub step: i64,
    /// Expressions, in evaluation order
    pub expressions: Vec<PlannedExpression>,
}

impl QueryPlan {
    /// Create a plan with no expressions
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self {
            start,
            end,
            step,
            expressions: Vec::new(),
        }
    }

    /// Append a named expression
    pub fn with_expression(
        mut self,
        name: impl Into<String>,
        expression: impl Expression + 'static,
    ) -> Self {
        self.expressions.push(PlannedExpression {
            name: name.into(),
            expression: Arc::new(expression),
        });
        self
    }

    /// Append an already shared expression
    pub fn with_shared_expression(
        mut self,
        name: impl Into<String>,
        expression: Arc<dyn Expression>,
    ) -> Self {
        self.expressions.push(PlannedExpression {
            name: name.into(),
            expression,
        });
        self
    }

    /// Deduplicated, sorted base queries of every expression
    pub fn base_queries(&self) -> Vec<BaseQuery> {
        let mut queries: Vec<BaseQuery> = self
            .expressions
            .iter()
            .flat_map(|e| e.expression.base_queries())
            .collect();
        queries.sort();
        queries.dedup();
        queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(&'static str);

    impl Expression for Constant {
        fn base_queries(&self) -> Vec<BaseQuery> {
            vec![BaseQuery::from(self.0)]
        }

        fn evaluate(
            &self,
            _window: &Window,
            _data: &RawData,
            _state: CarriedState,
        ) -> QueryResult<Evaluation> {
            Ok(Evaluation::stateless(Vec::new()))
        }
    }

    #[test]
    fn test_carried_state_roundtrip() {
        let state = CarriedState::new(41u64);
        assert!(!state.is_empty());
        assert_eq!(state.get::<u64>(), Some(&41));
        assert_eq!(state.get::<i32>(), None);
        assert_eq!(state.into_inner::<u64>(), Some(41));
    }

    #[test]
    fn test_carried_state_empty_defaults() {
        let state = CarriedState::empty();
        assert!(state.is_empty());
        let value: Vec<f64> = state.take_or_default();
        assert!(value.is_empty());
    }

    #[test]
    fn test_plan_base_queries_deduplicated() {
        let plan = QueryPlan::new(0, 10, 1)
            .with_expression("a", Constant("mem"))
            .with_expression("b", Constant("cpu"))
            .with_expression("c", Constant("mem"));
        assert_eq!(
            plan.base_queries(),
            vec![BaseQuery::from("cpu"), BaseQuery::from("mem")]
        );
        assert_eq!(plan.expressions[2].name, "c");
    }
}
