//! Built-in expressions
//!
//! - `raw` - stateless, passes the base query's series through
//! - `running_sum` - cumulative sum per series, carried across windows
//! - `delta` - difference between consecutive samples per series, carrying
//!   the last sample of the previous window
//!
//! NaN samples are treated as gaps by the stateful functions: they neither
//! contribute to nor reset the carried accumulator.
//!
//! # Example
//!
//! ```rust
//! use kuba_stream::query::functions::{build_expression, Function};
//! use kuba_stream::query::Expression;
//!
//! let function: Function = "running_sum".parse().unwrap();
//! let expression = build_expression(function, "cpu.usage");
//! assert_eq!(expression.base_queries()[0].as_str(), "cpu.usage");
//! ```

use crate::query::error::{QueryError, QueryResult};
use crate::query::plan::{CarriedState, Evaluation, Expression};
use crate::query::window::Window;
use crate::types::{BaseQuery, RawData, TagSet, TimeSeries};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Names of the built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Pass raw series through
    Raw,
    /// Cumulative sum across windows
    RunningSum,
    /// Sample-to-sample difference across windows
    Delta,
}

impl FromStr for Function {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Function::Raw),
            "running_sum" | "cumsum" => Ok(Function::RunningSum),
            "delta" => Ok(Function::Delta),
            other => Err(QueryError::validation(format!(
                "unknown function '{}'",
                other
            ))),
        }
    }
}

/// Build the expression for `function` reading `query`
pub fn build_expression(function: Function, query: impl Into<BaseQuery>) -> Arc<dyn Expression> {
    let query = query.into();
    match function {
        Function::Raw => Arc::new(Raw::new(query)),
        Function::RunningSum => Arc::new(RunningSum::new(query)),
        Function::Delta => Arc::new(Delta::new(query)),
    }
}

/// Series for `query` in `data`, empty if the backend returned none
fn series_for<'a>(data: &'a RawData, query: &BaseQuery) -> &'a [TimeSeries] {
    data.get(query).map(Vec::as_slice).unwrap_or(&[])
}

// ============================================================================
// raw
// ============================================================================

/// Stateless pass-through of a base query
#[derive(Debug, Clone)]
pub struct Raw {
    query: BaseQuery,
}

impl Raw {
    /// Create a pass-through for `query`
    pub fn new(query: impl Into<BaseQuery>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl Expression for Raw {
    fn base_queries(&self) -> Vec<BaseQuery> {
        vec![self.query.clone()]
    }

    fn evaluate(
        &self,
        window: &Window,
        data: &RawData,
        _state: CarriedState,
    ) -> QueryResult<Evaluation> {
        let series = series_for(data, &self.query)
            .iter()
            .map(|s| s.restrict(window.start, window.end))
            .collect();
        Ok(Evaluation::stateless(series))
    }
}

// ============================================================================
// running_sum
// ============================================================================

/// Cumulative sum per series
///
/// Emits the running total at every non-NaN sample.
#[derive(Debug, Clone)]
pub struct RunningSum {
    query: BaseQuery,
}

impl RunningSum {
    /// Create a running sum over `query`
    pub fn new(query: impl Into<BaseQuery>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl Expression for RunningSum {
    fn base_queries(&self) -> Vec<BaseQuery> {
        vec![self.query.clone()]
    }

    fn evaluate(
        &self,
        window: &Window,
        data: &RawData,
        state: CarriedState,
    ) -> QueryResult<Evaluation> {
        let mut totals: HashMap<TagSet, f64> = state.take_or_default();
        let mut output = Vec::new();

        for series in series_for(data, &self.query) {
            let total = totals.entry(series.tags.clone()).or_insert(0.0);
            let mut result = TimeSeries::new(series.tags.clone());
            for (ts, value) in series.values.range(window.start..window.end) {
                if value.is_nan() {
                    continue;
                }
                *total += value;
                result.insert(*ts, *total);
            }
            output.push(result);
        }

        Ok(Evaluation::new(output, CarriedState::new(totals)))
    }
}

// ============================================================================
// delta
// ============================================================================

/// Difference between consecutive samples per series
#[derive(Debug, Clone)]
pub struct Delta {
    query: BaseQuery,
}

impl Delta {
    /// Create a delta over `query`
    pub fn new(query: impl Into<BaseQuery>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl Expression for Delta {
    fn base_queries(&self) -> Vec<BaseQuery> {
        vec![self.query.clone()]
    }

    fn evaluate(
        &self,
        window: &Window,
        data: &RawData,
        state: CarriedState,
    ) -> QueryResult<Evaluation> {
        let mut last_seen: HashMap<TagSet, f64> = state.take_or_default();
        let mut output = Vec::new();

        for series in series_for(data, &self.query) {
            let mut result = TimeSeries::new(series.tags.clone());
            for (ts, value) in series.values.range(window.start..window.end) {
                if value.is_nan() {
                    continue;
                }
                if let Some(previous) = last_seen.insert(series.tags.clone(), *value) {
                    result.insert(*ts, value - previous);
                }
            }
            output.push(result);
        }

        Ok(Evaluation::new(output, CarriedState::new(last_seen)))
    }
}
