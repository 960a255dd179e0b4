//! Window partitioning
//!
//! Splits a requested `[start, end]` range into consecutive, step-aligned,
//! half-open evaluation windows of `multiplier * step` milliseconds. The last
//! window is clipped so it ends exactly at `round_down(end)`.
//!
//! ```text
//!  start                                        end
//!    │                                           │
//!  ──┼──────────┬──────────┬──────────┬──────────┼──
//!    │ window 0 │ window 1 │ window 2 │ win 3    │
//!  adjusted                                  round_down(end)
//! ```

use crate::query::error::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};

/// A half-open evaluation window `[start, end)`
///
/// `start` and `end` are always multiples of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    /// Inclusive start (milliseconds)
    pub start: i64,
    /// Exclusive end (milliseconds)
    pub end: i64,
    /// Step resolution (milliseconds)
    pub step: i64,
}

impl Window {
    /// Duration of the window in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `timestamp` falls inside `[start, end)`
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Step-aligned timestamps inside the window
    pub fn steps(&self) -> impl Iterator<Item = i64> {
        step_grid(self.start, self.end, self.step)
    }
}

/// Round `timestamp` down to the nearest multiple of `step`
///
/// Uses euclidean division so pre-epoch timestamps round towards negative
/// infinity. Returns `None` when the multiple lies below `i64::MIN`.
#[inline]
pub fn round_down(timestamp: i64, step: i64) -> Option<i64> {
    timestamp.checked_sub(timestamp.rem_euclid(step))
}

/// Step-aligned timestamps in `[start, end)`, starting from the first
/// multiple of `step` at or after `start`
pub fn step_grid(start: i64, end: i64, step: i64) -> impl Iterator<Item = i64> {
    let offset = start.rem_euclid(step);
    let mut next = if offset == 0 {
        Some(start)
    } else {
        start.checked_add(step - offset)
    };
    std::iter::from_fn(move || {
        let current = next.filter(|t| *t < end)?;
        next = current.checked_add(step);
        Some(current)
    })
}

/// Partition `[start, end]` into evaluation windows
///
/// # Arguments
///
/// * `step` - Step resolution in milliseconds (must be > 0)
/// * `start` - Requested start instant
/// * `end` - Requested end instant (must be >= `start`)
/// * `multiplier` - Number of steps per window (must be > 0)
///
/// # Errors
///
/// Returns `InvalidRange` when `start > end`, and `ValidationError` when
/// `step` or `multiplier` is not positive or the aligned range would fall
/// outside `i64`.
///
/// # Example
///
/// ```rust
/// use kuba_stream::query::window::partition;
///
/// // One-minute step, one-hour windows, ten minutes requested
/// let windows = partition(60_000, 0, 600_000, 60).unwrap();
/// assert_eq!(windows.len(), 1);
/// assert_eq!((windows[0].start, windows[0].end), (0, 600_000));
/// ```
pub fn partition(step: i64, start: i64, end: i64, multiplier: u32) -> QueryResult<Vec<Window>> {
    if start > end {
        return Err(QueryError::invalid_range(start, end));
    }
    if step <= 0 {
        return Err(QueryError::validation(format!(
            "step must be positive, got {}",
            step
        )));
    }
    if multiplier == 0 {
        return Err(QueryError::validation("chunk multiplier must be positive"));
    }

    let span = step
        .checked_mul(i64::from(multiplier))
        .ok_or_else(|| QueryError::validation("window span overflows"))?;

    let out_of_range = || {
        QueryError::validation(format!(
            "range [{}, {}] cannot be aligned to step {}",
            start, end, step
        ))
    };
    let rounded_start = round_down(start, step).ok_or_else(out_of_range)?;
    let rounded_end = round_down(end, step).ok_or_else(out_of_range)?;

    // Rounding collapsed the range: widen by one step so there is data to show
    let adjusted_start = if rounded_start == rounded_end {
        rounded_start.checked_sub(step).ok_or_else(out_of_range)?
    } else {
        rounded_start
    };

    let mut windows = Vec::new();
    let mut window_start = adjusted_start;
    while window_start < rounded_end {
        let window_end = window_start.saturating_add(span).min(rounded_end);
        windows.push(Window {
            start: window_start,
            end: window_end,
            step,
        });
        window_start = window_end;
    }

    Ok(windows)
}
