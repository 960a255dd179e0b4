//! Property Tests for the Window Partitioner
//!
//! Uses property-based testing (proptest) to check that partitioning
//! always covers the rounded range exactly, in order, without overlap.

use kuba_stream::query::window::{partition, round_down, step_grid};
use kuba_stream::query::QueryErrorKind;
use proptest::prelude::*;

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Step resolutions seen in practice plus arbitrary small ones
fn step() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(1_000i64),
        Just(15_000),
        Just(60_000),
        Just(3_600_000),
        1i64..10_000,
    ]
}

/// Ordered `(start, end)` pair, including pre-epoch instants
fn range() -> impl Strategy<Value = (i64, i64)> {
    (-1_000_000_000i64..1_000_000_000, 0i64..500_000_000)
        .prop_map(|(start, length)| (start, start + length))
}

proptest! {
    /// Windows are ascending, contiguous and cover [adjusted start, round_down(end))
    #[test]
    fn windows_cover_rounded_range_exactly(
        step in step(),
        (start, end) in range(),
        multiplier in 1u32..200,
    ) {
        let windows = partition(step, start, end, multiplier).unwrap();
        prop_assert!(!windows.is_empty());

        let rounded_start = round_down(start, step).unwrap();
        let rounded_end = round_down(end, step).unwrap();
        let adjusted_start = if rounded_start == rounded_end {
            rounded_start - step
        } else {
            rounded_start
        };

        prop_assert_eq!(windows[0].start, adjusted_start);
        prop_assert_eq!(windows[windows.len() - 1].end, rounded_end);

        for pair in windows.windows(2) {
            // disjoint and ascending, with nothing skipped in between
            prop_assert_eq!(pair[0].end, pair[1].start);
        }

        let span = step * multiplier as i64;
        for window in &windows {
            prop_assert!(window.start < window.end);
            prop_assert!(window.end - window.start <= span);
            prop_assert_eq!(window.start.rem_euclid(step), 0);
            prop_assert_eq!(window.end.rem_euclid(step), 0);
            prop_assert_eq!(window.step, step);
        }

        // only the last window may be short
        for window in &windows[..windows.len() - 1] {
            prop_assert_eq!(window.end - window.start, span);
        }
    }

    /// Rounding a range inside one step widens it to the previous step
    #[test]
    fn degenerate_range_widens_by_one_step(
        step in step(),
        base in -1_000_000i64..1_000_000,
        offsets in (0i64..10_000, 0i64..10_000),
    ) {
        let origin = base * step;
        let (a, b) = (offsets.0 % step, offsets.1 % step);
        let (start, end) = (origin + a.min(b), origin + a.max(b));

        let windows = partition(step, start, end, 60).unwrap();
        prop_assert_eq!(windows.len(), 1);
        prop_assert_eq!(windows[0].start, origin - step);
        prop_assert_eq!(windows[0].end, origin);
    }

    /// The step grid of every window is the window's own share of the range
    #[test]
    fn step_grids_partition_the_range(
        step in 1i64..5_000,
        start in -1_000_000_000i64..1_000_000_000,
        (steps, jitter) in (0i64..2_000, 0i64..5_000),
        multiplier in 1u32..50,
    ) {
        let end = start + steps * step + jitter;
        let windows = partition(step, start, end, multiplier).unwrap();

        let joined: Vec<i64> = windows
            .iter()
            .flat_map(|w| step_grid(w.start, w.end, w.step))
            .collect();
        let whole: Vec<i64> =
            step_grid(windows[0].start, windows[windows.len() - 1].end, step).collect();
        prop_assert_eq!(joined, whole);
    }

    /// start > end is always rejected as an invalid range
    #[test]
    fn reversed_range_is_rejected(
        step in step(),
        (start, end) in range(),
    ) {
        prop_assume!(start != end);
        let err = partition(step, end, start, 60).unwrap_err();
        prop_assert_eq!(err.kind, QueryErrorKind::InvalidRange);
    }
}

#[test]
fn ten_minutes_at_one_minute_step_is_one_window() {
    let windows = partition(60_000, 0, 600_000, 60).unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!((windows[0].start, windows[0].end), (0, 600_000));
}

#[test]
fn non_positive_step_is_a_validation_error() {
    for step in [0, -60_000] {
        let err = partition(step, 0, 600_000, 60).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ValidationError);
    }
}
