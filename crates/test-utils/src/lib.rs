//! Shared test utilities for the admin raster statistics workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic raster generators with known statistics
//! - Rectangle and triangle zone builders
//! - On-disk data roots for collaborator tests
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{assert_approx_eq, block_grid_4x4, rect_zone};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that a statistic set honours the record contract.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_stats_ordered;
///
/// assert_stats_ordered!(stats);
/// ```
#[macro_export]
macro_rules! assert_stats_ordered {
    ($stats:expr) => {{
        let s = &$stats;
        assert!(s.min <= s.max, "min {} > max {}", s.min, s.max);
        assert!(
            s.min <= s.mean && s.mean <= s.max,
            "mean {} outside [{}, {}]",
            s.mean,
            s.min,
            s.max
        );
        assert!(
            s.min <= s.median && s.median <= s.max,
            "median {} outside [{}, {}]",
            s.median,
            s.min,
            s.max
        );
        assert!(s.std >= 0.0, "negative std {}", s.std);
    }};
}

#[cfg(test)]
mod tests {
    use zonal_common::ZonalStats;

    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    #[should_panic(expected = "mean")]
    fn test_assert_stats_ordered_catches_mean() {
        let stats = ZonalStats {
            min: 0.0,
            max: 1.0,
            mean: 2.0,
            median: 0.5,
            std: 0.1,
            sum: 2.0,
            count: 1,
        };
        assert_stats_ordered!(stats);
    }
}
