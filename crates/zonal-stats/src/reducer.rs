//! Weighted reduction of covered pixels to the statistic set.
//!
//! - `mean`: coverage-weighted mean, accumulated as `min + Σw(v - min) / Σw`
//!   so constant fields reduce to exactly that constant.
//! - `std`: two-pass coverage-weighted population standard deviation.
//! - `median`: weighted median over values ordered by (value, pixel index).
//!   When the cumulative weight lands exactly on half the total, the midpoint
//!   of the two straddling values is used; with equal weights this is the
//!   ordinary median.
//! - `min`/`max`: unweighted extrema of contributing pixels.
//! - `sum`: coverage-weighted sum.
//!
//! All accumulation happens in pixel-index order, so identical inputs give
//! bit-identical outputs regardless of how the samples were gathered.

use zonal_common::{RasterGrid, ZonalStats};

use crate::coverage::CoverageMap;

/// One contributing pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSample {
    /// Flat pixel index, used for deterministic ordering.
    pub index: usize,
    pub value: f64,
    /// Coverage fraction in `(0, 1]`.
    pub weight: f64,
}

/// Result of reducing one zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReductionOutcome {
    Stats(ZonalStats),
    /// No contributing pixels. Never turned into a numeric record.
    NoData,
}

impl ReductionOutcome {
    pub fn stats(&self) -> Option<&ZonalStats> {
        match self {
            ReductionOutcome::Stats(stats) => Some(stats),
            ReductionOutcome::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, ReductionOutcome::NoData)
    }
}

/// Reduce weighted samples to the statistic set.
///
/// Samples with non-finite values or non-positive weights do not contribute.
pub fn reduce(samples: &[WeightedSample]) -> ReductionOutcome {
    let mut valid: Vec<WeightedSample> = samples
        .iter()
        .copied()
        .filter(|s| s.value.is_finite() && s.weight.is_finite() && s.weight > 0.0)
        .collect();
    if valid.is_empty() {
        return ReductionOutcome::NoData;
    }
    valid.sort_by_key(|s| s.index);

    let min = valid.iter().map(|s| s.value).fold(f64::INFINITY, f64::min);
    let max = valid.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max);

    let mut total_weight = 0.0;
    let mut offset_sum = 0.0;
    let mut sum = 0.0;
    for s in &valid {
        total_weight += s.weight;
        offset_sum += s.weight * (s.value - min);
        sum += s.weight * s.value;
    }
    let mean = min + offset_sum / total_weight;

    let variance = valid
        .iter()
        .map(|s| s.weight * (s.value - mean).powi(2))
        .sum::<f64>()
        / total_weight;

    ReductionOutcome::Stats(ZonalStats {
        min,
        max,
        mean,
        median: weighted_median(&valid, total_weight),
        std: variance.sqrt(),
        sum,
        count: valid.len() as u64,
    })
}

/// Reduce the valid pixels of `grid` under `coverage`.
pub fn reduce_coverage(grid: &RasterGrid, coverage: &CoverageMap) -> ReductionOutcome {
    reduce(&coverage.samples(grid))
}

/// Relative slack when deciding the running weight sits exactly on half.
const HALF_TOLERANCE: f64 = 1e-12;

fn weighted_median(samples: &[WeightedSample], total_weight: f64) -> f64 {
    let mut ordered: Vec<&WeightedSample> = samples.iter().collect();
    ordered.sort_by(|a, b| a.value.total_cmp(&b.value).then(a.index.cmp(&b.index)));

    let half = total_weight / 2.0;
    let mut cumulative = 0.0;
    for (i, s) in ordered.iter().enumerate() {
        cumulative += s.weight;
        if (cumulative - half).abs() <= HALF_TOLERANCE * total_weight {
            return match ordered.get(i + 1) {
                Some(next) => (s.value + next.value) / 2.0,
                None => s.value,
            };
        }
        if cumulative > half {
            return s.value;
        }
    }
    // Rounding kept the running sum under half the total
    ordered.last().map_or(f64::NAN, |s| s.value)
}
