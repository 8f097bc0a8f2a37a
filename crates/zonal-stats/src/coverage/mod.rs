//! Per-pixel coverage fractions of a zone over a grid.
//!
//! Two policies implement [`CoverageCalculator`]:
//!
//! - [`BinaryCoverage`]: weight 1 when the pixel centre is strictly inside.
//! - [`ExactAreaCoverage`]: weight is the overlap area over the pixel area.
//!
//! The caller always picks one explicitly. Geometric coverage depends only on
//! the grid's lattice, so it can be cached in a [`ZoneCoverageIndex`] and
//! masked against each date's nodata pixels at reduction time.

mod binary;
mod exact;
mod index;

pub use binary::BinaryCoverage;
pub use exact::ExactAreaCoverage;
pub use index::ZoneCoverageIndex;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zonal_common::{PolygonZone, RasterGrid, ZonalError};

use crate::reducer::WeightedSample;

/// Fractions below this are treated as no overlap.
pub const MIN_FRACTION: f64 = 1e-12;

/// How pixel weights are derived from zone geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoveragePolicy {
    /// Centre-in-polygon.
    #[default]
    #[serde(rename = "binary")]
    Binary,
    /// Exact overlap area.
    #[serde(rename = "exact")]
    ExactArea,
}

impl CoveragePolicy {
    /// The calculator implementing this policy.
    pub fn calculator(&self) -> &'static dyn CoverageCalculator {
        match self {
            CoveragePolicy::Binary => &BinaryCoverage,
            CoveragePolicy::ExactArea => &ExactAreaCoverage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoveragePolicy::Binary => "binary",
            CoveragePolicy::ExactArea => "exact",
        }
    }
}

impl fmt::Display for CoveragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoveragePolicy {
    type Err = ZonalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" | "center" => Ok(CoveragePolicy::Binary),
            "exact" | "exact-area" | "exact_area" => Ok(CoveragePolicy::ExactArea),
            other => Err(ZonalError::InvalidGrid(format!(
                "unknown coverage policy '{}'",
                other
            ))),
        }
    }
}

/// Computes per-pixel coverage fractions for one zone.
pub trait CoverageCalculator: Send + Sync {
    fn policy(&self) -> CoveragePolicy;

    /// Coverage over the grid's lattice, ignoring pixel values.
    ///
    /// Only pixels in the grid window under the zone's bbox are visited.
    fn geometric(&self, grid: &RasterGrid, zone: &PolygonZone) -> CoverageMap;

    /// Coverage with nodata pixels removed.
    fn coverage(&self, grid: &RasterGrid, zone: &PolygonZone) -> CoverageMap {
        self.geometric(grid, zone).masked(grid)
    }
}

/// Sparse mapping from flat pixel index to coverage fraction in `(0, 1]`.
///
/// Entries are sorted by pixel index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageMap {
    entries: Vec<(usize, f64)>,
}

impl CoverageMap {
    /// Build from entries already in ascending index order.
    pub(crate) fn from_sorted(entries: Vec<(usize, f64)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Fraction for one pixel, 0 when not covered.
    pub fn fraction(&self, index: usize) -> f64 {
        self.entries
            .binary_search_by_key(&index, |(i, _)| *i)
            .map(|pos| self.entries[pos].1)
            .unwrap_or(0.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    /// Drop pixels that are nodata in `grid`.
    pub fn masked(&self, grid: &RasterGrid) -> CoverageMap {
        CoverageMap {
            entries: self
                .entries
                .iter()
                .copied()
                .filter(|(i, _)| !grid.is_nodata(grid.data[*i]))
                .collect(),
        }
    }

    /// Pair each covered, valid pixel with its value.
    pub fn samples(&self, grid: &RasterGrid) -> Vec<WeightedSample> {
        self.entries
            .iter()
            .filter_map(|&(index, weight)| {
                let value = grid.data[index];
                if grid.is_nodata(value) {
                    None
                } else {
                    Some(WeightedSample {
                        index,
                        value: value as f64,
                        weight,
                    })
                }
            })
            .collect()
    }
}

/// Visit every pixel of `grid` under the zone's bbox, in row-major order.
pub(crate) fn visit_window<F>(grid: &RasterGrid, zone: &PolygonZone, mut f: F) -> CoverageMap
where
    F: FnMut(usize, usize) -> f64,
{
    let Ok(bbox) = zone.bbox() else {
        return CoverageMap::default();
    };
    let Some((col0, row0, col1, row1)) = grid.window(&bbox) else {
        return CoverageMap::default();
    };

    let mut entries = Vec::new();
    for row in row0..row1 {
        for col in col0..col1 {
            let fraction = f(col, row);
            if fraction >= MIN_FRACTION {
                entries.push((row * grid.width + col, fraction));
            }
        }
    }
    CoverageMap::from_sorted(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{block_grid_4x4, rect_zone, with_nodata_at};

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("binary".parse::<CoveragePolicy>().unwrap(), CoveragePolicy::Binary);
        assert_eq!("exact".parse::<CoveragePolicy>().unwrap(), CoveragePolicy::ExactArea);
        assert!("fuzzy".parse::<CoveragePolicy>().is_err());
        assert_eq!(CoveragePolicy::ExactArea.to_string(), "exact");
    }

    #[test]
    fn test_masked_drops_nodata() {
        let grid = with_nodata_at(block_grid_4x4(), &[(0, 0)]);
        let zone = rect_zone("TL", "TST", 1, (0.0, 2.0, 2.0, 4.0));
        let geometric = BinaryCoverage.geometric(&grid, &zone);
        assert_eq!(geometric.len(), 4);

        let masked = BinaryCoverage.coverage(&grid, &zone);
        assert_eq!(masked.len(), 3);
        assert_eq!(masked.fraction(0), 0.0);
        assert_eq!(masked.fraction(1), 1.0);
    }

    #[test]
    fn test_samples_carry_values() {
        let grid = block_grid_4x4();
        let zone = rect_zone("TL", "TST", 1, (0.0, 2.0, 2.0, 4.0));
        let samples = BinaryCoverage.coverage(&grid, &zone).samples(&grid);
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 5.0, 6.0]);
    }
}
