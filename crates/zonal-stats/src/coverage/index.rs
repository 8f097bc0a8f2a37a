use rayon::prelude::*;
use tracing::debug;
use zonal_common::{GeoTransform, PolygonZone, RasterGrid};

use super::{CoverageMap, CoveragePolicy};
use crate::error::{Result, StatsError};

/// Geometric coverage of a zone set against one pixel lattice.
///
/// Built once per (country, admin level, lattice) and reused for every date
/// and leadtime sharing that lattice. Maps are stored in zone order.
#[derive(Debug, Clone)]
pub struct ZoneCoverageIndex {
    policy: CoveragePolicy,
    transform: GeoTransform,
    width: usize,
    height: usize,
    maps: Vec<CoverageMap>,
}

impl ZoneCoverageIndex {
    pub fn build(grid: &RasterGrid, zones: &[PolygonZone], policy: CoveragePolicy) -> Self {
        let calculator = policy.calculator();
        let maps: Vec<CoverageMap> = zones
            .par_iter()
            .map(|zone| calculator.geometric(grid, zone))
            .collect();

        debug!(
            zones = zones.len(),
            policy = %policy,
            pixels = maps.iter().map(CoverageMap::len).sum::<usize>(),
            "built coverage index"
        );

        Self {
            policy,
            transform: grid.transform,
            width: grid.width,
            height: grid.height,
            maps,
        }
    }

    pub fn policy(&self) -> CoveragePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Coverage of the `i`-th zone.
    pub fn get(&self, i: usize) -> Option<&CoverageMap> {
        self.maps.get(i)
    }

    /// True when `grid` sits on the lattice this index was built for.
    pub fn matches(&self, grid: &RasterGrid) -> bool {
        grid.width == self.width
            && grid.height == self.height
            && grid.transform.same_lattice(&self.transform)
    }

    pub fn ensure_matches(&self, grid: &RasterGrid) -> Result<()> {
        if self.matches(grid) {
            Ok(())
        } else {
            Err(StatsError::IndexMismatch {
                index: self.transform,
                index_width: self.width,
                index_height: self.height,
                grid: grid.transform,
                grid_width: grid.width,
                grid_height: grid.height,
            })
        }
    }
}
