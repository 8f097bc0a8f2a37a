use geo::{Contains, Point};
use zonal_common::{PolygonZone, RasterGrid};

use super::{visit_window, CoverageCalculator, CoverageMap, CoveragePolicy};

/// Centre-in-polygon coverage. A centre on the boundary is outside.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCoverage;

impl CoverageCalculator for BinaryCoverage {
    fn policy(&self) -> CoveragePolicy {
        CoveragePolicy::Binary
    }

    fn geometric(&self, grid: &RasterGrid, zone: &PolygonZone) -> CoverageMap {
        visit_window(grid, zone, |col, row| {
            let (x, y) = grid.transform.pixel_center(col, row);
            if zone.geometry.contains(&Point::new(x, y)) {
                1.0
            } else {
                0.0
            }
        })
    }
}
