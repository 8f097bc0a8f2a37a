use geo::{Area, BooleanOps, BoundingRect, Polygon};
use zonal_common::{BoundingBox, PolygonZone, RasterGrid};

use super::{visit_window, CoverageCalculator, CoverageMap, CoveragePolicy};

/// Exact-overlap coverage: `area(zone ∩ pixel) / pixel_area`, clamped to [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactAreaCoverage;

impl CoverageCalculator for ExactAreaCoverage {
    fn policy(&self) -> CoveragePolicy {
        CoveragePolicy::ExactArea
    }

    fn geometric(&self, grid: &RasterGrid, zone: &PolygonZone) -> CoverageMap {
        let parts: Vec<(&Polygon<f64>, BoundingBox)> = zone
            .geometry
            .0
            .iter()
            .filter_map(|p| p.bounding_rect().map(|r| (p, BoundingBox::from(r))))
            .collect();
        let pixel_area = grid.transform.pixel_area();

        visit_window(grid, zone, |col, row| {
            let bounds = grid.transform.pixel_bounds(col, row);
            let mut pixel_poly = None;
            let mut area = 0.0;
            for (part, part_bbox) in &parts {
                if !part_bbox.intersects(&bounds) {
                    continue;
                }
                let clip = pixel_poly.get_or_insert_with(|| bounds.to_polygon());
                area += part.intersection(&*clip).unsigned_area();
            }
            (area / pixel_area).clamp(0.0, 1.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, block_grid_4x4, holed_zone, rect_zone, triangle_zone};

    #[test]
    fn test_aligned_block_is_full() {
        let grid = block_grid_4x4();
        let zone = rect_zone("TL", "TST", 1, (0.0, 2.0, 2.0, 4.0));
        let map = ExactAreaCoverage.geometric(&grid, &zone);
        let indices: Vec<usize> = map.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 1, 4, 5]);
        for (_, w) in map.iter() {
            assert_approx_eq!(w, 1.0, 1e-12);
        }
    }

    #[test]
    fn test_partial_overlap_fractions() {
        let grid = block_grid_4x4();
        let zone = rect_zone("P", "TST", 1, (0.5, 3.0, 1.25, 4.0));
        let map = ExactAreaCoverage.geometric(&grid, &zone);
        assert_eq!(map.len(), 2);
        assert_approx_eq!(map.fraction(0), 0.5, 1e-12);
        assert_approx_eq!(map.fraction(1), 0.25, 1e-12);
    }

    #[test]
    fn test_triangle_halves_diagonal_pixels() {
        let grid = block_grid_4x4();
        let zone = triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0);
        let map = ExactAreaCoverage.geometric(&grid, &zone);
        // Row 3 holds y 0..1, row 2 holds y 1..2
        assert_approx_eq!(map.fraction(12), 1.0, 1e-12);
        assert_approx_eq!(map.fraction(13), 0.5, 1e-12);
        assert_approx_eq!(map.fraction(8), 0.5, 1e-12);
        assert_eq!(map.fraction(9), 0.0);
        assert_approx_eq!(map.total_weight(), 2.0, 1e-12);
    }

    #[test]
    fn test_hole_area_is_subtracted() {
        let grid = block_grid_4x4();
        let zone = holed_zone("H", "TST", 0);
        let map = ExactAreaCoverage.geometric(&grid, &zone);
        assert_approx_eq!(map.total_weight(), 12.0, 1e-9);
        assert_eq!(map.fraction(5), 0.0);
    }
}
