//! Independent reference implementations of zonal statistics.
//!
//! Neither method shares code with the engine's coverage or reducer: the
//! centre method rasterizes rings with an even-odd scanline, the area method
//! clips rings against each pixel with Sutherland-Hodgman and measures the
//! result with the shoelace formula.

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};
use zonal_common::{BoundingBox, PolygonZone, RasterGrid};

/// Statistics produced by a reference method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    /// Pixel count, or summed coverage for area-weighted methods.
    pub count: f64,
}

/// An independently sourced zonal-statistics computation.
pub trait ReferenceMethod: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when no valid pixel contributes.
    fn compute(&self, grid: &RasterGrid, zone: &PolygonZone) -> Option<ReferenceStats>;
}

fn rings(zone: &PolygonZone) -> Vec<&LineString<f64>> {
    zone.geometry
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .collect()
}

// ============================================================================
// Centre-in-polygon via scanline
// ============================================================================

/// Unweighted statistics over pixels whose centre is inside the zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineCenterReference;

impl ReferenceMethod for ScanlineCenterReference {
    fn name(&self) -> &'static str {
        "scanline-center"
    }

    fn compute(&self, grid: &RasterGrid, zone: &PolygonZone) -> Option<ReferenceStats> {
        let bbox = zone.bbox().ok()?;
        let (col0, row0, col1, row1) = grid.window(&bbox)?;
        let rings = rings(zone);

        let mut values = Vec::new();
        for row in row0..row1 {
            let (_, y) = grid.transform.pixel_center(col0, row);
            let crossings = scanline_crossings(&rings, y);
            if crossings.is_empty() {
                continue;
            }
            for col in col0..col1 {
                let (x, _) = grid.transform.pixel_center(col, row);
                if crossings.iter().any(|cx| *cx == x) {
                    continue;
                }
                let left = crossings.iter().filter(|cx| **cx < x).count();
                if left % 2 == 1 {
                    if let Some(v) = grid.value(col, row) {
                        values.push(v as f64);
                    }
                }
            }
        }

        unweighted_stats(values)
    }
}

/// X positions where ring edges cross the horizontal line at `y`.
///
/// Edges are half-open in y so a vertex on the line is counted once.
fn scanline_crossings(rings: &[&LineString<f64>], y: f64) -> Vec<f64> {
    let mut xs = Vec::new();
    for ring in rings {
        for w in ring.0.windows(2) {
            let (p, q) = (w[0], w[1]);
            if (p.y > y) != (q.y > y) {
                xs.push(p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y));
            }
        }
    }
    xs
}

fn unweighted_stats(mut values: Vec<f64>) -> Option<ReferenceStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    Some(ReferenceStats {
        mean,
        median,
        min: values[0],
        max: values[n - 1],
        std: var.sqrt(),
        count: n as f64,
    })
}

// ============================================================================
// Exact overlap via per-pixel clipping
// ============================================================================

/// Coverage-weighted statistics using clipped overlap areas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClippedAreaReference;

impl ReferenceMethod for ClippedAreaReference {
    fn name(&self) -> &'static str {
        "clipped-area"
    }

    fn compute(&self, grid: &RasterGrid, zone: &PolygonZone) -> Option<ReferenceStats> {
        let bbox = zone.bbox().ok()?;
        let (col0, row0, col1, row1) = grid.window(&bbox)?;
        let pixel_area = grid.transform.pixel_area();

        let mut weighted = Vec::new();
        for row in row0..row1 {
            for col in col0..col1 {
                let Some(v) = grid.value(col, row) else {
                    continue;
                };
                let rect = grid.transform.pixel_bounds(col, row);
                let mut area = 0.0;
                for polygon in &zone.geometry.0 {
                    area += clipped_area(&polygon.exterior().0, &rect);
                    for hole in polygon.interiors() {
                        area -= clipped_area(&hole.0, &rect);
                    }
                }
                let fraction = area / pixel_area;
                if fraction > 1e-12 {
                    weighted.push((v as f64, fraction.min(1.0)));
                }
            }
        }

        weighted_stats(weighted)
    }
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}

impl Edge {
    const ALL: [Edge; 4] = [Edge::Left, Edge::Right, Edge::Bottom, Edge::Top];

    fn is_inside(&self, p: &Coord<f64>, rect: &BoundingBox) -> bool {
        match self {
            Edge::Left => p.x >= rect.min_x,
            Edge::Right => p.x <= rect.max_x,
            Edge::Bottom => p.y >= rect.min_y,
            Edge::Top => p.y <= rect.max_y,
        }
    }

    fn intersect(&self, p: &Coord<f64>, q: &Coord<f64>, rect: &BoundingBox) -> Coord<f64> {
        let dx = q.x - p.x;
        let dy = q.y - p.y;
        match self {
            Edge::Left => Coord {
                x: rect.min_x,
                y: p.y + (rect.min_x - p.x) / dx * dy,
            },
            Edge::Right => Coord {
                x: rect.max_x,
                y: p.y + (rect.max_x - p.x) / dx * dy,
            },
            Edge::Bottom => Coord {
                x: p.x + (rect.min_y - p.y) / dy * dx,
                y: rect.min_y,
            },
            Edge::Top => Coord {
                x: p.x + (rect.max_y - p.y) / dy * dx,
                y: rect.max_y,
            },
        }
    }
}

/// Area of a closed ring clipped to `rect`.
///
/// Clipping a concave ring against a convex window can leave zero-width
/// slivers along the window edge; they contribute no area.
fn clipped_area(ring: &[Coord<f64>], rect: &BoundingBox) -> f64 {
    // Drop the closing coordinate; the clipper wraps around itself
    let mut vertices: Vec<Coord<f64>> = match ring.split_last() {
        Some((last, rest)) if Some(last) == rest.first() => rest.to_vec(),
        _ => ring.to_vec(),
    };

    for edge in Edge::ALL {
        if vertices.is_empty() {
            return 0.0;
        }
        let n = vertices.len();
        let mut output = Vec::with_capacity(n + 4);
        for i in 0..n {
            let current = &vertices[i];
            let next = &vertices[(i + 1) % n];
            match (edge.is_inside(current, rect), edge.is_inside(next, rect)) {
                (true, true) => output.push(*next),
                (true, false) => output.push(edge.intersect(current, next, rect)),
                (false, true) => {
                    output.push(edge.intersect(current, next, rect));
                    output.push(*next);
                }
                (false, false) => {}
            }
        }
        vertices = output;
    }

    shoelace(&vertices).abs()
}

fn shoelace(vertices: &[Coord<f64>]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

fn weighted_stats(mut pairs: Vec<(f64, f64)>) -> Option<ReferenceStats> {
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    let mean = pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total;
    let var = pairs
        .iter()
        .map(|(v, w)| w * (v - mean) * (v - mean))
        .sum::<f64>()
        / total;

    let half = total / 2.0;
    let mut cumulative = 0.0;
    let mut median = pairs[pairs.len() - 1].0;
    for (i, (v, w)) in pairs.iter().enumerate() {
        cumulative += w;
        if (cumulative - half).abs() <= 1e-12 * total {
            median = match pairs.get(i + 1) {
                Some((next, _)) => (v + next) / 2.0,
                None => *v,
            };
            break;
        }
        if cumulative > half {
            median = *v;
            break;
        }
    }

    Some(ReferenceStats {
        mean,
        median,
        min: pairs[0].0,
        max: pairs[pairs.len() - 1].0,
        std: var.sqrt(),
        count: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, block_grid_4x4, holed_zone, rect_zone, triangle_zone};

    #[test]
    fn test_shoelace_unit_square() {
        let square = [
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 1.0, y: 0.0 },
            Coord { x: 1.0, y: 1.0 },
            Coord { x: 0.0, y: 1.0 },
        ];
        assert_approx_eq!(shoelace(&square), 1.0, 1e-12);
    }

    #[test]
    fn test_clipped_area_partial() {
        let ring = [
            Coord { x: 0.5, y: 0.0 },
            Coord { x: 3.0, y: 0.0 },
            Coord { x: 3.0, y: 3.0 },
            Coord { x: 0.5, y: 3.0 },
            Coord { x: 0.5, y: 0.0 },
        ];
        let rect = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert_approx_eq!(clipped_area(&ring, &rect), 0.5, 1e-12);
    }

    #[test]
    fn test_scanline_block() {
        let grid = block_grid_4x4();
        let zone = rect_zone("TL", "TST", 1, (0.0, 2.0, 2.0, 4.0));
        let stats = ScanlineCenterReference.compute(&grid, &zone).unwrap();
        assert_eq!(stats.count, 4.0);
        assert_eq!(stats.mean, 3.5);
        assert_eq!(stats.median, 3.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 6.0);
    }

    #[test]
    fn test_scanline_skips_hole_and_boundary_centres() {
        let grid = block_grid_4x4();
        let holed = ScanlineCenterReference
            .compute(&grid, &holed_zone("H", "TST", 0))
            .unwrap();
        assert_eq!(holed.count, 12.0);

        let tri = ScanlineCenterReference
            .compute(&grid, &triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0))
            .unwrap();
        assert_eq!(tri.count, 1.0);
        assert_eq!(tri.mean, 13.0);
    }

    #[test]
    fn test_clipped_area_triangle() {
        let grid = block_grid_4x4();
        let zone = triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0);
        let stats = ClippedAreaReference.compute(&grid, &zone).unwrap();
        // Pixel 13 full, pixels 14 and 9 half covered
        assert_approx_eq!(stats.count, 2.0, 1e-12);
        assert_approx_eq!(stats.mean, (13.0 + 0.5 * 14.0 + 0.5 * 9.0) / 2.0, 1e-12);
        assert_eq!(stats.min, 9.0);
        assert_eq!(stats.max, 14.0);
    }

    #[test]
    fn test_no_overlap_is_none() {
        let grid = block_grid_4x4();
        let zone = rect_zone("OUT", "TST", 1, (10.0, 10.0, 11.0, 11.0));
        assert!(ScanlineCenterReference.compute(&grid, &zone).is_none());
        assert!(ClippedAreaReference.compute(&grid, &zone).is_none());
    }
}
