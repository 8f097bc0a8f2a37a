//! Test data generators for synthetic rasters and zones.
//!
//! These generators create predictable, verifiable patterns whose zonal
//! statistics can be worked out by hand.

use geo::{polygon, MultiPolygon};
use zonal_common::{AdminLevel, GeoTransform, Iso3, PolygonZone, RasterGrid};

/// Creates a grid with sequential values.
///
/// Each cell value is its row-major index: `row * width + col`.
///
/// # Arguments
///
/// * `width` - Number of columns
/// * `height` - Number of rows
/// * `transform` - Placement of the grid
///
/// # Example
///
/// ```
/// use test_utils::sequential_grid;
/// use zonal_common::GeoTransform;
///
/// let grid = sequential_grid(4, 2, GeoTransform::new(0.0, 2.0, 1.0, 1.0));
/// assert_eq!(grid.data.len(), 8);
/// assert_eq!(grid.value(1, 1), Some(5.0));
/// ```
pub fn sequential_grid(width: usize, height: usize, transform: GeoTransform) -> RasterGrid {
    let data = (0..width * height).map(|i| i as f32).collect();
    RasterGrid {
        data,
        width,
        height,
        transform,
        nodata: Some(-9999.0),
        units: None,
    }
}

/// Creates a grid with the same value everywhere.
pub fn constant_grid(width: usize, height: usize, transform: GeoTransform, value: f32) -> RasterGrid {
    RasterGrid {
        data: vec![value; width * height],
        width,
        height,
        transform,
        nodata: Some(-9999.0),
        units: None,
    }
}

/// Creates a grid with precipitation-like values in mm.
///
/// Values grow smoothly from the north-west corner (0 mm) to the south-east
/// corner (~200 mm), similar to a rainfall gradient across a country.
pub fn precipitation_grid(width: usize, height: usize, transform: GeoTransform) -> RasterGrid {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            data.push(100.0 * x_factor + 100.0 * y_factor);
        }
    }
    RasterGrid {
        data,
        width,
        height,
        transform,
        nodata: Some(-9999.0),
        units: Some("mm".to_string()),
    }
}

/// The 4x4 scenario grid: 1° pixels covering x 0..4, y 0..4, values 1..=16
/// in row-major order.
///
/// The top-left 2x2 block (x 0..2, y 2..4) holds 1, 2, 5 and 6.
pub fn block_grid_4x4() -> RasterGrid {
    let data = (1..=16).map(|v| v as f32).collect();
    RasterGrid {
        data,
        width: 4,
        height: 4,
        transform: GeoTransform::new(0.0, 4.0, 1.0, 1.0),
        nodata: Some(-9999.0),
        units: None,
    }
}

/// 4x4 grid of ones with a single spike of 100 at column 3, row 1.
///
/// A zone over columns 1..=2, rows 1..=2 excludes the spike. Whether the
/// spike leaks into that zone depends on resampling before or after
/// cropping.
pub fn spike_grid() -> RasterGrid {
    let mut data = vec![1.0f32; 16];
    data[4 + 3] = 100.0;
    RasterGrid {
        data,
        width: 4,
        height: 4,
        transform: GeoTransform::new(0.0, 4.0, 1.0, 1.0),
        nodata: Some(-9999.0),
        units: None,
    }
}

/// Replace the value at (col, row) with the grid's nodata sentinel.
pub fn with_nodata_at(mut grid: RasterGrid, cells: &[(usize, usize)]) -> RasterGrid {
    let nodata = grid.nodata.unwrap_or(f32::NAN);
    for &(col, row) in cells {
        grid.data[row * grid.width + col] = nodata;
    }
    grid
}

/// An axis-aligned rectangle zone.
///
/// # Panics
///
/// Panics on an invalid ISO3, level or degenerate rectangle; test use only.
pub fn rect_zone(
    pcode: &str,
    iso3: &str,
    level: u8,
    (min_x, min_y, max_x, max_y): (f64, f64, f64, f64),
) -> PolygonZone {
    let geometry = MultiPolygon::new(vec![polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
        (x: min_x, y: min_y),
    ]]);
    PolygonZone::new(
        pcode,
        Iso3::new(iso3).expect("valid iso3"),
        AdminLevel::new(level).expect("valid admin level"),
        geometry,
    )
    .expect("valid rectangle")
}

/// A right triangle with the right angle at `(x0, y0)` and legs of `size`.
pub fn triangle_zone(pcode: &str, iso3: &str, level: u8, x0: f64, y0: f64, size: f64) -> PolygonZone {
    let geometry = MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x0 + size, y: y0),
        (x: x0, y: y0 + size),
        (x: x0, y: y0),
    ]]);
    PolygonZone::new(
        pcode,
        Iso3::new(iso3).expect("valid iso3"),
        AdminLevel::new(level).expect("valid admin level"),
        geometry,
    )
    .expect("valid triangle")
}

/// A square zone with a square hole punched in its middle.
pub fn holed_zone(pcode: &str, iso3: &str, level: u8) -> PolygonZone {
    let geometry = MultiPolygon::new(vec![polygon!(
        exterior: [
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 4.0),
            (x: 0.0, y: 4.0),
            (x: 0.0, y: 0.0),
        ],
        interiors: [[
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 3.0),
            (x: 3.0, y: 3.0),
            (x: 3.0, y: 1.0),
            (x: 1.0, y: 1.0),
        ]],
    )]);
    PolygonZone::new(
        pcode,
        Iso3::new(iso3).expect("valid iso3"),
        AdminLevel::new(level).expect("valid admin level"),
        geometry,
    )
    .expect("valid holed square")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_grid_layout() {
        let grid = block_grid_4x4();
        assert!(grid.validate().is_ok());
        assert_eq!(grid.value(0, 0), Some(1.0));
        assert_eq!(grid.value(1, 1), Some(6.0));
        assert_eq!(grid.value(3, 3), Some(16.0));
    }

    #[test]
    fn test_spike_position() {
        let grid = spike_grid();
        assert_eq!(grid.value(3, 1), Some(100.0));
        assert_eq!(grid.data.iter().filter(|v| **v == 1.0).count(), 15);
    }

    #[test]
    fn test_with_nodata_at() {
        let grid = with_nodata_at(block_grid_4x4(), &[(0, 0), (3, 3)]);
        assert_eq!(grid.value(0, 0), None);
        assert_eq!(grid.valid_count(), 14);
    }

    #[test]
    fn test_zone_builders() {
        let rect = rect_zone("R", "TST", 1, (0.0, 2.0, 2.0, 4.0));
        assert!((rect.planar_area() - 4.0).abs() < 1e-12);

        let tri = triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0);
        assert!((tri.planar_area() - 2.0).abs() < 1e-12);

        let holed = holed_zone("H", "TST", 0);
        assert!((holed.planar_area() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_precipitation_grid_range() {
        let grid = precipitation_grid(10, 10, GeoTransform::new(0.0, 10.0, 1.0, 1.0));
        let max = grid.data.iter().cloned().fold(f32::MIN, f32::max);
        assert!(grid.data.iter().all(|v| *v >= 0.0));
        assert!(max < 200.0);
    }
}
