//! Interpolation kernels for grid resampling.
//!
//! Positions are fractional pixel coordinates as produced by
//! [`GeoTransform::fractional_position`](zonal_common::GeoTransform::fractional_position):
//! pixel `n` spans `[n, n + 1)` and its centre sits at `n + 0.5`.

use zonal_common::{InterpolationMethod, RasterGrid};

/// Sample `grid` at a fractional pixel position with the given kernel.
pub fn sample(grid: &RasterGrid, method: InterpolationMethod, fx: f64, fy: f64) -> Option<f32> {
    match method {
        InterpolationMethod::Nearest => nearest_sample(grid, fx, fy),
        InterpolationMethod::Bilinear => bilinear_sample(grid, fx, fy),
    }
}

/// Nearest neighbor interpolation.
///
/// Returns the value of the source pixel containing the position, clamped to
/// the grid. `None` when that pixel is nodata.
pub fn nearest_sample(grid: &RasterGrid, fx: f64, fy: f64) -> Option<f32> {
    let col = clamp_index(fx.floor(), grid.width);
    let row = clamp_index(fy.floor(), grid.height);
    grid.value(col, row)
}

/// Bilinear interpolation.
///
/// Interpolates between the four surrounding source pixel centres. Positions
/// beyond the outermost centres are clamped to the edge. If any of the four
/// neighbours is nodata, falls back to nearest neighbor.
pub fn bilinear_sample(grid: &RasterGrid, fx: f64, fy: f64) -> Option<f32> {
    let u = (fx - 0.5).clamp(0.0, (grid.width - 1) as f64);
    let v = (fy - 0.5).clamp(0.0, (grid.height - 1) as f64);

    let x0 = u.floor() as usize;
    let y0 = v.floor() as usize;
    let x1 = (x0 + 1).min(grid.width - 1);
    let y1 = (y0 + 1).min(grid.height - 1);

    let (v00, v10, v01, v11) = match (
        grid.value(x0, y0),
        grid.value(x1, y0),
        grid.value(x0, y1),
        grid.value(x1, y1),
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (a as f64, b as f64, c as f64, d as f64),
        _ => return nearest_sample(grid, fx, fy),
    };

    let xf = u - x0 as f64;
    let yf = v - y0 as f64;

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    Some((top * (1.0 - yf) + bottom * yf) as f32)
}

fn clamp_index(v: f64, len: usize) -> usize {
    if v <= 0.0 {
        0
    } else {
        (v as usize).min(len - 1)
    }
}
