//! Raster grids with a north-up affine transform.

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, ZonalError, ZonalResult};

/// North-up affine transform (rotation terms are always zero).
///
/// `origin_x`/`origin_y` is the top-left corner of pixel (0, 0). Columns grow
/// eastwards by `pixel_width`, rows grow southwards by `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Transform covering `bbox` with `width` x `height` pixels.
    pub fn from_bounds(bbox: &BoundingBox, width: usize, height: usize) -> Self {
        Self {
            origin_x: bbox.min_x,
            origin_y: bbox.max_y,
            pixel_width: bbox.width() / width as f64,
            pixel_height: bbox.height() / height as f64,
        }
    }

    /// Pixel size as (x, y).
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width, self.pixel_height)
    }

    pub fn pixel_area(&self) -> f64 {
        self.pixel_width * self.pixel_height
    }

    /// Coordinates of a pixel centre.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Footprint of a pixel.
    pub fn pixel_bounds(&self, col: usize, row: usize) -> BoundingBox {
        let min_x = self.origin_x + col as f64 * self.pixel_width;
        let max_y = self.origin_y - row as f64 * self.pixel_height;
        BoundingBox::new(
            min_x,
            max_y - self.pixel_height,
            min_x + self.pixel_width,
            max_y,
        )
    }

    /// Fractional (col, row) position of a coordinate; pixel centres sit at `n + 0.5`.
    pub fn fractional_position(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// True when both transforms describe the same pixel lattice.
    pub fn same_lattice(&self, other: &GeoTransform) -> bool {
        const EPS: f64 = 1e-9;
        let close = |a: f64, b: f64| (a - b).abs() <= EPS * a.abs().max(b.abs()).max(1.0);
        close(self.origin_x, other.origin_x)
            && close(self.origin_y, other.origin_y)
            && close(self.pixel_width, other.pixel_width)
            && close(self.pixel_height, other.pixel_height)
    }
}

/// A single-band raster: row-major samples, transform and nodata sentinel.
///
/// NaN is always treated as missing in addition to `nodata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterGrid {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    #[serde(default)]
    pub nodata: Option<f32>,
    #[serde(default)]
    pub units: Option<String>,
}

impl RasterGrid {
    /// Create a grid, checking shape and transform.
    pub fn new(
        data: Vec<f32>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> ZonalResult<Self> {
        let grid = Self {
            data,
            width,
            height,
            transform,
            nodata,
            units: None,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Check the structural invariants. Grids read from collaborators go through this.
    pub fn validate(&self) -> ZonalResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ZonalError::InvalidGrid(format!(
                "empty grid {}x{}",
                self.width, self.height
            )));
        }
        if self.data.len() != self.width * self.height {
            return Err(ZonalError::InvalidGrid(format!(
                "data length {} does not match {}x{}",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        let (pw, ph) = self.transform.resolution();
        if !(pw.is_finite() && ph.is_finite() && pw > 0.0 && ph > 0.0) {
            return Err(ZonalError::InvalidGrid(format!(
                "pixel size must be positive, got ({}, {})",
                pw, ph
            )));
        }
        if !(self.transform.origin_x.is_finite() && self.transform.origin_y.is_finite()) {
            return Err(ZonalError::InvalidGrid("non-finite origin".to_string()));
        }
        Ok(())
    }

    /// Check whether a sample counts as missing.
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| value == nd)
    }

    /// Value at (col, row), `None` when outside the grid or missing.
    pub fn value(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let v = self.data[row * self.width + col];
        if self.is_nodata(v) {
            None
        } else {
            Some(v)
        }
    }

    /// Geographic extent of the grid.
    pub fn bbox(&self) -> BoundingBox {
        let t = &self.transform;
        BoundingBox::new(
            t.origin_x,
            t.origin_y - self.height as f64 * t.pixel_height,
            t.origin_x + self.width as f64 * t.pixel_width,
            t.origin_y,
        )
    }

    /// Number of samples that are not nodata.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    /// Column/row window `(col0, row0, col1, row1)` (exclusive end) of pixels
    /// whose footprint touches `bbox`. `None` if nothing overlaps.
    pub fn window(&self, bbox: &BoundingBox) -> Option<(usize, usize, usize, usize)> {
        let clipped = self.bbox().intersection(bbox)?;
        let (fx0, fy0) = self.transform.fractional_position(clipped.min_x, clipped.max_y);
        let (fx1, fy1) = self.transform.fractional_position(clipped.max_x, clipped.min_y);

        let col0 = snap_floor(fx0).max(0.0) as usize;
        let row0 = snap_floor(fy0).max(0.0) as usize;
        let col1 = (snap_ceil(fx1) as usize).min(self.width);
        let row1 = (snap_ceil(fy1) as usize).min(self.height);

        if col0 >= col1 || row0 >= row1 {
            return None;
        }
        Some((col0, row0, col1, row1))
    }

    /// Copy of every pixel touching `bbox`, snapped outward to pixel edges.
    ///
    /// Sample values are never altered, only the extent shrinks.
    pub fn crop_outward(&self, bbox: &BoundingBox) -> ZonalResult<RasterGrid> {
        let (col0, row0, col1, row1) = self.window(bbox).ok_or_else(|| {
            ZonalError::InvalidGrid(format!(
                "crop window {:?} does not overlap grid {:?}",
                bbox,
                self.bbox()
            ))
        })?;
        Ok(self.sub_grid(col0, row0, col1, row1))
    }

    fn sub_grid(&self, col0: usize, row0: usize, col1: usize, row1: usize) -> RasterGrid {
        let width = col1 - col0;
        let height = row1 - row0;
        let mut data = Vec::with_capacity(width * height);
        for row in row0..row1 {
            let start = row * self.width;
            data.extend_from_slice(&self.data[start + col0..start + col1]);
        }
        let t = &self.transform;
        RasterGrid {
            data,
            width,
            height,
            transform: GeoTransform::new(
                t.origin_x + col0 as f64 * t.pixel_width,
                t.origin_y - row0 as f64 * t.pixel_height,
                t.pixel_width,
                t.pixel_height,
            ),
            nodata: self.nodata,
            units: self.units.clone(),
        }
    }
}

// Fractional pixel positions that land a hair off an integer because of
// float noise are snapped onto it before floor/ceil.
const SNAP_EPS: f64 = 1e-9;

fn snap_floor(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPS {
        r
    } else {
        v.floor()
    }
}

fn snap_ceil(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPS {
        r
    } else {
        v.ceil()
    }
}
