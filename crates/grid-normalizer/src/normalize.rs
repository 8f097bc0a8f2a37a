//! Canonical-resolution upsampling.

use rayon::prelude::*;
use tracing::{debug, instrument};
use zonal_common::{BoundingBox, DatasetProfile, GeoTransform, InterpolationMethod, RasterGrid};

use crate::config::NormalizerConfig;
use crate::error::{NormalizerError, Result};
use crate::interpolation::sample;

/// Relative tolerance for "native resolution equals canonical".
const RESOLUTION_EPS: f64 = 1e-9;

/// Resamples source rasters onto the canonical lattice before any clipping.
#[derive(Debug, Clone)]
pub struct GridNormalizer {
    config: NormalizerConfig,
}

impl GridNormalizer {
    pub fn new(config: NormalizerConfig) -> Result<Self> {
        config.validate().map_err(NormalizerError::Config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn canonical_resolution(&self) -> f64 {
        self.config.canonical_resolution
    }

    /// Kernel for a dataset, honouring the configured override.
    pub fn method_for(&self, profile: &DatasetProfile) -> InterpolationMethod {
        self.config.interpolation_for(profile)
    }

    /// Per-axis `native / canonical` ratio. Errors if the grid is finer.
    pub fn upscale_factor(&self, grid: &RasterGrid) -> Result<(f64, f64)> {
        let canonical = self.config.canonical_resolution;
        let (pw, ph) = grid.transform.resolution();
        for native in [pw, ph] {
            if native < canonical && (canonical - native) > RESOLUTION_EPS * canonical {
                return Err(NormalizerError::DownsampleUnsupported { native, canonical });
            }
        }
        Ok((pw / canonical, ph / canonical))
    }

    /// Resample the full extent of `grid` to the canonical resolution.
    ///
    /// The output covers the same extent with `round(dim * factor)` pixels,
    /// sampled at output pixel centres. Nodata becomes NaN.
    #[instrument(skip(self, grid), fields(width = grid.width, height = grid.height, method = %method))]
    pub fn normalize(&self, grid: &RasterGrid, method: InterpolationMethod) -> Result<RasterGrid> {
        grid.validate()?;
        let (fx, fy) = self.upscale_factor(grid)?;
        let out_w = ((grid.width as f64 * fx).round() as usize).max(1);
        let out_h = ((grid.height as f64 * fy).round() as usize).max(1);

        if out_w == grid.width && out_h == grid.height {
            debug!("grid already at canonical resolution");
            return Ok(with_nan_nodata(grid));
        }

        // Source positions come from index arithmetic so that sub-windows of
        // the same grid land on the same lattice.
        let step_x = grid.width as f64 / out_w as f64;
        let step_y = grid.height as f64 / out_h as f64;

        let mut data = vec![f32::NAN; out_w * out_h];
        data.par_chunks_mut(out_w)
            .enumerate()
            .for_each(|(row, out_row)| {
                let sy = (row as f64 + 0.5) * step_y;
                for (col, out) in out_row.iter_mut().enumerate() {
                    let sx = (col as f64 + 0.5) * step_x;
                    if let Some(v) = sample(grid, method, sx, sy) {
                        *out = v;
                    }
                }
            });

        debug!(out_width = out_w, out_height = out_h, "normalized grid");

        Ok(RasterGrid {
            data,
            width: out_w,
            height: out_h,
            transform: GeoTransform::from_bounds(&grid.bbox(), out_w, out_h),
            nodata: None,
            units: grid.units.clone(),
        })
    }

    /// Normalize only the part of `grid` needed for zones inside `zones_bbox`.
    ///
    /// The source is first cut to `zones_bbox` padded by `pad_pixels` native
    /// pixels, snapped outward so the kernel anchors are untouched. After
    /// resampling, the result is cropped to `zones_bbox`. Output equals
    /// normalizing the full extent and cropping afterwards.
    #[instrument(skip(self, grid, method), fields(method = %method))]
    pub fn normalize_for_zones(
        &self,
        grid: &RasterGrid,
        zones_bbox: &BoundingBox,
        method: InterpolationMethod,
    ) -> Result<RasterGrid> {
        if grid.window(zones_bbox).is_none() {
            return Err(NormalizerError::out_of_bounds(
                format!("{:?}", zones_bbox),
                format!("{:?}", grid.bbox()),
            ));
        }

        let (fx, fy) = self.upscale_factor(grid)?;
        let normalized = if is_integral(fx) && is_integral(fy) {
            let (pw, ph) = grid.transform.resolution();
            let padded = zones_bbox.expand(self.config.pad_pixels as f64 * pw.max(ph));
            let window = grid.crop_outward(&padded)?;
            self.normalize(&window, method)?
        } else {
            // Windows would not share the full grid's lattice
            debug!(fx, fy, "non-integral upscale factor, normalizing full extent");
            self.normalize(grid, method)?
        };

        Ok(normalized.crop_outward(zones_bbox)?)
    }
}

fn is_integral(factor: f64) -> bool {
    (factor - factor.round()).abs() < 1e-6
}

fn with_nan_nodata(grid: &RasterGrid) -> RasterGrid {
    let data = grid
        .data
        .iter()
        .map(|v| if grid.is_nodata(*v) { f32::NAN } else { *v })
        .collect();
    RasterGrid {
        data,
        width: grid.width,
        height: grid.height,
        transform: grid.transform,
        nodata: None,
        units: grid.units.clone(),
    }
}
