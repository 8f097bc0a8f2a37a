//! Per-polygon pixel and area metadata.
//!
//! Describes how well each zone is resolved by a dataset: how many native
//! pixels it touches, how many canonical pixels after normalization, and the
//! ratio between the two.

use std::collections::BTreeSet;

use geo::GeodesicArea;
use serde::{Deserialize, Serialize};
use zonal_common::{AdminLevel, Dataset, GeoTransform, Iso3, PolygonZone, RasterGrid};

use crate::coverage::{CoverageCalculator, ExactAreaCoverage};

/// Resolution metadata for one zone and one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonMetadata {
    pub iso3: Iso3,
    pub adm_level: AdminLevel,
    pub pcode: String,
    #[serde(default)]
    pub name: Option<String>,
    pub dataset: Dataset,
    /// Distinct native pixels under the touched canonical pixels.
    pub n_intersect_raw_pixels: u64,
    /// Canonical pixels the zone touches.
    pub n_upsampled_pixels: u64,
    /// `n_upsampled_pixels / factor²`: the zone's size in native pixels.
    pub frac_raw_pixels: f64,
    /// Geodesic area on the WGS84 ellipsoid.
    pub area_km2: f64,
}

/// Compute metadata for `zone` given the native grid's lattice and its
/// normalized counterpart.
pub fn polygon_metadata(
    zone: &PolygonZone,
    dataset: Dataset,
    native: &GeoTransform,
    normalized: &RasterGrid,
) -> PolygonMetadata {
    let touched = ExactAreaCoverage.geometric(normalized, zone);

    let raw_pixels: BTreeSet<(i64, i64)> = touched
        .iter()
        .map(|(index, _)| {
            let (x, y) = normalized
                .transform
                .pixel_center(index % normalized.width, index / normalized.width);
            let (fx, fy) = native.fractional_position(x, y);
            (fx.floor() as i64, fy.floor() as i64)
        })
        .collect();

    let factor = native.pixel_width / normalized.transform.pixel_width;
    let n_upsampled = touched.len() as u64;

    PolygonMetadata {
        iso3: zone.iso3.clone(),
        adm_level: zone.adm_level,
        pcode: zone.pcode.clone(),
        name: zone.name.clone(),
        dataset,
        n_intersect_raw_pixels: raw_pixels.len() as u64,
        n_upsampled_pixels: n_upsampled,
        frac_raw_pixels: n_upsampled as f64 / (factor * factor),
        area_km2: zone.geometry.geodesic_area_unsigned() / 1_000_000.0,
    }
}
