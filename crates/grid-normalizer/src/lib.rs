//! Grid Normalization Ahead of Zonal Aggregation
//!
//! Source rasters arrive at their native resolution (0.4° for seasonal
//! forecasts down to 0.05° for flood extent). Before any clipping they are
//! upsampled onto one canonical lattice so that every dataset lines up with
//! the polygon layer the same way.
//!
//! # Architecture
//!
//! ```text
//! Native raster
//!      │
//!      ▼
//! GridNormalizer::normalize_for_zones(grid, zones_bbox)
//!      │
//!      ├─► Pad zones bbox by N native pixels, snap outward
//!      │
//!      ├─► Crop source (values untouched)
//!      │
//!      ├─► Resample at canonical pixel centres
//!      │         │
//!      │         ├─► Nearest: masks, flood fractions
//!      │         │
//!      │         └─► Bilinear: continuous fields, nearest on nodata
//!      │
//!      └─► Crop result to zones bbox
//!               │
//!               ▼
//!          Coverage + reduction
//! ```
//!
//! Clipping first and resampling second changes which source pixels anchor
//! the kernel at the zone edge. The padded window keeps every anchor that
//! the full-extent resample would use, so both give the same pixels.
//!
//! # Example
//!
//! ```ignore
//! use grid_normalizer::{GridNormalizer, NormalizerConfig};
//!
//! let normalizer = GridNormalizer::new(NormalizerConfig::from_env())?;
//! let method = normalizer.method_for(&Dataset::Era5.profile());
//! let grid = normalizer.normalize_for_zones(&raw, &country_bbox, method)?;
//! ```

pub mod config;
pub mod error;
pub mod interpolation;
pub mod normalize;

// Re-export commonly used types at crate root
pub use config::NormalizerConfig;
pub use error::{NormalizerError, Result};
pub use interpolation::{bilinear_sample, nearest_sample, sample};
pub use normalize::GridNormalizer;
