//! Zonal Statistics over Normalized Grids
//!
//! Given a grid on the canonical lattice and a set of administrative zones,
//! computes per-zone statistics and checks them against independent
//! reference methods.
//!
//! # Pipeline
//!
//! ```text
//! Normalized grid + zones
//!      │
//!      ▼
//! ZoneCoverageIndex::build (once per lattice and zone set)
//!      │
//!      ├─► Binary: pixel centre strictly inside the zone
//!      │
//!      └─► ExactArea: overlap area / pixel area
//!               │
//!               ▼
//! ZonalEngine::run (per grid, nodata mask applied here)
//!      │
//!      ├─► Weighted reduction → ZonalStats
//!      │
//!      └─► Record contract checks → Record | NoData | Withheld
//!               │
//!               ▼
//! CrossValidator::validate → ValidationReport (flags, never corrects)
//! ```

pub mod coverage;
pub mod crossval;
pub mod engine;
pub mod error;
pub mod polygon_meta;
pub mod reducer;

pub use coverage::{
    BinaryCoverage, CoverageCalculator, CoverageMap, CoveragePolicy, ExactAreaCoverage,
    ZoneCoverageIndex, MIN_FRACTION,
};
pub use crossval::{
    percent_difference, ClippedAreaReference, CrossValidator, ReferenceMethod, ReferenceStats,
    ScanlineCenterReference, StatDifference, ValidationReport, ZoneComparison,
    DEFAULT_THRESHOLD_PCT,
};
pub use engine::{ZonalEngine, ZoneResult};
pub use error::{Result, StatsError};
pub use polygon_meta::{polygon_metadata, PolygonMetadata};
pub use reducer::{reduce, reduce_coverage, ReductionOutcome, WeightedSample};
