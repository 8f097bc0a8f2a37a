//! Zonal Statistics Runner Library
//!
//! Selects the dates for one dataset, loads rasters and boundaries through
//! the collaborator traits, and drives normalization, reduction and
//! cross-validation over a bounded worker pool.

pub mod config;
pub mod dates;
pub mod run;
pub mod sources;

pub use config::{PipelineSettings, RunConfig, RunMode};
pub use run::{RunSummary, StatsRunner};
pub use sources::{
    JsonLinesSink, LocalBoundaryStore, LocalRasterStore, PolygonSource, RasterSource, StatsSink,
};
