//! Common types shared by the raster statistics crates.
//!
//! Grids, zones, dataset profiles, time keys and the statistic record
//! contract live here so the normalizer, the zonal engine and the runner
//! agree on one vocabulary.

pub mod bbox;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod record;
pub mod time;
pub mod zone;

pub use bbox::BoundingBox;
pub use dataset::{Dataset, DatasetProfile, Frequency, InterpolationMethod};
pub use error::{ErrorKind, ZonalError, ZonalResult};
pub use grid::{GeoTransform, RasterGrid};
pub use record::{InvariantViolation, StatisticKey, StatisticRecord, ZonalStats};
pub use time::{months_between, shift_months, TimeKey, MAX_LEADTIME};
pub use zone::{AdminLevel, Iso3, PolygonZone};
