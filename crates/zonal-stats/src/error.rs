//! Error types for zonal statistics.

use thiserror::Error;
use zonal_common::{GeoTransform, ZonalError};

/// Errors that can occur while computing zonal statistics.
#[derive(Error, Debug)]
pub enum StatsError {
    /// A coverage index was built for a different pixel lattice.
    #[error("coverage index built for {index:?} ({index_width}x{index_height}) used with grid {grid:?} ({grid_width}x{grid_height})")]
    IndexMismatch {
        index: GeoTransform,
        index_width: usize,
        index_height: usize,
        grid: GeoTransform,
        grid_width: usize,
        grid_height: usize,
    },

    /// A coverage index was built for a different zone set.
    #[error("coverage index holds {index} zones, got {zones}")]
    ZoneCountMismatch { index: usize, zones: usize },

    /// Cross-validation threshold is not a usable percentage.
    #[error("invalid threshold: {0}")]
    InvalidThreshold(f64),

    #[error(transparent)]
    Zonal(#[from] ZonalError),
}

impl From<StatsError> for ZonalError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::Zonal(inner) => inner,
            other => ZonalError::InvalidGrid(other.to_string()),
        }
    }
}

/// Result type for zonal statistics operations.
pub type Result<T> = std::result::Result<T, StatsError>;
