//! Error types for grid normalization.

use thiserror::Error;
use zonal_common::ZonalError;

/// Errors that can occur while normalizing a grid.
#[derive(Error, Debug)]
pub enum NormalizerError {
    /// Native pixels are already finer than the canonical resolution.
    #[error("native resolution {native} is finer than canonical {canonical}; downsampling is not supported")]
    DownsampleUnsupported { native: f64, canonical: f64 },

    /// The requested region does not overlap the grid.
    #[error("requested region {requested} is outside grid bounds {grid}")]
    OutOfBounds { requested: String, grid: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The source or produced grid broke a structural invariant.
    #[error(transparent)]
    Grid(#[from] ZonalError),
}

impl NormalizerError {
    /// Create an OutOfBounds error.
    pub fn out_of_bounds(requested: impl Into<String>, grid: impl Into<String>) -> Self {
        Self::OutOfBounds {
            requested: requested.into(),
            grid: grid.into(),
        }
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<NormalizerError> for ZonalError {
    fn from(err: NormalizerError) -> Self {
        match err {
            NormalizerError::Grid(inner) => inner,
            other => ZonalError::InvalidGrid(other.to_string()),
        }
    }
}

/// Result type for normalizer operations.
pub type Result<T> = std::result::Result<T, NormalizerError>;
