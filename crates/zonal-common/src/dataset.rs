//! Dataset profiles.
//!
//! Every dataset differs in native resolution, resampling kernel, cadence and
//! whether it carries forecast leadtimes. Those differences are a lookup
//! table keyed on [`Dataset`] rather than per-dataset code paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ZonalError, MAX_LEADTIME};

/// The raster products the pipeline aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// ECMWF SEAS5 seasonal precipitation forecast (ensemble mean).
    Seas5,
    /// ERA5 monthly precipitation reanalysis.
    Era5,
    /// IMERG late-run daily satellite precipitation.
    Imerg,
    /// FloodScan daily flood extent fraction.
    Floodscan,
}

impl Dataset {
    pub const ALL: [Dataset; 4] = [
        Dataset::Seas5,
        Dataset::Era5,
        Dataset::Imerg,
        Dataset::Floodscan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Seas5 => "seas5",
            Dataset::Era5 => "era5",
            Dataset::Imerg => "imerg",
            Dataset::Floodscan => "floodscan",
        }
    }

    /// Static profile for this dataset.
    pub fn profile(&self) -> DatasetProfile {
        match self {
            Dataset::Seas5 => DatasetProfile {
                dataset: *self,
                native_resolution: 0.4,
                interpolation: InterpolationMethod::Bilinear,
                frequency: Frequency::Monthly,
                forecast: true,
                max_leadtime: MAX_LEADTIME as u32,
            },
            Dataset::Era5 => DatasetProfile {
                dataset: *self,
                native_resolution: 0.25,
                interpolation: InterpolationMethod::Bilinear,
                frequency: Frequency::Monthly,
                forecast: false,
                max_leadtime: 0,
            },
            Dataset::Imerg => DatasetProfile {
                dataset: *self,
                native_resolution: 0.1,
                interpolation: InterpolationMethod::Bilinear,
                frequency: Frequency::Daily,
                forecast: false,
                max_leadtime: 0,
            },
            Dataset::Floodscan => DatasetProfile {
                dataset: *self,
                native_resolution: 0.05,
                interpolation: InterpolationMethod::Nearest,
                frequency: Frequency::Daily,
                forecast: false,
                max_leadtime: 0,
            },
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = ZonalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "seas5" => Ok(Dataset::Seas5),
            "era5" => Ok(Dataset::Era5),
            "imerg" => Ok(Dataset::Imerg),
            "floodscan" => Ok(Dataset::Floodscan),
            _ => Err(ZonalError::UnknownDataset(s.to_string())),
        }
    }
}

/// Cadence of valid dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "D")]
    Daily,
    /// First day of each month.
    #[serde(rename = "M")]
    Monthly,
}

/// Interpolation kernel used when upsampling to the canonical grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest neighbor (preserves exact values, required for masks).
    Nearest,
    /// Bilinear interpolation between source pixel centres.
    #[default]
    Bilinear,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "nearest" => Some(Self::Nearest),
            "bilinear" | "linear" => Some(Self::Bilinear),
            _ => None,
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
        }
    }
}

/// Resolution, kernel and time semantics of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub dataset: Dataset,
    /// Native pixel size in degrees.
    pub native_resolution: f64,
    pub interpolation: InterpolationMethod,
    pub frequency: Frequency,
    /// Forecast products carry issued dates and leadtimes.
    pub forecast: bool,
    pub max_leadtime: u32,
}

impl DatasetProfile {
    /// Leadtimes to process per valid date. Observational datasets have none.
    pub fn leadtimes(&self) -> Vec<u32> {
        if self.forecast {
            (0..=self.max_leadtime).collect()
        } else {
            Vec::new()
        }
    }
}
