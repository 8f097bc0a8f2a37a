//! Configuration for the grid normalizer.

use serde::{Deserialize, Serialize};
use zonal_common::{DatasetProfile, InterpolationMethod};

/// Configuration for the grid normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Target pixel size in degrees shared by every dataset.
    pub canonical_resolution: f64,

    /// Native pixels of padding kept around the zones' bbox before resampling.
    pub pad_pixels: usize,

    /// Force one kernel for every dataset instead of the profile's.
    pub interpolation: Option<InterpolationMethod>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            canonical_resolution: 0.05,
            pad_pixels: 2,
            interpolation: None,
        }
    }
}

impl NormalizerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CANONICAL_RESOLUTION") {
            if let Ok(res) = val.parse() {
                config.canonical_resolution = res;
            }
        }

        if let Ok(val) = std::env::var("NORMALIZER_PAD_PIXELS") {
            if let Ok(pad) = val.parse() {
                config.pad_pixels = pad;
            }
        }

        if let Ok(val) = std::env::var("GRID_INTERPOLATION") {
            config.interpolation = InterpolationMethod::parse(&val);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.canonical_resolution.is_finite() && self.canonical_resolution > 0.0) {
            return Err("canonical_resolution must be > 0".to_string());
        }

        // Bilinear reads one neighbour beyond the window
        if self.pad_pixels == 0 {
            return Err("pad_pixels must be >= 1".to_string());
        }

        Ok(())
    }

    /// Kernel to use for a dataset.
    pub fn interpolation_for(&self, profile: &DatasetProfile) -> InterpolationMethod {
        self.interpolation.unwrap_or(profile.interpolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonal_common::Dataset;

    #[test]
    fn test_default_is_valid() {
        let config = NormalizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.canonical_resolution, 0.05);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NormalizerConfig::default();
        config.canonical_resolution = 0.0;
        assert!(config.validate().is_err());

        let mut config = NormalizerConfig::default();
        config.pad_pixels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_wins_over_profile() {
        let mut config = NormalizerConfig::default();
        let profile = Dataset::Era5.profile();
        assert_eq!(config.interpolation_for(&profile), InterpolationMethod::Bilinear);

        config.interpolation = Some(InterpolationMethod::Nearest);
        assert_eq!(config.interpolation_for(&profile), InterpolationMethod::Nearest);
    }
}
