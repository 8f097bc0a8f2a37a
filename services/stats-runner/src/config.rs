//! Run configuration and per-dataset pipeline settings.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use zonal_common::{Dataset, Frequency, Iso3};
use zonal_stats::{CoveragePolicy, DEFAULT_THRESHOLD_PCT};

/// Where the run reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Local,
    Dev,
    Prod,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Local => "local",
            RunMode::Dev => "dev",
            RunMode::Prod => "prod",
        }
    }

    /// Tree rasters are read from. Rasters are never produced locally.
    pub fn raster_mode(&self) -> RunMode {
        match self {
            RunMode::Local => RunMode::Dev,
            other => *other,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(RunMode::Local),
            "dev" => Ok(RunMode::Dev),
            "prod" => Ok(RunMode::Prod),
            other => bail!("unknown run mode '{}' (expected local, dev or prod)", other),
        }
    }
}

/// Everything one run needs, built once and passed down.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset: Dataset,
    pub mode: RunMode,
    /// Restrict dates and countries to the pipeline's test subset.
    pub test_subset: bool,
    /// Process only the newest date in the store (newest issuance for forecasts).
    pub update_latest: bool,
    /// Also process units of the configured range missing from the sink.
    pub backfill: bool,
    /// Recompute polygon metadata before the statistics.
    pub refresh_metadata: bool,
    pub data_root: PathBuf,
    /// Units held in memory at once.
    pub workers: usize,
    pub coverage_policy: CoveragePolicy,
    /// Run the reference methods and write review items.
    pub cross_validate: bool,
    pub crossval_threshold_pct: f64,
    /// Upper bound for observation valid dates.
    pub today: NaiveDate,
}

impl RunConfig {
    pub fn new(dataset: Dataset, data_root: impl Into<PathBuf>, today: NaiveDate) -> Self {
        Self {
            dataset,
            mode: RunMode::default(),
            test_subset: false,
            update_latest: false,
            backfill: false,
            refresh_metadata: false,
            data_root: data_root.into(),
            workers: default_workers(),
            coverage_policy: CoveragePolicy::default(),
            cross_validate: false,
            crossval_threshold_pct: DEFAULT_THRESHOLD_PCT,
            today,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if !(self.crossval_threshold_pct.is_finite() && self.crossval_threshold_pct > 0.0) {
            bail!(
                "cross-validation threshold must be > 0, got {}",
                self.crossval_threshold_pct
            );
        }
        Ok(())
    }

    /// Root for outputs of this mode.
    pub fn output_root(&self) -> PathBuf {
        self.data_root.join(self.mode.as_str())
    }

    /// Root rasters are read from.
    pub fn raster_root(&self) -> PathBuf {
        self.data_root.join(self.mode.raster_mode().as_str())
    }
}

/// One worker per core, leaving one for the runtime.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

// ============================================================================
// Pipeline settings (config/pipelines/<dataset>.yaml)
// ============================================================================

/// Date range and country subset for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub dataset: Dataset,
    /// First series date; issue dates for forecast datasets.
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub frequency: Frequency,
    #[serde(default)]
    pub forecast: bool,
    /// Countries to process; all known countries when absent.
    #[serde(default)]
    pub iso3s: Option<Vec<Iso3>>,
    pub test: TestSettings,
}

/// Reduced run used with `--test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSettings {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub iso3s: Vec<Iso3>,
}

impl PipelineSettings {
    /// Load `<dir>/<dataset>.yaml`.
    pub fn load(dir: impl AsRef<Path>, dataset: Dataset) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.yaml", dataset.as_str()));
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read pipeline settings: {:?}", path))?;
        let settings = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse pipeline settings: {:?}", path))?;
        if settings.dataset != dataset {
            bail!(
                "{:?} describes dataset {}, expected {}",
                path,
                settings.dataset,
                dataset
            );
        }
        Ok(settings)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let profile = self.dataset.profile();
        if self.frequency != profile.frequency {
            bail!(
                "{} is a {:?} dataset, settings say {:?}",
                self.dataset,
                profile.frequency,
                self.frequency
            );
        }
        if self.forecast != profile.forecast {
            bail!(
                "forecast flag for {} must be {}",
                self.dataset,
                profile.forecast
            );
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                bail!("end_date {} precedes start_date {}", end, self.start_date);
            }
        }
        if self.test.end_date < self.test.start_date {
            bail!(
                "test end_date {} precedes start_date {}",
                self.test.end_date,
                self.test.start_date
            );
        }
        Ok(())
    }

    /// Inclusive date range for this run; open ranges end at `today`.
    pub fn date_range(&self, test_subset: bool, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        if test_subset {
            (self.test.start_date, self.test.end_date)
        } else {
            (self.start_date, self.end_date.unwrap_or(today))
        }
    }

    /// Country filter for this run, `None` meaning all.
    pub fn country_filter(&self, test_subset: bool) -> Option<&[Iso3]> {
        if test_subset {
            Some(&self.test.iso3s)
        } else {
            self.iso3s.as_deref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERA5: &str = r#"
dataset: era5
start_date: 1981-01-01
frequency: M
test:
  start_date: 2024-01-01
  end_date: 2024-03-01
  iso3s: [SOM, ETH]
"#;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_settings() {
        let settings = PipelineSettings::from_yaml(ERA5).unwrap();
        assert_eq!(settings.dataset, Dataset::Era5);
        assert_eq!(settings.frequency, Frequency::Monthly);
        assert!(!settings.forecast);
        assert!(settings.iso3s.is_none());
        assert_eq!(settings.test.iso3s.len(), 2);
    }

    #[test]
    fn test_date_range_modes() {
        let settings = PipelineSettings::from_yaml(ERA5).unwrap();
        let today = d(2024, 6, 15);
        assert_eq!(settings.date_range(false, today), (d(1981, 1, 1), today));
        assert_eq!(settings.date_range(true, today), (d(2024, 1, 1), d(2024, 3, 1)));
        assert_eq!(settings.country_filter(true).unwrap()[0].as_str(), "SOM");
        assert!(settings.country_filter(false).is_none());
    }

    #[test]
    fn test_mismatched_profile_rejected() {
        let daily = ERA5.replace("frequency: M", "frequency: D");
        assert!(PipelineSettings::from_yaml(&daily).is_err());

        let forecast = format!("{}forecast: true\n", ERA5);
        assert!(PipelineSettings::from_yaml(&forecast).is_err());
    }

    #[test]
    fn test_bad_iso3_rejected() {
        let bad = ERA5.replace("[SOM, ETH]", "[somalia]");
        assert!(PipelineSettings::from_yaml(&bad).is_err());
    }

    #[test]
    fn test_run_mode_roots() {
        let mut config = RunConfig::new(Dataset::Era5, "/data", d(2024, 6, 15));
        assert_eq!(config.output_root(), PathBuf::from("/data/local"));
        assert_eq!(config.raster_root(), PathBuf::from("/data/dev"));

        config.mode = RunMode::Prod;
        assert_eq!(config.raster_root(), PathBuf::from("/data/prod"));
        assert_eq!("DEV".parse::<RunMode>().unwrap(), RunMode::Dev);
        assert!("staging".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunConfig::new(Dataset::Seas5, "/data", d(2024, 6, 15));
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.crossval_threshold_pct = 0.0;
        assert!(config.validate().is_err());

        // The scheduled run: newest date plus any gaps
        config.crossval_threshold_pct = 5.0;
        config.update_latest = true;
        config.backfill = true;
        assert!(config.validate().is_ok());
    }
}
