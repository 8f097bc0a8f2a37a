//! Zonal statistics runner.
//!
//! Normalizes each raster of one dataset onto the canonical grid, reduces it
//! over every configured country's admin zones and persists the records:
//! - Full history, newest raster only, or missing dates only
//! - Optional polygon metadata refresh
//! - Optional cross-validation against reference methods

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use grid_normalizer::NormalizerConfig;
use stats_runner::config::default_workers;
use stats_runner::{
    JsonLinesSink, LocalBoundaryStore, LocalRasterStore, PipelineSettings, RunConfig, RunMode,
    StatsRunner,
};
use zonal_common::Dataset;
use zonal_stats::{CoveragePolicy, DEFAULT_THRESHOLD_PCT};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DatasetArg {
    Seas5,
    Era5,
    Imerg,
    Floodscan,
}

impl From<DatasetArg> for Dataset {
    fn from(arg: DatasetArg) -> Self {
        match arg {
            DatasetArg::Seas5 => Dataset::Seas5,
            DatasetArg::Era5 => Dataset::Era5,
            DatasetArg::Imerg => Dataset::Imerg,
            DatasetArg::Floodscan => Dataset::Floodscan,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Local,
    Dev,
    Prod,
}

impl From<ModeArg> for RunMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Local => RunMode::Local,
            ModeArg::Dev => RunMode::Dev,
            ModeArg::Prod => RunMode::Prod,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoverageArg {
    /// Pixel centre inside the zone
    Binary,
    /// Overlap area over pixel area
    Exact,
}

impl From<CoverageArg> for CoveragePolicy {
    fn from(arg: CoverageArg) -> Self {
        match arg {
            CoverageArg::Binary => CoveragePolicy::Binary,
            CoverageArg::Exact => CoveragePolicy::ExactArea,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "stats-runner")]
#[command(about = "Zonal raster statistics for admin boundaries")]
struct Args {
    /// Dataset to process
    #[arg(value_enum)]
    dataset: DatasetArg,

    /// Storage tree to read and write
    #[arg(long, value_enum, default_value = "local", env = "RUN_MODE")]
    mode: ModeArg,

    /// Run on the reduced test dates and countries
    #[arg(long)]
    test: bool,

    /// Process only the newest date available
    #[arg(long)]
    update_stats: bool,

    /// Recompute per-polygon pixel metadata
    #[arg(long)]
    update_metadata: bool,

    /// Also process dates missing from the stats output
    #[arg(long)]
    backfill: bool,

    /// Root directory holding the <mode>/ trees
    #[arg(long, default_value = "data", env = "DATA_ROOT")]
    data_root: PathBuf,

    /// Directory with <dataset>.yaml pipeline settings
    #[arg(long, default_value = "config/pipelines", env = "PIPELINE_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Units processed concurrently (default: cores - 1)
    #[arg(long, env = "STATS_WORKERS")]
    workers: Option<usize>,

    /// Pixel weighting used for the statistics
    #[arg(long, value_enum, default_value = "binary", env = "COVERAGE_POLICY")]
    coverage: CoverageArg,

    /// Compare against reference methods and write review items
    #[arg(long)]
    cross_validate: bool,

    /// Percent difference that flags a zone for review
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_PCT, env = "CROSSVAL_THRESHOLD_PCT")]
    threshold: f64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::new(
            self.dataset.into(),
            self.data_root.clone(),
            Utc::now().date_naive(),
        );
        config.mode = self.mode.into();
        config.test_subset = self.test;
        config.update_latest = self.update_stats;
        config.backfill = self.backfill;
        config.refresh_metadata = self.update_metadata;
        config.workers = self.workers.unwrap_or_else(default_workers);
        config.coverage_policy = self.coverage.into();
        config.cross_validate = self.cross_validate;
        config.crossval_threshold_pct = self.threshold;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    let config = args.run_config();
    info!(
        dataset = %config.dataset,
        mode = %config.mode,
        test = config.test_subset,
        workers = config.workers,
        coverage = %config.coverage_policy,
        "Starting zonal statistics run"
    );

    let settings = PipelineSettings::load(&args.config_dir, config.dataset)?;
    let normalizer_config = NormalizerConfig::from_env();
    info!(
        canonical_resolution = normalizer_config.canonical_resolution,
        pad_pixels = normalizer_config.pad_pixels,
        "Normalizer configured"
    );

    let rasters = Arc::new(LocalRasterStore::new(config.raster_root()));
    let polygons = Arc::new(LocalBoundaryStore::new(config.output_root()));
    let sink = Arc::new(JsonLinesSink::new(config.output_root(), config.today));

    let runner = StatsRunner::new(config, settings, normalizer_config, rasters, polygons, sink)
        .context("failed to set up runner")?;
    let summary = runner.run().await?;

    info!(summary = ?summary, "Run finished");

    // Input failures are recorded in QA; only collaborator failures warrant a retry
    if summary.has_retryable_failures() {
        bail!(
            "{} retryable failure(s); see QA output",
            summary.retryable_failures
        );
    }
    Ok(())
}
