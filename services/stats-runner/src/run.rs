//! Run orchestration: unit selection, bounded workers and per-unit reduction.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use grid_normalizer::{GridNormalizer, NormalizerConfig};
use zonal_common::{
    AdminLevel, BoundingBox, DatasetProfile, Iso3, PolygonZone, RasterGrid, StatisticRecord,
    TimeKey, ZonalError, ZonalResult,
};
use zonal_stats::{
    polygon_metadata, CrossValidator, PolygonMetadata, ZonalEngine, ZoneCoverageIndex, ZoneResult,
};

use crate::config::{PipelineSettings, RunConfig};
use crate::dates::{date_series, missing_units, work_units, WorkUnit, DATE_CHUNK_SIZE};
use crate::sources::{
    PolygonSource, QaEntry, RasterAttrs, RasterSource, ReviewItem, StatsSink, StoredRaster,
};

/// Zones of one admin level.
#[derive(Debug, Clone)]
pub struct LevelZones {
    pub level: AdminLevel,
    pub zones: Vec<PolygonZone>,
}

/// Every loaded level of one country and their combined extent.
#[derive(Debug, Clone)]
pub struct CountryZones {
    pub iso3: Iso3,
    pub levels: Vec<LevelZones>,
    pub bbox: BoundingBox,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub records_written: usize,
    pub no_data_zones: usize,
    pub withheld_records: usize,
    pub flagged_zones: usize,
    pub zone_sets_failed: usize,
    pub metadata_rows: usize,
    pub qa_entries: usize,
    pub retryable_failures: usize,
}

impl RunSummary {
    pub fn has_retryable_failures(&self) -> bool {
        self.retryable_failures > 0
    }

    fn absorb(&mut self, outcome: &UnitOutcome) {
        self.units_total += 1;
        match outcome.failure {
            None => self.units_succeeded += 1,
            Some(retryable) => {
                self.units_failed += 1;
                if retryable {
                    self.retryable_failures += 1;
                }
            }
        }
        self.records_written += outcome.records_written;
        self.no_data_zones += outcome.report.no_data;
        self.withheld_records += outcome.report.withheld;
        self.flagged_zones += outcome.report.flagged;
        self.zone_sets_failed += outcome.report.zone_sets_failed;
    }
}

/// What one unit produced before persistence.
#[derive(Debug, Default)]
struct UnitReport {
    records: Vec<StatisticRecord>,
    review: Vec<ReviewItem>,
    qa: Vec<QaEntry>,
    no_data: usize,
    withheld: usize,
    flagged: usize,
    zone_sets_failed: usize,
}

#[derive(Debug)]
struct UnitOutcome {
    /// `Some(retryable)` when the unit failed.
    failure: Option<bool>,
    records_written: usize,
    report: UnitReport,
}

impl UnitOutcome {
    fn failed(report: UnitReport, retryable: bool) -> Self {
        Self {
            failure: Some(retryable),
            records_written: 0,
            report,
        }
    }
}

/// CPU-bound state shared with blocking tasks.
struct Reduction {
    config: RunConfig,
    profile: DatasetProfile,
    normalizer: GridNormalizer,
    engine: ZonalEngine,
    validator: Option<CrossValidator>,
    index_cache: Mutex<HashMap<(Iso3, AdminLevel), Arc<ZoneCoverageIndex>>>,
}

impl Reduction {
    /// Time key for a loaded raster, checked against the unit it was asked for.
    fn time_key(&self, unit: &WorkUnit, attrs: &RasterAttrs) -> ZonalResult<TimeKey> {
        let valid_date = attrs.valid_date(&self.profile)?;
        if valid_date != unit.valid_date {
            return Err(ZonalError::InvalidTime(format!(
                "raster for {} is dated {}",
                unit.valid_date, valid_date
            )));
        }
        let leadtime = attrs.leadtime(&self.profile)?;
        if leadtime != unit.leadtime {
            return Err(ZonalError::InvalidTime(format!(
                "raster for {} carries leadtime {:?}",
                unit, leadtime
            )));
        }
        match leadtime {
            Some(lt) => TimeKey::forecast_from_leadtime(valid_date, lt),
            None => TimeKey::observation(valid_date, self.config.today),
        }
    }

    fn normalize(&self, grid: &RasterGrid, bbox: &BoundingBox) -> ZonalResult<RasterGrid> {
        let method = self.normalizer.method_for(&self.profile);
        Ok(self.normalizer.normalize_for_zones(grid, bbox, method)?)
    }

    /// Cached index for this zone set, rebuilt when the lattice changes.
    fn index_for(
        &self,
        iso3: &Iso3,
        level: AdminLevel,
        grid: &RasterGrid,
        zones: &[PolygonZone],
    ) -> Arc<ZoneCoverageIndex> {
        let key = (iso3.clone(), level);
        let mut cache = self
            .index_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(index) = cache.get(&key) {
            if index.matches(grid) && index.len() == zones.len() {
                return index.clone();
            }
        }
        let index = Arc::new(self.engine.build_index(grid, zones));
        cache.insert(key, index.clone());
        index
    }

    fn reduce_unit(
        &self,
        unit: &WorkUnit,
        time: &TimeKey,
        grid: &RasterGrid,
        countries: &[CountryZones],
    ) -> UnitReport {
        let dataset = self.config.dataset;
        let mut report = UnitReport::default();

        for country in countries {
            let normalized = match self.normalize(grid, &country.bbox) {
                Ok(normalized) => normalized,
                Err(e) => {
                    warn!(unit = %unit, iso3 = %country.iso3, error = %e, "normalization failed");
                    report.zone_sets_failed += 1;
                    report.qa.push(
                        QaEntry::new(dataset, &e)
                            .for_unit(unit)
                            .for_zones(&country.iso3, None),
                    );
                    continue;
                }
            };

            for level in &country.levels {
                let index = self.index_for(&country.iso3, level.level, &normalized, &level.zones);
                let results = match self.engine.run(
                    &normalized,
                    &level.zones,
                    &index,
                    time,
                    self.config.today,
                ) {
                    Ok(results) => results,
                    Err(e) => {
                        let e = ZonalError::from(e);
                        report.zone_sets_failed += 1;
                        report.qa.push(
                            QaEntry::new(dataset, &e)
                                .for_unit(unit)
                                .for_zones(&country.iso3, Some(level.level)),
                        );
                        continue;
                    }
                };

                for result in &results {
                    match result {
                        ZoneResult::Record(record) => report.records.push(record.clone()),
                        ZoneResult::NoData { .. } => report.no_data += 1,
                        ZoneResult::Withheld { pcode, violation } => {
                            report.withheld += 1;
                            let e = ZonalError::Invariant(violation.clone());
                            let mut entry = QaEntry::new(dataset, &e)
                                .for_unit(unit)
                                .for_zones(&country.iso3, Some(level.level));
                            entry.error = format!("{}: {}", pcode, entry.error);
                            report.qa.push(entry);
                        }
                    }
                }

                if let Some(validator) = &self.validator {
                    let validation = validator.validate(&normalized, &level.zones, &results);
                    report.flagged += validation.flagged_pcodes().len();
                    report
                        .review
                        .extend(validation.flagged().cloned().map(|comparison| ReviewItem {
                            dataset,
                            valid_date: unit.valid_date,
                            leadtime: unit.leadtime,
                            iso3: country.iso3.clone(),
                            adm_level: level.level,
                            comparison,
                        }));
                }
            }
        }
        report
    }

    fn metadata(&self, grid: &RasterGrid, countries: &[CountryZones]) -> (Vec<PolygonMetadata>, Vec<QaEntry>) {
        let dataset = self.config.dataset;
        let mut rows = Vec::new();
        let mut qa = Vec::new();
        for country in countries {
            match self.normalize(grid, &country.bbox) {
                Ok(normalized) => {
                    for level in &country.levels {
                        rows.extend(level.zones.iter().map(|zone| {
                            polygon_metadata(zone, dataset, &grid.transform, &normalized)
                        }));
                    }
                }
                Err(e) => qa.push(QaEntry::new(dataset, &e).for_zones(&country.iso3, None)),
            }
        }
        (rows, qa)
    }
}

/// Drives one dataset through its units.
pub struct StatsRunner {
    settings: PipelineSettings,
    reduction: Arc<Reduction>,
    rasters: Arc<dyn RasterSource>,
    polygons: Arc<dyn PolygonSource>,
    sink: Arc<dyn StatsSink>,
    semaphore: Arc<Semaphore>,
}

impl StatsRunner {
    pub fn new(
        config: RunConfig,
        settings: PipelineSettings,
        normalizer_config: NormalizerConfig,
        rasters: Arc<dyn RasterSource>,
        polygons: Arc<dyn PolygonSource>,
        sink: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        config.validate()?;
        let normalizer =
            GridNormalizer::new(normalizer_config).context("invalid normalizer configuration")?;
        let validator = if config.cross_validate {
            Some(CrossValidator::new(config.crossval_threshold_pct)?)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(config.workers));
        let reduction = Reduction {
            profile: config.dataset.profile(),
            engine: ZonalEngine::new(config.coverage_policy),
            normalizer,
            validator,
            index_cache: Mutex::new(HashMap::new()),
            config,
        };

        Ok(Self {
            settings,
            reduction: Arc::new(reduction),
            rasters,
            polygons,
            sink,
            semaphore,
        })
    }

    fn config(&self) -> &RunConfig {
        &self.reduction.config
    }

    /// Process every selected unit and report counts.
    ///
    /// Only failures to reach the boundary store abort the run; everything
    /// else is recorded in QA and counted.
    #[instrument(skip(self), fields(dataset = %self.config().dataset, mode = %self.config().mode))]
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut qa = Vec::new();

        let countries = Arc::new(
            self.load_zones(&mut qa, &mut summary)
                .await
                .context("failed to load boundaries")?,
        );
        info!(countries = countries.len(), "loaded boundaries");

        if self.config().refresh_metadata {
            summary.metadata_rows = self.refresh_metadata(&countries, &mut qa).await?;
        }

        let units = self.select_units().await.context("failed to select units")?;
        let per_date = self.reduction.profile.leadtimes().len().max(1);
        let chunk_size = DATE_CHUNK_SIZE * per_date;
        let chunks = units.len().div_ceil(chunk_size);
        info!(units = units.len(), chunks, "selected units");

        for (i, chunk) in units.chunks(chunk_size).enumerate() {
            info!(chunk = i + 1, chunks, units = chunk.len(), "processing chunk");
            let outcomes: Vec<UnitOutcome> = stream::iter(chunk.iter().copied())
                .map(|unit| self.process_unit(unit, countries.clone()))
                .buffer_unordered(self.config().workers)
                .collect()
                .await;

            for mut outcome in outcomes {
                summary.absorb(&outcome);
                qa.append(&mut outcome.report.qa);
            }
            self.flush_qa(&mut qa, &mut summary).await;
        }
        self.flush_qa(&mut qa, &mut summary).await;
        self.compact_records(&mut summary).await;

        info!(
            succeeded = summary.units_succeeded,
            failed = summary.units_failed,
            records = summary.records_written,
            withheld = summary.withheld_records,
            flagged = summary.flagged_zones,
            retryable = summary.retryable_failures,
            "run complete"
        );
        Ok(summary)
    }

    async fn compact_records(&self, summary: &mut RunSummary) {
        match self.sink.compact_records(self.config().dataset).await {
            Ok(rows) => debug!(rows, "records compacted"),
            Err(e) => {
                error!(error = %e, "failed to compact records");
                if e.is_retryable() {
                    summary.retryable_failures += 1;
                }
            }
        }
    }

    async fn flush_qa(&self, qa: &mut Vec<QaEntry>, summary: &mut RunSummary) {
        if qa.is_empty() {
            return;
        }
        match self.sink.write_qa(qa).await {
            Ok(()) => summary.qa_entries += qa.len(),
            Err(e) => {
                error!(error = %e, entries = qa.len(), "failed to write QA entries");
                if e.is_retryable() {
                    summary.retryable_failures += 1;
                }
            }
        }
        qa.clear();
    }

    /// Countries and zones for this run. Missing levels become QA entries.
    async fn load_zones(
        &self,
        qa: &mut Vec<QaEntry>,
        summary: &mut RunSummary,
    ) -> ZonalResult<Vec<CountryZones>> {
        let dataset = self.config().dataset;
        let filter = self.settings.country_filter(self.config().test_subset);
        let countries: Vec<_> = self
            .polygons
            .countries()
            .await?
            .into_iter()
            .filter(|c| filter.map_or(true, |f| f.contains(&c.iso3)))
            .collect();

        let mut loaded = Vec::with_capacity(countries.len());
        for country in countries {
            let mut levels = Vec::new();
            for level in AdminLevel::up_to(country.max_adm_level) {
                match self.polygons.zones(&country.iso3, level).await {
                    Ok(zones) if zones.is_empty() => {
                        debug!(iso3 = %country.iso3, level = %level, "no zones");
                    }
                    Ok(zones) => levels.push(LevelZones { level, zones }),
                    Err(e) => {
                        warn!(iso3 = %country.iso3, level = %level, error = %e, "failed to load zones");
                        summary.zone_sets_failed += 1;
                        if e.is_retryable() {
                            summary.retryable_failures += 1;
                        }
                        qa.push(QaEntry::new(dataset, &e).for_zones(&country.iso3, Some(level)));
                    }
                }
            }

            let boxes: Vec<BoundingBox> = levels
                .iter()
                .flat_map(|l| l.zones.iter().filter_map(|z| z.bbox().ok()))
                .collect();
            match BoundingBox::enclosing(&boxes) {
                Some(bbox) => loaded.push(CountryZones {
                    iso3: country.iso3,
                    levels,
                    bbox,
                }),
                None => debug!(iso3 = %country.iso3, "country has no usable zones"),
            }
        }
        Ok(loaded)
    }

    /// Units to process: the newest series date or the configured range,
    /// plus any units of the range missing from the sink on backfill.
    ///
    /// Series dates are issue dates for forecasts, so the newest issuance
    /// brings all of its leadtimes.
    async fn select_units(&self) -> ZonalResult<Vec<WorkUnit>> {
        let config = self.config();
        let dataset = config.dataset;
        let profile = &self.reduction.profile;
        let (start, end) = self.settings.date_range(config.test_subset, config.today);

        let mut units = BTreeSet::new();
        if config.update_latest {
            let available = self.rasters.available(dataset).await?;
            match available.iter().filter_map(WorkUnit::series_date).max() {
                Some(latest) => {
                    info!(date = %latest, "updating newest date");
                    units.extend(work_units(&[latest], profile));
                }
                None => warn!("no rasters available"),
            }
        } else {
            units.extend(work_units(&date_series(start, end, self.settings.frequency), profile));
        }

        if config.backfill {
            let expected = work_units(&date_series(start, end, self.settings.frequency), profile);
            let existing = self.sink.existing_units(dataset).await?;
            let missing = missing_units(&expected, &existing);
            info!(missing = missing.len(), expected = expected.len(), "backfill units");
            units.extend(missing);
        }
        Ok(units.into_iter().collect())
    }

    #[instrument(skip(self, unit, countries), fields(unit = %unit))]
    async fn process_unit(&self, unit: WorkUnit, countries: Arc<Vec<CountryZones>>) -> UnitOutcome {
        let dataset = self.config().dataset;
        let fail = |e: ZonalError| {
            warn!(error = %e, retryable = e.is_retryable(), "unit failed");
            let report = UnitReport {
                qa: vec![QaEntry::new(dataset, &e).for_unit(&unit)],
                ..Default::default()
            };
            UnitOutcome::failed(report, e.is_retryable())
        };

        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return fail(ZonalError::Unavailable("worker pool closed".to_string()));
        };

        let raster: StoredRaster = match self.rasters.load(dataset, &unit).await {
            Ok(raster) => raster,
            Err(e) => return fail(e),
        };
        let time = match self.reduction.time_key(&unit, &raster.attrs) {
            Ok(time) => time,
            Err(e) => return fail(e),
        };

        let reduction = self.reduction.clone();
        let report = match tokio::task::spawn_blocking(move || {
            reduction.reduce_unit(&unit, &time, &raster.grid, &countries)
        })
        .await
        {
            Ok(report) => report,
            Err(e) => return fail(ZonalError::Unavailable(format!("reduction task failed: {}", e))),
        };

        let mut outcome = UnitOutcome {
            failure: None,
            records_written: 0,
            report,
        };

        match self.sink.write_records(dataset, &outcome.report.records).await {
            Ok(written) => outcome.records_written = written,
            Err(e) => {
                warn!(error = %e, "failed to write records");
                outcome.failure = Some(e.is_retryable());
                outcome
                    .report
                    .qa
                    .push(QaEntry::new(dataset, &e).for_unit(&unit));
            }
        }
        if let Err(e) = self.sink.write_review(&outcome.report.review).await {
            warn!(error = %e, "failed to write review items");
            let retryable = e.is_retryable() || outcome.failure == Some(true);
            outcome.failure = Some(retryable);
            outcome
                .report
                .qa
                .push(QaEntry::new(dataset, &e).for_unit(&unit));
        }

        debug!(
            records = outcome.records_written,
            no_data = outcome.report.no_data,
            withheld = outcome.report.withheld,
            "unit done"
        );
        outcome
    }

    /// Polygon metadata from the newest raster's lattice.
    async fn refresh_metadata(
        &self,
        countries: &Arc<Vec<CountryZones>>,
        qa: &mut Vec<QaEntry>,
    ) -> Result<usize> {
        let dataset = self.config().dataset;
        let available = self.rasters.available(dataset).await?;
        let Some(unit) = available.last() else {
            warn!("no raster available for polygon metadata");
            return Ok(0);
        };
        let raster = self
            .rasters
            .load(dataset, unit)
            .await
            .with_context(|| format!("failed to load {} for metadata", unit))?;

        let reduction = self.reduction.clone();
        let countries = countries.clone();
        let (rows, mut failures) =
            tokio::task::spawn_blocking(move || reduction.metadata(&raster.grid, &countries))
                .await
                .context("metadata task failed")?;

        self.sink.write_metadata(&rows).await?;
        qa.append(&mut failures);
        info!(rows = rows.len(), unit = %unit, "polygon metadata refreshed");
        Ok(rows.len())
    }
}
