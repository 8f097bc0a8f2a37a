//! Collaborators: raster source, polygon source and statistics sink.
//!
//! The runner only talks to the traits. The local implementations read and
//! write JSON under `<data_root>/<mode>/`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;
use zonal_common::{
    AdminLevel, Dataset, DatasetProfile, Frequency, Iso3, PolygonZone, RasterGrid,
    StatisticKey, StatisticRecord, ZonalError, ZonalResult,
};
use zonal_stats::{PolygonMetadata, ZoneComparison};

use crate::dates::WorkUnit;

// ============================================================================
// Stored raster format
// ============================================================================

/// Time attributes stored alongside every raster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterAttrs {
    #[serde(default)]
    pub year_valid: Option<i32>,
    #[serde(default)]
    pub month_valid: Option<u32>,
    /// Day of month; only read for daily datasets.
    #[serde(default)]
    pub date_valid: Option<u32>,
    #[serde(default)]
    pub leadtime: Option<u32>,
}

impl RasterAttrs {
    /// Attributes describing `unit`.
    pub fn for_unit(unit: &WorkUnit) -> Self {
        use chrono::Datelike;
        Self {
            year_valid: Some(unit.valid_date.year()),
            month_valid: Some(unit.valid_date.month()),
            date_valid: Some(unit.valid_date.day()),
            leadtime: unit.leadtime,
        }
    }

    /// Valid date per the dataset's cadence. Monthly products are dated on
    /// the first of the month whatever day they carry.
    pub fn valid_date(&self, profile: &DatasetProfile) -> ZonalResult<NaiveDate> {
        let year = self.year_valid.ok_or_else(|| missing("year_valid"))?;
        let month = self.month_valid.ok_or_else(|| missing("month_valid"))?;
        let day = match profile.frequency {
            Frequency::Monthly => 1,
            Frequency::Daily => self.date_valid.ok_or_else(|| missing("date_valid"))?,
        };
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            ZonalError::InvalidTime(format!("no such date {}-{}-{}", year, month, day))
        })
    }

    /// Leadtime, required for forecast products.
    pub fn leadtime(&self, profile: &DatasetProfile) -> ZonalResult<Option<u32>> {
        if profile.forecast {
            self.leadtime.map(Some).ok_or_else(|| missing("leadtime"))
        } else {
            Ok(None)
        }
    }
}

fn missing(attr: &str) -> ZonalError {
    ZonalError::InvalidGrid(format!("raster is missing attribute '{}'", attr))
}

/// A raster as persisted by the upstream pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRaster {
    pub attrs: RasterAttrs,
    pub grid: RasterGrid,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Rasters addressable by dataset, valid date and leadtime.
#[async_trait]
pub trait RasterSource: Send + Sync {
    /// Every unit with a stored raster, sorted.
    async fn available(&self, dataset: Dataset) -> ZonalResult<Vec<WorkUnit>>;

    /// Fails with `NotFound` when the unit has not been produced upstream.
    async fn load(&self, dataset: Dataset, unit: &WorkUnit) -> ZonalResult<StoredRaster>;
}

/// A country and the deepest admin level with boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryEntry {
    pub iso3: Iso3,
    pub max_adm_level: AdminLevel,
}

/// Zones addressable by ISO3 and admin level.
#[async_trait]
pub trait PolygonSource: Send + Sync {
    async fn countries(&self) -> ZonalResult<Vec<CountryEntry>>;

    /// Validated, simplified zones for one country and level.
    async fn zones(&self, iso3: &Iso3, level: AdminLevel) -> ZonalResult<Vec<PolygonZone>>;
}

/// A failure recorded for later inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub dataset: Dataset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadtime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso3: Option<Iso3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adm_level: Option<AdminLevel>,
    pub error: String,
    pub retryable: bool,
}

impl QaEntry {
    pub fn new(dataset: Dataset, error: &ZonalError) -> Self {
        Self {
            dataset,
            valid_date: None,
            leadtime: None,
            iso3: None,
            adm_level: None,
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    pub fn for_unit(mut self, unit: &WorkUnit) -> Self {
        self.valid_date = Some(unit.valid_date);
        self.leadtime = unit.leadtime;
        self
    }

    pub fn for_zones(mut self, iso3: &Iso3, level: Option<AdminLevel>) -> Self {
        self.iso3 = Some(iso3.clone());
        self.adm_level = level;
        self
    }
}

/// A cross-validation flag awaiting manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub dataset: Dataset,
    pub valid_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadtime: Option<u32>,
    pub iso3: Iso3,
    pub adm_level: AdminLevel,
    #[serde(flatten)]
    pub comparison: ZoneComparison,
}

/// Persistence for records, metadata and QA output.
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// (valid date, leadtime) units already holding records for `dataset`.
    async fn existing_units(&self, dataset: Dataset) -> ZonalResult<BTreeSet<WorkUnit>>;

    /// Store records keyed by (iso3, adm_level, pcode, valid_date, leadtime).
    ///
    /// Every record is checked against the contract first; a single
    /// violation rejects the whole batch. A later write of the same key
    /// replaces the earlier one once `compact_records` has run.
    async fn write_records(&self, dataset: Dataset, records: &[StatisticRecord])
        -> ZonalResult<usize>;

    /// Keep only the latest record per key. Returns the rows kept.
    async fn compact_records(&self, dataset: Dataset) -> ZonalResult<usize>;

    async fn write_metadata(&self, rows: &[PolygonMetadata]) -> ZonalResult<()>;

    async fn write_qa(&self, entries: &[QaEntry]) -> ZonalResult<()>;

    async fn write_review(&self, items: &[ReviewItem]) -> ZonalResult<()>;
}

// ============================================================================
// Local filesystem implementations
// ============================================================================

fn io_error(path: &Path, err: std::io::Error) -> ZonalError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ZonalError::NotFound(path.display().to_string()),
        _ => ZonalError::Unavailable(format!("{}: {}", path.display(), err)),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> ZonalResult<T> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| io_error(path, e))?;
    Ok(serde_json::from_slice(&body)?)
}

/// Rasters stored as `<root>/raster/<dataset>/<YYYY-MM-DD>[_lt<N>].json`.
#[derive(Debug, Clone)]
pub struct LocalRasterStore {
    root: PathBuf,
}

impl LocalRasterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dataset_dir(&self, dataset: Dataset) -> PathBuf {
        self.root.join("raster").join(dataset.as_str())
    }

    pub fn path_for(&self, dataset: Dataset, unit: &WorkUnit) -> PathBuf {
        self.dataset_dir(dataset).join(format!("{}.json", unit))
    }
}

/// Parse a raster file stem back into a unit.
pub fn parse_unit(stem: &str) -> Option<WorkUnit> {
    let (date, leadtime) = match stem.split_once("_lt") {
        Some((date, lt)) => (date, Some(lt.parse().ok()?)),
        None => (stem, None),
    };
    let valid_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(WorkUnit {
        valid_date,
        leadtime,
    })
}

#[async_trait]
impl RasterSource for LocalRasterStore {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn available(&self, dataset: Dataset) -> ZonalResult<Vec<WorkUnit>> {
        let dir = self.dataset_dir(dataset);
        let units = tokio::task::spawn_blocking(move || {
            let mut units: Vec<WorkUnit> = WalkDir::new(&dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                .filter_map(|entry| {
                    let stem = entry.path().file_stem()?.to_str()?.to_string();
                    let unit = parse_unit(&stem);
                    if unit.is_none() {
                        warn!(file = %entry.path().display(), "ignoring unrecognised raster file");
                    }
                    unit
                })
                .collect();
            units.sort();
            units
        })
        .await
        .map_err(|e| ZonalError::Unavailable(format!("raster listing task failed: {}", e)))?;

        debug!(count = units.len(), "listed rasters");
        Ok(units)
    }

    #[instrument(skip(self, unit), fields(unit = %unit))]
    async fn load(&self, dataset: Dataset, unit: &WorkUnit) -> ZonalResult<StoredRaster> {
        let path = self.path_for(dataset, unit);
        let raster: StoredRaster = read_json(&path).await?;
        raster.grid.validate()?;
        Ok(raster)
    }
}

/// Boundaries stored as `<root>/boundaries/<ISO3>/adm<L>.json` with a
/// `countries.json` index.
#[derive(Debug, Clone)]
pub struct LocalBoundaryStore {
    root: PathBuf,
    simplify_tolerance: f64,
}

impl LocalBoundaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            simplify_tolerance: zonal_common::zone::DEFAULT_SIMPLIFY_TOLERANCE,
        }
    }

    pub fn with_simplify_tolerance(mut self, tolerance: f64) -> Self {
        self.simplify_tolerance = tolerance;
        self
    }

    fn boundaries_dir(&self) -> PathBuf {
        self.root.join("boundaries")
    }
}

#[async_trait]
impl PolygonSource for LocalBoundaryStore {
    async fn countries(&self) -> ZonalResult<Vec<CountryEntry>> {
        read_json(&self.boundaries_dir().join("countries.json")).await
    }

    #[instrument(skip(self, iso3, level), fields(iso3 = %iso3, level = %level))]
    async fn zones(&self, iso3: &Iso3, level: AdminLevel) -> ZonalResult<Vec<PolygonZone>> {
        let path = self
            .boundaries_dir()
            .join(iso3.as_str())
            .join(format!("{}.json", level));
        let zones: Vec<PolygonZone> = read_json(&path).await?;

        let mut seen = BTreeSet::new();
        let mut simplified = Vec::with_capacity(zones.len());
        for zone in zones {
            if zone.iso3 != *iso3 || zone.adm_level != level {
                return Err(ZonalError::invalid_geometry(
                    &zone.pcode,
                    format!("stored under {}/{} but tagged {}/{}", iso3, level, zone.iso3, zone.adm_level),
                ));
            }
            if !seen.insert(zone.pcode.clone()) {
                return Err(ZonalError::invalid_geometry(&zone.pcode, "duplicate pcode"));
            }
            zone.validate()?;
            simplified.push(zone.simplified(self.simplify_tolerance));
        }

        debug!(zones = simplified.len(), "loaded zones");
        Ok(simplified)
    }
}

/// JSON-lines outputs under `<root>/`:
/// `stats/<dataset>.jsonl`, `qa.jsonl`, `polygon.jsonl`, `review.jsonl`.
///
/// Records are appended per unit; repeated keys collapse in
/// `compact_records`.
pub struct JsonLinesSink {
    root: PathBuf,
    today: NaiveDate,
    records_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>, today: NaiveDate) -> Self {
        Self {
            root: root.into(),
            today,
            records_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn stats_path(&self, dataset: Dataset) -> PathBuf {
        self.root
            .join("stats")
            .join(format!("{}.jsonl", dataset.as_str()))
    }

    pub fn qa_path(&self) -> PathBuf {
        self.root.join("qa.jsonl")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("polygon.jsonl")
    }

    pub fn review_path(&self) -> PathBuf {
        self.root.join("review.jsonl")
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> ZonalResult<Vec<T>> {
    let body = match tokio::fs::read_to_string(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(ZonalError::from))
        .collect()
}

fn encode_lines<'a, T: Serialize + 'a>(items: impl IntoIterator<Item = &'a T>) -> ZonalResult<String> {
    let mut body = String::new();
    for item in items {
        body.push_str(&serde_json::to_string(item)?);
        body.push('\n');
    }
    Ok(body)
}

async fn ensure_parent(path: &Path) -> ZonalResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

async fn rewrite_lines<'a, T: Serialize + 'a>(
    path: &Path,
    items: impl IntoIterator<Item = &'a T>,
) -> ZonalResult<()> {
    ensure_parent(path).await?;
    let body = encode_lines(items)?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| io_error(path, e))
}

async fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> ZonalResult<()> {
    use tokio::io::AsyncWriteExt;

    if items.is_empty() {
        return Ok(());
    }
    ensure_parent(path).await?;
    let body = encode_lines(items)?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error(path, e))?;
    file.write_all(body.as_bytes())
        .await
        .map_err(|e| io_error(path, e))?;
    file.flush().await.map_err(|e| io_error(path, e))
}

#[async_trait]
impl StatsSink for JsonLinesSink {
    async fn existing_units(&self, dataset: Dataset) -> ZonalResult<BTreeSet<WorkUnit>> {
        let records: Vec<StatisticRecord> = read_lines(&self.stats_path(dataset)).await?;
        Ok(records
            .into_iter()
            .map(|r| WorkUnit {
                valid_date: r.valid_date,
                leadtime: r.leadtime,
            })
            .collect())
    }

    #[instrument(skip(self, dataset, records), fields(dataset = %dataset, records = records.len()))]
    async fn write_records(
        &self,
        dataset: Dataset,
        records: &[StatisticRecord],
    ) -> ZonalResult<usize> {
        for record in records {
            record.validate(self.today)?;
        }
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.records_lock.lock().await;
        append_lines(&self.stats_path(dataset), records).await?;
        Ok(records.len())
    }

    #[instrument(skip(self, dataset), fields(dataset = %dataset))]
    async fn compact_records(&self, dataset: Dataset) -> ZonalResult<usize> {
        let _guard = self.records_lock.lock().await;
        let path = self.stats_path(dataset);
        let stored: Vec<StatisticRecord> = read_lines(&path).await?;
        if stored.is_empty() {
            return Ok(0);
        }
        let total = stored.len();
        // Later lines win
        let latest: BTreeMap<StatisticKey, StatisticRecord> =
            stored.into_iter().map(|r| (r.key(), r)).collect();
        if latest.len() < total {
            rewrite_lines(&path, latest.values()).await?;
            debug!(dropped = total - latest.len(), "collapsed repeated records");
        }
        Ok(latest.len())
    }

    async fn write_metadata(&self, rows: &[PolygonMetadata]) -> ZonalResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let path = self.metadata_path();
        let existing: Vec<PolygonMetadata> = read_lines(&path).await?;
        let key = |m: &PolygonMetadata| (m.dataset.as_str(), m.iso3.clone(), m.adm_level, m.pcode.clone());
        let mut merged: BTreeMap<_, PolygonMetadata> =
            existing.into_iter().map(|m| (key(&m), m)).collect();
        for row in rows {
            merged.insert(key(row), row.clone());
        }
        rewrite_lines(&path, merged.values()).await
    }

    async fn write_qa(&self, entries: &[QaEntry]) -> ZonalResult<()> {
        let _guard = self.write_lock.lock().await;
        append_lines(&self.qa_path(), entries).await
    }

    async fn write_review(&self, items: &[ReviewItem]) -> ZonalResult<()> {
        let _guard = self.write_lock.lock().await;
        append_lines(&self.review_path(), items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!(
            parse_unit("2024-03-01"),
            Some(WorkUnit {
                valid_date: d(2024, 3, 1),
                leadtime: None
            })
        );
        assert_eq!(parse_unit("2024-03-01_lt4").unwrap().leadtime, Some(4));
        assert!(parse_unit("2024-13-01").is_none());
        assert!(parse_unit("latest").is_none());
        assert!(parse_unit("2024-03-01_ltx").is_none());
    }

    #[test]
    fn test_monthly_attrs_use_first_of_month() {
        let attrs = RasterAttrs {
            year_valid: Some(2024),
            month_valid: Some(3),
            date_valid: Some(17),
            leadtime: None,
        };
        assert_eq!(attrs.valid_date(&Dataset::Era5.profile()).unwrap(), d(2024, 3, 1));
        assert_eq!(attrs.valid_date(&Dataset::Floodscan.profile()).unwrap(), d(2024, 3, 17));
    }

    #[test]
    fn test_missing_attrs_are_input_errors() {
        let attrs = RasterAttrs {
            year_valid: Some(2024),
            month_valid: Some(3),
            date_valid: None,
            leadtime: None,
        };
        let err = attrs.valid_date(&Dataset::Imerg.profile()).unwrap_err();
        assert!(err.to_string().contains("date_valid"));
        assert!(!err.is_retryable());

        let err = attrs.leadtime(&Dataset::Seas5.profile()).unwrap_err();
        assert!(err.to_string().contains("leadtime"));
        assert_eq!(attrs.leadtime(&Dataset::Era5.profile()).unwrap(), None);
    }

    #[test]
    fn test_io_error_classification() {
        let path = Path::new("/nowhere.json");
        let not_found = io_error(path, std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(not_found, ZonalError::NotFound(_)));
        assert!(!not_found.is_retryable());

        let denied = io_error(path, std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(denied.is_retryable());
    }

    // ========================================================================
    // JSON-lines sink
    // ========================================================================

    fn record(pcode: &str, valid_date: NaiveDate, mean: f64) -> StatisticRecord {
        StatisticRecord {
            iso3: Iso3::new("SOM").unwrap(),
            adm_level: AdminLevel::new(1).unwrap(),
            pcode: pcode.to_string(),
            valid_date,
            issued_date: None,
            leadtime: None,
            stats: zonal_common::ZonalStats {
                min: mean,
                max: mean,
                mean,
                median: mean,
                std: 0.0,
                sum: mean,
                count: 1,
            },
        }
    }

    #[test]
    fn test_sink_rejects_batch_with_future_observation() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path(), d(2024, 6, 15));
        let batch = vec![
            record("SO11", d(2024, 5, 1), 1.0),
            record("SO12", d(2024, 7, 1), 1.0),
        ];

        let result = tokio_test::block_on(sink.write_records(Dataset::Era5, &batch));
        assert!(result.is_err());
        let existing = tokio_test::block_on(sink.existing_units(Dataset::Era5)).unwrap();
        assert!(existing.is_empty());
    }

    #[test]
    fn test_sink_compaction_keeps_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path(), d(2024, 6, 15));

        let first = vec![
            record("SO11", d(2024, 4, 1), 1.0),
            record("SO12", d(2024, 4, 1), 1.0),
        ];
        tokio_test::block_on(sink.write_records(Dataset::Era5, &first)).unwrap();
        let second = vec![
            record("SO11", d(2024, 4, 1), 2.0),
            record("SO11", d(2024, 5, 1), 2.0),
        ];
        tokio_test::block_on(sink.write_records(Dataset::Era5, &second)).unwrap();

        let existing = tokio_test::block_on(sink.existing_units(Dataset::Era5)).unwrap();
        let dates: Vec<_> = existing.into_iter().map(|u| u.valid_date).collect();
        assert_eq!(dates, vec![d(2024, 4, 1), d(2024, 5, 1)]);

        let path = dir.path().join("stats/era5.jsonl");
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);

        let kept = tokio_test::block_on(sink.compact_records(Dataset::Era5)).unwrap();
        assert_eq!(kept, 3);
        let records: Vec<StatisticRecord> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        let replaced = records
            .iter()
            .find(|r| r.pcode == "SO11" && r.valid_date == d(2024, 4, 1))
            .unwrap();
        assert_eq!(replaced.stats.mean, 2.0);
    }
}
