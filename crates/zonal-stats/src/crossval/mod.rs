//! Cross-validation of engine output against independent reference methods.
//!
//! For every zone the engine produced a result for, each reference method
//! recomputes the statistics from the same grid. Statistics whose relative
//! difference exceeds the threshold flag the zone for review. Nothing is
//! ever corrected automatically.

mod reference;

pub use reference::{ClippedAreaReference, ReferenceMethod, ReferenceStats, ScanlineCenterReference};

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use zonal_common::{PolygonZone, RasterGrid, ZonalStats};

use crate::engine::ZoneResult;
use crate::error::{Result, StatsError};

/// Default review threshold, in percent.
pub const DEFAULT_THRESHOLD_PCT: f64 = 5.0;

/// Absolute differences below this are treated as agreement.
const NOISE_FLOOR: f64 = 1e-9;

/// Symmetric relative difference in percent: `|a - b| / ((|a| + |b|) / 2) * 100`.
///
/// Equal values give 0. Differences under a tiny absolute floor also give 0
/// so values that should both be zero do not blow up. A non-zero difference
/// between values summing to zero magnitude is infinite.
pub fn percent_difference(a: f64, b: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    let diff = (a - b).abs();
    if diff < NOISE_FLOOR {
        return 0.0;
    }
    let scale = (a.abs() + b.abs()) / 2.0;
    if scale == 0.0 {
        return f64::INFINITY;
    }
    diff / scale * 100.0
}

/// One compared statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatDifference {
    pub statistic: String,
    pub engine: f64,
    pub reference: f64,
    pub percent: f64,
}

/// Comparison of one zone against one reference method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneComparison {
    pub pcode: String,
    pub reference: String,
    pub differences: Vec<StatDifference>,
    pub engine_count: Option<u64>,
    pub reference_count: Option<f64>,
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ZoneComparison {
    /// Largest relative difference across compared statistics.
    pub fn max_percent(&self) -> f64 {
        self.differences
            .iter()
            .map(|d| d.percent)
            .fold(0.0, f64::max)
    }
}

/// Outcome of cross-validating one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub threshold_pct: f64,
    pub comparisons: Vec<ZoneComparison>,
}

impl ValidationReport {
    pub fn flagged(&self) -> impl Iterator<Item = &ZoneComparison> {
        self.comparisons.iter().filter(|c| c.flagged)
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged().count()
    }

    /// Zones flagged by at least one reference.
    pub fn flagged_pcodes(&self) -> BTreeSet<&str> {
        self.flagged().map(|c| c.pcode.as_str()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.flagged_count() == 0
    }
}

/// Runs reference methods and compares them against engine results.
pub struct CrossValidator {
    threshold_pct: f64,
    references: Vec<Box<dyn ReferenceMethod>>,
}

impl std::fmt::Debug for CrossValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossValidator")
            .field("threshold_pct", &self.threshold_pct)
            .field(
                "references",
                &self.references.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CrossValidator {
    /// Validator with both built-in reference methods.
    pub fn new(threshold_pct: f64) -> Result<Self> {
        Self::with_references(
            threshold_pct,
            vec![
                Box::new(ScanlineCenterReference),
                Box::new(ClippedAreaReference),
            ],
        )
    }

    pub fn with_references(
        threshold_pct: f64,
        references: Vec<Box<dyn ReferenceMethod>>,
    ) -> Result<Self> {
        if !threshold_pct.is_finite() || threshold_pct <= 0.0 {
            return Err(StatsError::InvalidThreshold(threshold_pct));
        }
        Ok(Self {
            threshold_pct,
            references,
        })
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// Compare engine `results` for `zones` on `grid` against every reference.
    ///
    /// `results` must be in zone order, as returned by the engine. Zones are
    /// paired with results by position, so repeated pcodes stay distinct.
    #[instrument(skip_all, fields(zones = zones.len(), threshold = self.threshold_pct))]
    pub fn validate(
        &self,
        grid: &RasterGrid,
        zones: &[PolygonZone],
        results: &[ZoneResult],
    ) -> ValidationReport {
        if results.len() != zones.len() {
            warn!(
                zones = zones.len(),
                results = results.len(),
                "result count differs from zone count"
            );
        }

        let comparisons: Vec<ZoneComparison> = zones
            .par_iter()
            .zip(results.par_iter())
            .flat_map_iter(|(zone, result)| {
                self.references
                    .iter()
                    .map(move |reference| self.compare(grid, zone, result, reference.as_ref()))
            })
            .collect();

        let report = ValidationReport {
            threshold_pct: self.threshold_pct,
            comparisons,
        };
        if report.is_clean() {
            info!(compared = report.comparisons.len(), "cross-validation clean");
        } else {
            warn!(
                compared = report.comparisons.len(),
                flagged = report.flagged_count(),
                "cross-validation flagged zones for review"
            );
        }
        report
    }

    fn compare(
        &self,
        grid: &RasterGrid,
        zone: &PolygonZone,
        result: &ZoneResult,
        reference: &dyn ReferenceMethod,
    ) -> ZoneComparison {
        let expected = reference.compute(grid, zone);
        let mut comparison = ZoneComparison {
            pcode: zone.pcode.clone(),
            reference: reference.name().to_string(),
            differences: Vec::new(),
            engine_count: result.record().map(|r| r.stats.count),
            reference_count: expected.map(|e| e.count),
            flagged: false,
            note: None,
        };

        match (result, expected) {
            (ZoneResult::Record(record), Some(expected)) => {
                comparison.differences = differences(&record.stats, &expected);
                comparison.flagged = comparison
                    .differences
                    .iter()
                    .any(|d| d.percent > self.threshold_pct);
            }
            (ZoneResult::Record(_), None) => {
                comparison.flagged = true;
                comparison.note = Some("reference found no contributing pixels".to_string());
            }
            (ZoneResult::NoData { .. }, Some(_)) => {
                comparison.flagged = true;
                comparison.note = Some("engine reported no data, reference has values".to_string());
            }
            (ZoneResult::NoData { .. }, None) => {}
            (ZoneResult::Withheld { violation, .. }, _) => {
                comparison.flagged = true;
                comparison.note = Some(format!("record withheld: {violation}"));
            }
        }
        comparison
    }
}

fn differences(engine: &ZonalStats, reference: &ReferenceStats) -> Vec<StatDifference> {
    [
        ("mean", engine.mean, reference.mean),
        ("median", engine.median, reference.median),
        ("min", engine.min, reference.min),
        ("max", engine.max, reference.max),
        ("std", engine.std, reference.std),
    ]
    .into_iter()
    .map(|(statistic, engine, reference)| StatDifference {
        statistic: statistic.to_string(),
        engine,
        reference,
        percent: percent_difference(engine, reference),
    })
    .collect()
}
