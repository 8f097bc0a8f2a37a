//! Per-grid zonal engine: coverage, reduction and record validation.

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, instrument, warn};
use zonal_common::{InvariantViolation, PolygonZone, RasterGrid, StatisticRecord, TimeKey};

use crate::coverage::{CoveragePolicy, ZoneCoverageIndex};
use crate::error::{Result, StatsError};
use crate::reducer::{reduce_coverage, ReductionOutcome};

/// What happened to one zone.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneResult {
    /// A record that passed every contract check.
    Record(StatisticRecord),
    /// No valid pixel contributes to the zone.
    NoData { pcode: String },
    /// Statistics were computed but broke the contract; nothing is emitted.
    Withheld {
        pcode: String,
        violation: InvariantViolation,
    },
}

impl ZoneResult {
    pub fn pcode(&self) -> &str {
        match self {
            ZoneResult::Record(record) => &record.pcode,
            ZoneResult::NoData { pcode } | ZoneResult::Withheld { pcode, .. } => pcode,
        }
    }

    pub fn record(&self) -> Option<&StatisticRecord> {
        match self {
            ZoneResult::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Turns a normalized grid and a zone set into validated records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZonalEngine {
    policy: CoveragePolicy,
}

impl ZonalEngine {
    pub fn new(policy: CoveragePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CoveragePolicy {
        self.policy
    }

    /// Coverage index for `zones` on the lattice of `grid`.
    pub fn build_index(&self, grid: &RasterGrid, zones: &[PolygonZone]) -> ZoneCoverageIndex {
        ZoneCoverageIndex::build(grid, zones, self.policy)
    }

    /// Reduce a single zone without an index.
    pub fn reduce_zone(&self, grid: &RasterGrid, zone: &PolygonZone) -> ReductionOutcome {
        let coverage = self.policy.calculator().geometric(grid, zone);
        reduce_coverage(grid, &coverage)
    }

    /// Reduce every zone against `grid` using a prebuilt index.
    ///
    /// Zones are processed in parallel; results come back in zone order.
    #[instrument(skip_all, fields(zones = zones.len(), time = %time, policy = %index.policy()))]
    pub fn run(
        &self,
        grid: &RasterGrid,
        zones: &[PolygonZone],
        index: &ZoneCoverageIndex,
        time: &TimeKey,
        today: NaiveDate,
    ) -> Result<Vec<ZoneResult>> {
        index.ensure_matches(grid)?;
        if index.len() != zones.len() {
            return Err(StatsError::ZoneCountMismatch {
                index: index.len(),
                zones: zones.len(),
            });
        }

        let results: Vec<ZoneResult> = zones
            .par_iter()
            .enumerate()
            .map(|(i, zone)| {
                let outcome = match index.get(i) {
                    Some(coverage) => reduce_coverage(grid, coverage),
                    None => ReductionOutcome::NoData,
                };
                resolve(zone, time, today, outcome)
            })
            .collect();

        debug!(
            records = results.iter().filter(|r| r.record().is_some()).count(),
            "zones reduced"
        );
        Ok(results)
    }

    /// Build an index and run in one go.
    pub fn run_once(
        &self,
        grid: &RasterGrid,
        zones: &[PolygonZone],
        time: &TimeKey,
        today: NaiveDate,
    ) -> Result<Vec<ZoneResult>> {
        let index = self.build_index(grid, zones);
        self.run(grid, zones, &index, time, today)
    }
}

fn resolve(
    zone: &PolygonZone,
    time: &TimeKey,
    today: NaiveDate,
    outcome: ReductionOutcome,
) -> ZoneResult {
    let stats = match outcome {
        ReductionOutcome::Stats(stats) => stats,
        ReductionOutcome::NoData => {
            debug!(pcode = %zone.pcode, "no contributing pixels");
            return ZoneResult::NoData {
                pcode: zone.pcode.clone(),
            };
        }
    };

    let record = StatisticRecord::new(zone, time, stats);
    match record.validate(today) {
        Ok(()) => ZoneResult::Record(record),
        Err(violation) => {
            warn!(pcode = %zone.pcode, error = %violation, "record withheld");
            ZoneResult::Withheld {
                pcode: zone.pcode.clone(),
                violation,
            }
        }
    }
}
