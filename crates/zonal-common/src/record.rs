//! Statistic records and the acceptance contract they must satisfy.
//!
//! A record is only ever handed to a sink after [`StatisticRecord::validate`]
//! has passed. Values are never clamped into range; a record that breaks the
//! contract is withheld.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{months_between, AdminLevel, Iso3, PolygonZone, TimeKey, MAX_LEADTIME};

/// The reduced statistic set for one zone/time/leadtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonalStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    /// Coverage-weighted sum of values.
    pub sum: f64,
    /// Contributing (non-nodata, covered) pixels.
    pub count: u64,
}

impl ZonalStats {
    /// Check the numeric part of the contract.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (name, v) in [
            ("min", self.min),
            ("max", self.max),
            ("mean", self.mean),
            ("median", self.median),
            ("std", self.std),
            ("sum", self.sum),
        ] {
            if !v.is_finite() {
                return Err(InvariantViolation::NonFinite { field: name });
            }
        }
        if self.min > self.max {
            return Err(InvariantViolation::MinGreaterThanMax {
                min: self.min,
                max: self.max,
            });
        }
        if self.mean < self.min || self.mean > self.max {
            return Err(InvariantViolation::MeanOutOfRange {
                mean: self.mean,
                min: self.min,
                max: self.max,
            });
        }
        if self.median < self.min || self.median > self.max {
            return Err(InvariantViolation::MedianOutOfRange {
                median: self.median,
                min: self.min,
                max: self.max,
            });
        }
        if self.std < 0.0 {
            return Err(InvariantViolation::NegativeStd(self.std));
        }
        Ok(())
    }
}

/// A broken acceptance rule. Each variant names the rule it failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("{field} is not finite")]
    NonFinite { field: &'static str },

    #[error("min {min} > max {max}")]
    MinGreaterThanMax { min: f64, max: f64 },

    #[error("mean {mean} outside [{min}, {max}]")]
    MeanOutOfRange { mean: f64, min: f64, max: f64 },

    #[error("median {median} outside [{min}, {max}]")]
    MedianOutOfRange { median: f64, min: f64, max: f64 },

    #[error("negative std {0}")]
    NegativeStd(f64),

    #[error("valid_date {valid_date} is after {today}")]
    FutureValidDate { valid_date: NaiveDate, today: NaiveDate },

    #[error("issued_date and leadtime must be given together")]
    PartialForecastKey,

    #[error("valid_date {valid_date} precedes issued_date {issued_date}")]
    ValidBeforeIssued {
        issued_date: NaiveDate,
        valid_date: NaiveDate,
    },

    #[error("leadtime {0} outside [0, 6]")]
    LeadtimeRange(u32),

    #[error("leadtime {stored} does not match month difference {expected}")]
    LeadtimeMismatch { stored: u32, expected: i32 },
}

/// Unique identity of a record in the persisted set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatisticKey {
    pub iso3: Iso3,
    pub adm_level: AdminLevel,
    pub pcode: String,
    pub valid_date: NaiveDate,
    pub leadtime: Option<u32>,
}

/// One output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub iso3: Iso3,
    pub adm_level: AdminLevel,
    pub pcode: String,
    pub valid_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadtime: Option<u32>,
    #[serde(flatten)]
    pub stats: ZonalStats,
}

impl StatisticRecord {
    pub fn new(zone: &PolygonZone, time: &TimeKey, stats: ZonalStats) -> Self {
        Self {
            iso3: zone.iso3.clone(),
            adm_level: zone.adm_level,
            pcode: zone.pcode.clone(),
            valid_date: time.valid_date(),
            issued_date: time.issued_date(),
            leadtime: time.leadtime(),
            stats,
        }
    }

    pub fn key(&self) -> StatisticKey {
        StatisticKey {
            iso3: self.iso3.clone(),
            adm_level: self.adm_level,
            pcode: self.pcode.clone(),
            valid_date: self.valid_date,
            leadtime: self.leadtime,
        }
    }

    /// Enforce the full record contract relative to `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<(), InvariantViolation> {
        self.stats.check_invariants()?;

        match (self.issued_date, self.leadtime) {
            (None, None) => {
                if self.valid_date > today {
                    return Err(InvariantViolation::FutureValidDate {
                        valid_date: self.valid_date,
                        today,
                    });
                }
            }
            (Some(issued_date), Some(leadtime)) => {
                if self.valid_date < issued_date {
                    return Err(InvariantViolation::ValidBeforeIssued {
                        issued_date,
                        valid_date: self.valid_date,
                    });
                }
                if leadtime > MAX_LEADTIME as u32 {
                    return Err(InvariantViolation::LeadtimeRange(leadtime));
                }
                let expected = months_between(issued_date, self.valid_date);
                if expected != leadtime as i32 {
                    return Err(InvariantViolation::LeadtimeMismatch {
                        stored: leadtime,
                        expected,
                    });
                }
            }
            _ => return Err(InvariantViolation::PartialForecastKey),
        }
        Ok(())
    }
}
