//! Date series, backfill gaps and work units.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use zonal_common::{shift_months, DatasetProfile, Frequency};

/// Dates handed to the worker pool per batch.
pub const DATE_CHUNK_SIZE: usize = 100;

/// Valid dates from `start` to `end` inclusive, sorted and unique.
///
/// Monthly series contain the first day of each month on or after `start`.
pub fn date_series(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    match frequency {
        Frequency::Daily => {
            let mut date = start;
            while date <= end {
                dates.push(date);
                match date.succ_opt() {
                    Some(next) => date = next,
                    None => break,
                }
            }
        }
        Frequency::Monthly => {
            let first = NaiveDate::from_ymd_opt(start.year(), start.month(), 1);
            let mut date = match first {
                Some(first) if first < start => shift_months(first, 1),
                other => other,
            };
            while let Some(d) = date {
                if d > end {
                    break;
                }
                dates.push(d);
                date = shift_months(d, 1);
            }
        }
    }
    dates
}

/// Units of `expected` not present in `existing`, in order.
pub fn missing_units(expected: &[WorkUnit], existing: &BTreeSet<WorkUnit>) -> Vec<WorkUnit> {
    expected
        .iter()
        .filter(|u| !existing.contains(u))
        .copied()
        .collect()
}

/// One raster's worth of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkUnit {
    pub valid_date: NaiveDate,
    pub leadtime: Option<u32>,
}

impl WorkUnit {
    /// Date this unit belongs to in the dataset's series: the issue date for
    /// forecasts, the valid date otherwise.
    pub fn series_date(&self) -> Option<NaiveDate> {
        match self.leadtime {
            Some(lt) => shift_months(self.valid_date, -(lt as i32)),
            None => Some(self.valid_date),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.leadtime {
            Some(lt) => write!(f, "{}_lt{}", self.valid_date, lt),
            None => write!(f, "{}", self.valid_date),
        }
    }
}

/// Expand series dates into units.
///
/// For forecast datasets the dates are issue dates and each expands to one
/// unit per leadtime, valid `leadtime` months later.
pub fn work_units(dates: &[NaiveDate], profile: &DatasetProfile) -> Vec<WorkUnit> {
    let leadtimes = profile.leadtimes();
    if leadtimes.is_empty() {
        return dates
            .iter()
            .map(|&valid_date| WorkUnit {
                valid_date,
                leadtime: None,
            })
            .collect();
    }
    dates
        .iter()
        .flat_map(|&issued| {
            leadtimes.iter().filter_map(move |&lt| {
                shift_months(issued, lt as i32).map(|valid_date| WorkUnit {
                    valid_date,
                    leadtime: Some(lt),
                })
            })
        })
        .collect()
}
