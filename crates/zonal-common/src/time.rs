//! Valid dates, issued dates and forecast leadtimes.
//!
//! Leadtime is calendar-month arithmetic: `12 * Δyear + Δmonth`, day of month
//! ignored. Storage checks this formula bit for bit, so it is never derived
//! from elapsed days.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{ZonalError, ZonalResult};

/// Longest leadtime (in months) a forecast record may carry.
pub const MAX_LEADTIME: i32 = 6;

/// Whole calendar months from `issued` to `valid`, ignoring day of month.
pub fn months_between(issued: NaiveDate, valid: NaiveDate) -> i32 {
    12 * (valid.year() - issued.year()) + (valid.month() as i32 - issued.month() as i32)
}

/// Move a date by a signed number of calendar months (day clamped to month end).
pub fn shift_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    let delta = Months::new(months.unsigned_abs());
    if months >= 0 {
        date.checked_add_months(delta)
    } else {
        date.checked_sub_months(delta)
    }
}

/// Temporal key attached to every statistic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TimeKey {
    /// Instantaneous observational field.
    Observation { valid_date: NaiveDate },
    /// Forecast ensemble member addressed by issue date and leadtime.
    Forecast {
        issued_date: NaiveDate,
        valid_date: NaiveDate,
        leadtime: u32,
    },
}

impl TimeKey {
    /// Observation key; `valid_date` may not be after `today`.
    pub fn observation(valid_date: NaiveDate, today: NaiveDate) -> ZonalResult<Self> {
        if valid_date > today {
            return Err(ZonalError::InvalidTime(format!(
                "valid_date {} is in the future (today is {})",
                valid_date, today
            )));
        }
        Ok(TimeKey::Observation { valid_date })
    }

    /// Forecast key from issue and valid dates; the leadtime is derived.
    pub fn forecast(issued_date: NaiveDate, valid_date: NaiveDate) -> ZonalResult<Self> {
        if valid_date < issued_date {
            return Err(ZonalError::InvalidTime(format!(
                "valid_date {} precedes issued_date {}",
                valid_date, issued_date
            )));
        }
        let leadtime = months_between(issued_date, valid_date);
        if !(0..=MAX_LEADTIME).contains(&leadtime) {
            return Err(ZonalError::LeadtimeOutOfRange(leadtime));
        }
        Ok(TimeKey::Forecast {
            issued_date,
            valid_date,
            leadtime: leadtime as u32,
        })
    }

    /// Forecast key for a raster addressed by valid date and leadtime.
    /// The issue date is the valid date moved back `leadtime` months.
    pub fn forecast_from_leadtime(valid_date: NaiveDate, leadtime: u32) -> ZonalResult<Self> {
        if leadtime as i32 > MAX_LEADTIME {
            return Err(ZonalError::LeadtimeOutOfRange(leadtime as i32));
        }
        let issued_date = shift_months(valid_date, -(leadtime as i32)).ok_or_else(|| {
            ZonalError::InvalidTime(format!(
                "cannot shift {} back by {} months",
                valid_date, leadtime
            ))
        })?;
        Self::forecast(issued_date, valid_date)
    }

    pub fn valid_date(&self) -> NaiveDate {
        match self {
            TimeKey::Observation { valid_date } | TimeKey::Forecast { valid_date, .. } => {
                *valid_date
            }
        }
    }

    pub fn issued_date(&self) -> Option<NaiveDate> {
        match self {
            TimeKey::Observation { .. } => None,
            TimeKey::Forecast { issued_date, .. } => Some(*issued_date),
        }
    }

    pub fn leadtime(&self) -> Option<u32> {
        match self {
            TimeKey::Observation { .. } => None,
            TimeKey::Forecast { leadtime, .. } => Some(*leadtime),
        }
    }
}

impl std::fmt::Display for TimeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeKey::Observation { valid_date } => write!(f, "{}", valid_date),
            TimeKey::Forecast {
                issued_date,
                valid_date,
                leadtime,
            } => write!(f, "{} (issued {}, lt{})", valid_date, issued_date, leadtime),
        }
    }
}
