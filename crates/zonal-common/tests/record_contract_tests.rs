//! Integration tests for the statistic record contract.

use chrono::NaiveDate;
use geo::{polygon, MultiPolygon};
use zonal_common::{
    months_between, AdminLevel, BoundingBox, GeoTransform, InvariantViolation, Iso3, PolygonZone,
    RasterGrid, StatisticRecord, TimeKey, ZonalError, ZonalStats,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn zone() -> PolygonZone {
    PolygonZone::new(
        "SO1101",
        Iso3::new("SOM").unwrap(),
        AdminLevel::new(2).unwrap(),
        MultiPolygon::new(vec![polygon![
            (x: 44.0, y: 2.0),
            (x: 45.0, y: 2.0),
            (x: 45.0, y: 3.0),
            (x: 44.0, y: 3.0),
            (x: 44.0, y: 2.0),
        ]]),
    )
    .unwrap()
}

fn stats() -> ZonalStats {
    ZonalStats {
        min: 0.0,
        max: 12.0,
        mean: 4.0,
        median: 3.0,
        std: 2.0,
        sum: 40.0,
        count: 10,
    }
}

// ============================================================================
// Forecast keys
// ============================================================================

#[test]
fn test_forecast_records_satisfy_month_formula() {
    let valid = d(2024, 6, 1);
    for lt in 0..=6 {
        let key = TimeKey::forecast_from_leadtime(valid, lt).unwrap();
        let record = StatisticRecord::new(&zone(), &key, stats());
        assert!(record.validate(d(2020, 1, 1)).is_ok());

        let issued = record.issued_date.unwrap();
        assert!(record.valid_date >= issued);
        assert_eq!(months_between(issued, record.valid_date), lt as i32);
    }
}

#[test]
fn test_leadtime_seven_is_rejected() {
    let err = TimeKey::forecast(d(2024, 1, 1), d(2024, 8, 1)).unwrap_err();
    assert!(matches!(err, ZonalError::LeadtimeOutOfRange(7)));
}

// ============================================================================
// Observation keys
// ============================================================================

#[test]
fn test_observation_record_carries_no_forecast_fields() {
    let today = d(2024, 6, 30);
    let key = TimeKey::observation(d(2024, 6, 1), today).unwrap();
    let record = StatisticRecord::new(&zone(), &key, stats());
    assert_eq!(record.issued_date, None);
    assert_eq!(record.leadtime, None);
    assert!(record.validate(today).is_ok());
}

#[test]
fn test_invalid_stats_surface_as_invariant_errors() {
    let key = TimeKey::observation(d(2024, 6, 1), d(2024, 6, 30)).unwrap();
    let mut bad = stats();
    bad.min = 13.0;
    let record = StatisticRecord::new(&zone(), &key, bad);
    let violation = record.validate(d(2024, 6, 30)).unwrap_err();
    assert!(matches!(violation, InvariantViolation::MinGreaterThanMax { .. }));

    let err: ZonalError = violation.into();
    assert!(!err.is_retryable());
}

// ============================================================================
// Keys and serialization
// ============================================================================

#[test]
fn test_record_key_distinguishes_leadtimes() {
    let valid = d(2024, 6, 1);
    let a = StatisticRecord::new(
        &zone(),
        &TimeKey::forecast_from_leadtime(valid, 0).unwrap(),
        stats(),
    );
    let b = StatisticRecord::new(
        &zone(),
        &TimeKey::forecast_from_leadtime(valid, 1).unwrap(),
        stats(),
    );
    assert_ne!(a.key(), b.key());
}

#[test]
fn test_record_round_trips_through_json() {
    let key = TimeKey::forecast(d(2024, 1, 1), d(2024, 3, 1)).unwrap();
    let record = StatisticRecord::new(&zone(), &key, stats());
    let line = serde_json::to_string(&record).unwrap();
    let back: StatisticRecord = serde_json::from_str(&line).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_grid_json_round_trip_validates() {
    let grid = RasterGrid::new(
        vec![1.0, 2.0, 3.0, 4.0],
        2,
        2,
        GeoTransform::new(44.0, 3.0, 0.5, 0.5),
        Some(-9999.0),
    )
    .unwrap()
    .with_units("mm");
    let json = serde_json::to_string(&grid).unwrap();
    let back: RasterGrid = serde_json::from_str(&json).unwrap();
    assert!(back.validate().is_ok());
    assert_eq!(back.bbox(), BoundingBox::new(44.0, 2.0, 45.0, 3.0));
    assert_eq!(back.units.as_deref(), Some("mm"));
}
