//! Cross-validation of engine output against the reference methods.

use chrono::NaiveDate;
use test_utils::{
    bbox, block_grid_4x4, dates, precipitation_grid, rect_zone, triangle_zone, with_nodata_at,
};
use zonal_common::{GeoTransform, PolygonZone, RasterGrid, TimeKey};
use zonal_stats::{
    ClippedAreaReference, CoveragePolicy, CrossValidator, ReferenceMethod, ReferenceStats,
    ScanlineCenterReference, ZonalEngine, ZoneResult, DEFAULT_THRESHOLD_PCT,
};

fn observation() -> TimeKey {
    TimeKey::observation(dates::months_2024_h1()[0], dates::today()).unwrap()
}

fn run(engine: ZonalEngine, grid: &RasterGrid, zones: &[PolygonZone]) -> Vec<ZoneResult> {
    engine
        .run_once(grid, zones, &observation(), dates::today())
        .unwrap()
}

/// Reference that always reports the same statistics.
struct FixedReference(ReferenceStats);

impl ReferenceMethod for FixedReference {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn compute(&self, _grid: &RasterGrid, _zone: &PolygonZone) -> Option<ReferenceStats> {
        Some(self.0)
    }
}

// ============================================================================
// Agreement
// ============================================================================

#[test]
fn test_aligned_zones_agree_with_both_references() {
    let grid = block_grid_4x4();
    let zones = vec![
        rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2),
        rect_zone("C", "TST", 1, bbox::CENTER_2X2),
        rect_zone("ALL", "TST", 0, bbox::UNIT_4X4),
    ];
    let validator = CrossValidator::new(DEFAULT_THRESHOLD_PCT).unwrap();

    for policy in [CoveragePolicy::Binary, CoveragePolicy::ExactArea] {
        let results = run(ZonalEngine::new(policy), &grid, &zones);
        let report = validator.validate(&grid, &zones, &results);
        assert_eq!(report.comparisons.len(), zones.len() * 2);
        assert!(report.is_clean(), "{:?}", report.flagged().collect::<Vec<_>>());
        for comparison in &report.comparisons {
            assert!(comparison.max_percent() < 1e-6);
        }
    }
}

#[test]
fn test_repeated_pcodes_are_compared_by_position() {
    let grid = block_grid_4x4();
    // Same pcode, disjoint blocks with different values
    let zones = vec![
        rect_zone("DUP", "TST", 1, bbox::TOP_LEFT_2X2),
        rect_zone("DUP", "TST", 1, (2.0, 0.0, 4.0, 2.0)),
    ];
    let results = run(ZonalEngine::new(CoveragePolicy::Binary), &grid, &zones);
    let report = CrossValidator::new(DEFAULT_THRESHOLD_PCT)
        .unwrap()
        .validate(&grid, &zones, &results);

    assert_eq!(report.comparisons.len(), 4);
    assert!(report.is_clean(), "{:?}", report.flagged().collect::<Vec<_>>());
}

#[test]
fn test_each_engine_policy_matches_its_counterpart() {
    let grid = precipitation_grid(20, 16, GeoTransform::new(40.0, 12.0, 0.5, 0.5));
    let zones = vec![
        triangle_zone("T1", "SOM", 1, 42.3, 4.1, 3.7),
        rect_zone("R1", "SOM", 1, (44.2, 7.3, 49.6, 10.9)),
    ];

    let binary = run(ZonalEngine::new(CoveragePolicy::Binary), &grid, &zones);
    let report = CrossValidator::with_references(1.0, vec![Box::new(ScanlineCenterReference)])
        .unwrap()
        .validate(&grid, &zones, &binary);
    assert!(report.is_clean());
    for comparison in &report.comparisons {
        assert_eq!(
            comparison.reference_count,
            comparison.engine_count.map(|c| c as f64)
        );
    }

    let exact = run(ZonalEngine::new(CoveragePolicy::ExactArea), &grid, &zones);
    let report = CrossValidator::with_references(1.0, vec![Box::new(ClippedAreaReference)])
        .unwrap()
        .validate(&grid, &zones, &exact);
    assert!(report.is_clean());
}

// ============================================================================
// Flagging
// ============================================================================

#[test]
fn test_coverage_disagreement_is_flagged() {
    let grid = block_grid_4x4();
    let zones = vec![triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0)];
    let results = run(ZonalEngine::new(CoveragePolicy::ExactArea), &grid, &zones);

    let report = CrossValidator::new(DEFAULT_THRESHOLD_PCT)
        .unwrap()
        .validate(&grid, &zones, &results);

    // Exact mean 12.25 vs centre-only mean 13 is about 5.9%
    let flagged: Vec<_> = report.flagged().collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].reference, "scanline-center");
    let mean = flagged[0]
        .differences
        .iter()
        .find(|d| d.statistic == "mean")
        .unwrap();
    assert_eq!(mean.reference, 13.0);
    assert!(mean.percent > DEFAULT_THRESHOLD_PCT);

    // Flags never touch the engine output
    assert_eq!(results[0].record().unwrap().stats.mean, 12.25);
}

#[test]
fn test_threshold_controls_flagging() {
    let grid = block_grid_4x4();
    let zones = vec![triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0)];
    let results = run(ZonalEngine::new(CoveragePolicy::ExactArea), &grid, &zones);

    // A single centre pixel has zero spread, so std differs by the 200% maximum
    let strict = CrossValidator::with_references(199.0, vec![Box::new(ScanlineCenterReference)])
        .unwrap()
        .validate(&grid, &zones, &results);
    assert_eq!(strict.flagged_count(), 1);

    let loose = CrossValidator::with_references(200.0, vec![Box::new(ScanlineCenterReference)])
        .unwrap()
        .validate(&grid, &zones, &results);
    assert!(loose.is_clean());
    assert_eq!(loose.threshold_pct, 200.0);
}

#[test]
fn test_engine_no_data_against_reference_values_is_flagged() {
    let grid = with_nodata_at(block_grid_4x4(), &[(0, 0), (1, 0), (0, 1), (1, 1)]);
    let zones = vec![rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2)];
    let results = run(ZonalEngine::default(), &grid, &zones);
    assert!(matches!(results[0], ZoneResult::NoData { .. }));

    let fixed = FixedReference(ReferenceStats {
        mean: 1.0,
        median: 1.0,
        min: 1.0,
        max: 1.0,
        std: 0.0,
        count: 4.0,
    });
    let report = CrossValidator::with_references(DEFAULT_THRESHOLD_PCT, vec![Box::new(fixed)])
        .unwrap()
        .validate(&grid, &zones, &results);
    assert_eq!(report.flagged_count(), 1);
    assert!(report.comparisons[0].note.is_some());

    // Both sides empty is agreement
    let report = CrossValidator::new(DEFAULT_THRESHOLD_PCT)
        .unwrap()
        .validate(&grid, &zones, &results);
    assert!(report.is_clean());
}

#[test]
fn test_withheld_record_is_flagged() {
    let grid = block_grid_4x4();
    let zones = vec![rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2)];
    let future = TimeKey::Observation {
        valid_date: NaiveDate::from_ymd_opt(2031, 1, 1).unwrap(),
    };
    let results = ZonalEngine::default()
        .run_once(&grid, &zones, &future, dates::today())
        .unwrap();

    let report = CrossValidator::new(DEFAULT_THRESHOLD_PCT)
        .unwrap()
        .validate(&grid, &zones, &results);
    assert_eq!(report.flagged_pcodes().into_iter().collect::<Vec<_>>(), vec!["TL"]);
    assert!(report
        .flagged()
        .all(|c| c.note.as_deref().unwrap_or("").starts_with("record withheld")));
}

#[test]
fn test_report_serializes_for_review() {
    let grid = block_grid_4x4();
    let zones = vec![triangle_zone("T", "TST", 1, 0.0, 0.0, 2.0)];
    let results = run(ZonalEngine::new(CoveragePolicy::ExactArea), &grid, &zones);
    let report = CrossValidator::new(DEFAULT_THRESHOLD_PCT)
        .unwrap()
        .validate(&grid, &zones, &results);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["threshold_pct"], 5.0);
    assert_eq!(json["comparisons"].as_array().unwrap().len(), 2);
    assert!(json["comparisons"][0].get("note").is_none());
}
