//! End-to-end scenarios for the zonal engine on synthetic grids.

use chrono::NaiveDate;
use test_utils::{
    assert_approx_eq, assert_stats_ordered, bbox, block_grid_4x4, constant_grid, dates,
    holed_zone, precipitation_grid, rect_zone, triangle_zone, with_nodata_at,
};
use zonal_common::{GeoTransform, PolygonZone, TimeKey};
use zonal_stats::{CoveragePolicy, ZonalEngine, ZoneResult};

fn observation() -> TimeKey {
    TimeKey::observation(dates::months_2024_h1()[2], dates::today()).unwrap()
}

fn policies() -> [ZonalEngine; 2] {
    [
        ZonalEngine::new(CoveragePolicy::Binary),
        ZonalEngine::new(CoveragePolicy::ExactArea),
    ]
}

/// A spread of zones over a 20x16 grid at 0.5°, origin (40, 12).
fn country_zones() -> Vec<PolygonZone> {
    vec![
        rect_zone("SO01", "SOM", 1, (41.0, 8.0, 44.0, 11.5)),
        rect_zone("SO02", "SOM", 1, (44.2, 7.3, 49.6, 10.9)),
        triangle_zone("SO03", "SOM", 1, 42.3, 4.1, 3.7),
        rect_zone("SO04", "SOM", 2, (45.05, 4.05, 45.45, 4.45)),
        triangle_zone("SO05", "SOM", 2, 46.0, 5.0, 2.25),
    ]
}

fn country_grid() -> zonal_common::RasterGrid {
    precipitation_grid(20, 16, GeoTransform::new(40.0, 12.0, 0.5, 0.5))
}

// ============================================================================
// Known-answer scenarios
// ============================================================================

#[test]
fn test_top_left_block_scenario() {
    let grid = block_grid_4x4();
    let zones = vec![rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2)];

    for engine in policies() {
        let results = engine
            .run_once(&grid, &zones, &observation(), dates::today())
            .unwrap();
        let record = results[0].record().expect("record");
        assert_eq!(record.stats.mean, 3.5);
        assert_eq!(record.stats.count, 4);
        assert_eq!(record.stats.min, 1.0);
        assert_eq!(record.stats.max, 6.0);
        assert_eq!(record.stats.median, 3.5);
        assert_eq!(record.pcode, "TL");
        assert_eq!(record.valid_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert!(record.leadtime.is_none());
    }
}

#[test]
fn test_zone_over_nodata_gives_no_data() {
    let grid = with_nodata_at(block_grid_4x4(), &[(0, 0), (1, 0), (0, 1), (1, 1)]);
    let zones = vec![
        rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2),
        rect_zone("C", "TST", 1, bbox::CENTER_2X2),
    ];

    for engine in policies() {
        let results = engine
            .run_once(&grid, &zones, &observation(), dates::today())
            .unwrap();
        assert_eq!(
            results[0],
            ZoneResult::NoData {
                pcode: "TL".to_string()
            }
        );
        // Centre block keeps pixels 7, 10 and 11 once pixel 6 is masked
        let stats = &results[1].record().unwrap().stats;
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 7.0);
    }
}

#[test]
fn test_zone_outside_grid_gives_no_data() {
    let grid = block_grid_4x4();
    let zones = vec![rect_zone("OUT", "TST", 1, bbox::OUTSIDE)];
    let results = ZonalEngine::default()
        .run_once(&grid, &zones, &observation(), dates::today())
        .unwrap();
    assert!(matches!(results[0], ZoneResult::NoData { .. }));
}

#[test]
fn test_holed_zone_excludes_hole() {
    let grid = block_grid_4x4();
    let zones = vec![holed_zone("H", "TST", 0)];
    for engine in policies() {
        let results = engine
            .run_once(&grid, &zones, &observation(), dates::today())
            .unwrap();
        let stats = &results[0].record().unwrap().stats;
        // Hole removes 6, 7, 10 and 11 from 1..=16
        assert_approx_eq!(stats.sum, 136.0 - 34.0, 1e-9);
        assert_approx_eq!(stats.mean, 102.0 / 12.0, 1e-9);
    }
}

#[test]
fn test_constant_field_reduces_exactly() {
    let grid = constant_grid(20, 16, GeoTransform::new(40.0, 12.0, 0.5, 0.5), 0.3);
    for engine in policies() {
        let results = engine
            .run_once(&grid, &country_zones(), &observation(), dates::today())
            .unwrap();
        for result in &results {
            let stats = &result.record().unwrap().stats;
            assert_eq!(stats.mean, 0.3f32 as f64, "zone {}", result.pcode());
            assert_eq!(stats.median, 0.3f32 as f64);
            assert_eq!(stats.std, 0.0);
        }
    }
}

#[test]
fn test_forecast_records_carry_leadtime() {
    let grid = block_grid_4x4();
    let zones = vec![rect_zone("TL", "TST", 1, bbox::TOP_LEFT_2X2)];
    let valid = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
    let time = TimeKey::forecast_from_leadtime(valid, 3).unwrap();

    let results = ZonalEngine::default()
        .run_once(&grid, &zones, &time, dates::today())
        .unwrap();
    let record = results[0].record().unwrap();
    assert_eq!(record.leadtime, Some(3));
    assert_eq!(record.issued_date, NaiveDate::from_ymd_opt(2024, 6, 1));
    assert_eq!(record.valid_date, valid);
}

// ============================================================================
// Determinism and contract properties
// ============================================================================

#[test]
fn test_repeated_runs_are_bit_identical() {
    let grid = country_grid();
    let zones = country_zones();

    for engine in policies() {
        let index = engine.build_index(&grid, &zones);
        let first = engine
            .run(&grid, &zones, &index, &observation(), dates::today())
            .unwrap();
        let second = engine
            .run_once(&grid, &zones, &observation(), dates::today())
            .unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            let (a, b) = (&a.record().unwrap().stats, &b.record().unwrap().stats);
            assert_eq!(a.mean.to_bits(), b.mean.to_bits());
            assert_eq!(a.median.to_bits(), b.median.to_bits());
            assert_eq!(a.std.to_bits(), b.std.to_bits());
            assert_eq!(a.sum.to_bits(), b.sum.to_bits());
            assert_eq!(a.count, b.count);
        }
    }
}

#[test]
fn test_every_record_honours_ordering() {
    let grid = country_grid();
    let zones = country_zones();
    for engine in policies() {
        let results = engine
            .run_once(&grid, &zones, &observation(), dates::today())
            .unwrap();
        assert_eq!(results.len(), zones.len());
        for result in &results {
            let record = result.record().expect("every zone overlaps the grid");
            assert_stats_ordered!(record.stats);
            assert!(record.stats.count > 0);
            assert!(record.validate(dates::today()).is_ok());
        }
    }
}

#[test]
fn test_index_is_reused_across_dates() {
    let grid = country_grid();
    let zones = country_zones();
    let engine = ZonalEngine::new(CoveragePolicy::ExactArea);
    let index = engine.build_index(&grid, &zones);

    for date in dates::months_2024_h1() {
        let time = TimeKey::observation(date, dates::today()).unwrap();
        let results = engine
            .run(&grid, &zones, &index, &time, dates::today())
            .unwrap();
        assert!(results.iter().all(|r| r.record().map(|r| r.valid_date) == Some(date)));
    }
}

#[test]
fn test_exact_area_weights_partial_pixels() {
    let grid = block_grid_4x4();
    // Half of pixel 1 (value 1) and all of pixel 2 (value 2)
    let zones = vec![rect_zone("P", "TST", 1, (0.5, 3.0, 2.0, 4.0))];

    let exact = ZonalEngine::new(CoveragePolicy::ExactArea)
        .run_once(&grid, &zones, &observation(), dates::today())
        .unwrap();
    let stats = &exact[0].record().unwrap().stats;
    assert_approx_eq!(stats.mean, (0.5 * 1.0 + 2.0) / 1.5, 1e-12);
    assert_eq!(stats.count, 2);

    let binary = ZonalEngine::new(CoveragePolicy::Binary)
        .run_once(&grid, &zones, &observation(), dates::today())
        .unwrap();
    // Pixel 1's centre sits on the zone edge, so only pixel 2 counts
    let stats = &binary[0].record().unwrap().stats;
    assert_eq!(stats.mean, 2.0);
    assert_eq!(stats.count, 1);
}
