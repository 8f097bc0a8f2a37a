//! Common test fixtures.
//!
//! Pre-defined extents, dates and an on-disk data root for collaborator tests.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Common bounding box definitions for testing, as (min_x, min_y, max_x, max_y).
pub mod bbox {
    /// The 4x4 scenario grid extent
    pub const UNIT_4X4: (f64, f64, f64, f64) = (0.0, 0.0, 4.0, 4.0);

    /// Top-left 2x2 block of the 4x4 grid
    pub const TOP_LEFT_2X2: (f64, f64, f64, f64) = (0.0, 2.0, 2.0, 4.0);

    /// Interior 2x2 block of the 4x4 grid
    pub const CENTER_2X2: (f64, f64, f64, f64) = (1.0, 1.0, 3.0, 3.0);

    /// Entirely outside the 4x4 grid
    pub const OUTSIDE: (f64, f64, f64, f64) = (10.0, 10.0, 11.0, 11.0);

    /// Rough extent of Somalia
    pub const SOMALIA: (f64, f64, f64, f64) = (40.9, -1.7, 51.5, 12.0);
}

/// Common dates for testing.
pub mod dates {
    use chrono::NaiveDate;

    /// A fixed "today" so future-date checks are deterministic.
    pub fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).expect("valid date")
    }

    /// Month-start valid dates for the first half of 2024.
    pub fn months_2024_h1() -> Vec<NaiveDate> {
        (1..=6)
            .map(|m| NaiveDate::from_ymd_opt(2024, m, 1).expect("valid date"))
            .collect()
    }
}

/// A temporary directory laid out like a pipeline data root.
///
/// The directory is removed when the value is dropped.
pub struct TempDataRoot {
    dir: tempfile::TempDir,
}

impl TempDataRoot {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Serialize `value` as JSON at `relative`, creating parent directories.
    pub fn write_json<T: Serialize>(&self, relative: impl AsRef<Path>, value: &T) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        let body = serde_json::to_vec_pretty(value).expect("serialize fixture");
        std::fs::write(&path, body).expect("write fixture");
        path
    }

    /// Read every line of a JSON-lines file under the root.
    pub fn read_lines(&self, relative: impl AsRef<Path>) -> Vec<serde_json::Value> {
        let path = self.dir.path().join(relative);
        let Ok(body) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        body.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("valid JSON line"))
            .collect()
    }
}

impl Default for TempDataRoot {
    fn default() -> Self {
        Self::new()
    }
}
