//! Administrative boundary zones.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BoundingRect, LineString, MultiPolygon, SimplifyVwPreserve};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoundingBox, ZonalError, ZonalResult};

/// Default simplification tolerance (degrees) applied before aggregation.
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.001;

/// Three upper-case ASCII letters (`^[A-Z]{3}$`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iso3(String);

impl Iso3 {
    pub fn new(code: impl Into<String>) -> ZonalResult<Self> {
        let code = code.into();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(ZonalError::InvalidIso3(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Iso3 {
    type Error = ZonalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Iso3::new(value)
    }
}

impl From<Iso3> for String {
    fn from(value: Iso3) -> Self {
        value.0
    }
}

impl fmt::Display for Iso3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Administrative nesting level, 0 (national) through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct AdminLevel(u8);

impl AdminLevel {
    pub const MAX: u8 = 4;

    pub fn new(level: u8) -> ZonalResult<Self> {
        if level <= Self::MAX {
            Ok(Self(level))
        } else {
            Err(ZonalError::InvalidAdminLevel(level as i64))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// All levels from 0 up to and including `max`.
    pub fn up_to(max: AdminLevel) -> impl Iterator<Item = AdminLevel> {
        (0..=max.0).map(AdminLevel)
    }
}

impl TryFrom<u8> for AdminLevel {
    type Error = ZonalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        AdminLevel::new(value)
    }
}

impl From<AdminLevel> for u8 {
    fn from(value: AdminLevel) -> Self {
        value.0
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adm{}", self.0)
    }
}

/// One administrative unit: identity plus planar (multi)polygon geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolygonZone {
    pub pcode: String,
    pub iso3: Iso3,
    pub adm_level: AdminLevel,
    #[serde(default)]
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl PolygonZone {
    /// Create a zone, rejecting invalid geometry.
    pub fn new(
        pcode: impl Into<String>,
        iso3: Iso3,
        adm_level: AdminLevel,
        geometry: MultiPolygon<f64>,
    ) -> ZonalResult<Self> {
        let zone = Self {
            pcode: pcode.into(),
            iso3,
            adm_level,
            name: None,
            geometry,
        };
        zone.validate()?;
        Ok(zone)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bounding box of the geometry.
    pub fn bbox(&self) -> ZonalResult<BoundingBox> {
        self.geometry
            .bounding_rect()
            .map(BoundingBox::from)
            .ok_or_else(|| ZonalError::invalid_geometry(&self.pcode, "empty geometry"))
    }

    /// Planar area in squared coordinate units.
    pub fn planar_area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Check that the geometry can be aggregated over.
    pub fn validate(&self) -> ZonalResult<()> {
        if self.geometry.0.is_empty() {
            return Err(ZonalError::invalid_geometry(&self.pcode, "empty geometry"));
        }
        for polygon in &self.geometry.0 {
            check_ring(&self.pcode, polygon.exterior())?;
            if has_self_intersection(polygon.exterior()) {
                return Err(ZonalError::invalid_geometry(
                    &self.pcode,
                    "exterior ring self-intersects",
                ));
            }
            for hole in polygon.interiors() {
                check_ring(&self.pcode, hole)?;
            }
        }
        if !(self.planar_area() > 0.0) {
            return Err(ZonalError::invalid_geometry(&self.pcode, "zero area"));
        }
        Ok(())
    }

    /// Topology-preserving simplification with a bounded tolerance.
    ///
    /// Visvalingam-Whyatt works on triangle areas, so the threshold is
    /// `tolerance²`. Rings never collapse or cross each other.
    pub fn simplified(&self, tolerance: f64) -> PolygonZone {
        let epsilon = tolerance * tolerance;
        PolygonZone {
            geometry: self.geometry.simplify_vw_preserve(&epsilon),
            ..self.clone()
        }
    }
}

fn check_ring(pcode: &str, ring: &LineString<f64>) -> ZonalResult<()> {
    if ring.0.len() < 4 {
        return Err(ZonalError::invalid_geometry(
            pcode,
            format!("ring has {} coordinates, need at least 4", ring.0.len()),
        ));
    }
    if !ring.is_closed() {
        return Err(ZonalError::invalid_geometry(pcode, "ring is not closed"));
    }
    if ring.0.iter().any(|c| !(c.x.is_finite() && c.y.is_finite())) {
        return Err(ZonalError::invalid_geometry(pcode, "non-finite coordinate"));
    }
    Ok(())
}

/// Brute-force segment test. Rings are checked once when boundaries load.
fn has_self_intersection(ring: &LineString<f64>) -> bool {
    let segments: Vec<_> = ring.lines().collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::Collinear { intersection }) => {
                    // Neighbours may share their joint, never a stretch of edge.
                    if !adjacent || intersection.start != intersection.end {
                        return true;
                    }
                }
                Some(LineIntersection::SinglePoint { .. }) => {
                    if !adjacent {
                        return true;
                    }
                }
            }
        }
    }
    false
}
