//! # Fixed-point coordinates and short-range projection
//!
//! All coordinates in the engine are stored as integer microdegrees.
//! Floating point only appears at the boundary (request parsing, geometry
//! output) and inside the equirectangular projection used for snapping,
//! which is accurate over the sub-kilometer distances it is applied to.

use geo::{Coord, coord};

/// Fixed-point precision: six decimal degrees.
pub const COORDINATE_PRECISION: i32 = 1_000_000;

const METERS_PER_DEGREE_LAT: f64 = 111_132.954;

/// A latitude/longitude pair in integer microdegrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixedCoordinate {
    pub lat: i32,
    pub lon: i32,
}

impl FixedCoordinate {
    pub const fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// The sentinel value used for "no coordinate" in intermediate records.
    pub const fn sentinel() -> Self {
        Self {
            lat: i32::MAX,
            lon: i32::MAX,
        }
    }

    pub const fn is_sentinel(&self) -> bool {
        self.lat == i32::MAX && self.lon == i32::MAX
    }

    /// Range check: lat within ±90°, lon within ±180° (inclusive).
    pub const fn is_valid(&self) -> bool {
        self.lat >= -90 * COORDINATE_PRECISION
            && self.lat <= 90 * COORDINATE_PRECISION
            && self.lon >= -180 * COORDINATE_PRECISION
            && self.lon <= 180 * COORDINATE_PRECISION
    }

    /// Converts to a degree-space coordinate (x = lon, y = lat).
    pub fn to_degrees(self) -> Coord<f64> {
        coord! {
            x: f64::from(self.lon) / f64::from(COORDINATE_PRECISION),
            y: f64::from(self.lat) / f64::from(COORDINATE_PRECISION),
        }
    }

    pub fn from_degrees(c: Coord<f64>) -> Self {
        Self::from_lat_lon_degrees(c.y, c.x)
    }

    pub fn from_lat_lon_degrees(lat: f64, lon: f64) -> Self {
        Self {
            lat: (lat * f64::from(COORDINATE_PRECISION)).round() as i32,
            lon: (lon * f64::from(COORDINATE_PRECISION)).round() as i32,
        }
    }
}

/// Equirectangular projection centered on a reference coordinate.
///
/// Snapping only ever compares distances within a few hundred meters of the
/// query point, where treating the earth as locally flat (with longitude
/// scaled by `cos(lat)`) overestimates by well under a meter. The projection
/// works in microdegree units scaled to meters.
pub struct DistanceApproximator {
    center: FixedCoordinate,
    meters_per_lat_unit: f64,
    meters_per_lon_unit: f64,
}

impl DistanceApproximator {
    pub fn new(center: FixedCoordinate) -> Self {
        let lat_degrees = f64::from(center.lat) / f64::from(COORDINATE_PRECISION);
        let meters_per_lat_unit = METERS_PER_DEGREE_LAT / f64::from(COORDINATE_PRECISION);
        Self {
            center,
            meters_per_lat_unit,
            meters_per_lon_unit: meters_per_lat_unit * lat_degrees.to_radians().cos(),
        }
    }

    /// Squared distance in meters between the reference and `other`.
    #[inline]
    pub fn distance_squared(&self, other: FixedCoordinate) -> f64 {
        let dlat = f64::from(other.lat - self.center.lat) * self.meters_per_lat_unit;
        let dlon = f64::from(other.lon - self.center.lon) * self.meters_per_lon_unit;
        dlat * dlat + dlon * dlon
    }

    /// Projects the reference point onto the segment `a..b`.
    ///
    /// Returns the clamped parameter `t ∈ [0, 1]`, the foot coordinate, and
    /// the squared distance from the reference to the foot. A zero-length
    /// segment collapses to `a` with `t = 0`.
    pub fn project_onto_segment(
        &self,
        a: FixedCoordinate,
        b: FixedCoordinate,
    ) -> (f64, FixedCoordinate, f64) {
        let ax = f64::from(a.lon) * self.meters_per_lon_unit;
        let ay = f64::from(a.lat) * self.meters_per_lat_unit;
        let bx = f64::from(b.lon) * self.meters_per_lon_unit;
        let by = f64::from(b.lat) * self.meters_per_lat_unit;
        let px = f64::from(self.center.lon) * self.meters_per_lon_unit;
        let py = f64::from(self.center.lat) * self.meters_per_lat_unit;

        let dx = bx - ax;
        let dy = by - ay;
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 {
            (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let foot = FixedCoordinate {
            lat: a.lat + ((f64::from(b.lat - a.lat)) * t).round() as i32,
            lon: a.lon + ((f64::from(b.lon - a.lon)) * t).round() as i32,
        };
        (t, foot, self.distance_squared(foot))
    }
}

/// Planar angle at `v` between the segments `v→u` and `v→w`, in degrees
/// within `[0, 360)`. A perfectly straight continuation reads 180.
pub fn angle_between(u: FixedCoordinate, v: FixedCoordinate, w: FixedCoordinate) -> f64 {
    let approx = DistanceApproximator::new(v);
    let scale_lon = approx.meters_per_lon_unit;
    let scale_lat = approx.meters_per_lat_unit;

    let v1x = f64::from(u.lon - v.lon) * scale_lon;
    let v1y = f64::from(u.lat - v.lat) * scale_lat;
    let v2x = f64::from(w.lon - v.lon) * scale_lon;
    let v2y = f64::from(w.lat - v.lat) * scale_lat;

    let angle = (v2y.atan2(v2x) - v1y.atan2(v1x)).to_degrees();
    if angle < 0.0 { angle + 360.0 } else { angle }
}
