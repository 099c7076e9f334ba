//! Initial great-circle compass bearings between two latitude/longitude points.

use std::fmt;

/// A WGS-84 position in degrees, latitude first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Data stores hand out coordinates as (x, y) = (longitude, latitude).
    pub fn from_xy(point: geo::Point) -> Self {
        Self::new(point.y(), point.x())
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("expected a (latitude, longitude) pair, got {0} value(s)")]
pub struct CoordinateShapeError(pub usize);

impl TryFrom<&[f64]> for LatLon {
    type Error = CoordinateShapeError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        match values {
            [lat, lon] => Ok(LatLon::new(*lat, *lon)),
            _ => Err(CoordinateShapeError(values.len())),
        }
    }
}

/// Returns the initial compass bearing in degrees, in `[0, 360)`, for travel
/// from `origin` toward `destination` on a sphere.
///
/// Only [`LatLon`] values are accepted:
///
/// ```compile_fail
/// calc_gps_bearings::bearing::compass_bearing((0.0, 0.0), (0.0, 90.0));
/// ```
///
/// Coincident points and poles give a degenerate but finite result (`0` for
/// coincident points).
pub fn compass_bearing(origin: LatLon, destination: LatLon) -> f64 {
    let lat1 = origin.lat.to_radians();
    let lat2 = destination.lat.to_radians();
    let diff_long = (destination.lon - origin.lon).to_radians();

    let x = diff_long.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * diff_long.cos();

    // atan2 gives (-180°, 180°].
    let initial = x.atan2(y).to_degrees();
    (initial + 360.0) % 360.0
}
