//! Great-circle distance math shared by every manager.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters in one statute mile.
pub const METERS_PER_MILE: f64 = 1609.34;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to another coordinate in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance_meters(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance between two coordinates in meters.
#[must_use]
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Clamp so rounding can't push asin out of its domain for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Convert miles to meters.
#[must_use]
pub fn miles_to_meters(miles: f64) -> f64 {
    miles * METERS_PER_MILE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_identical_points() {
        assert!(distance_meters(45.5, -122.6, 45.5, -122.6).abs() < f64::EPSILON);
        assert!(distance_meters(0.0, 0.0, 0.0, 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distance_symmetric() {
        let pairs = [
            ((0.0, 0.0), (0.0, 1.0)),
            ((51.5, -0.12), (48.85, 2.35)),
            ((-33.9, 151.2), (40.7, -74.0)),
            ((89.9, 10.0), (-89.9, -170.0)),
        ];
        for ((a_lat, a_lon), (b_lat, b_lon)) in pairs {
            let ab = distance_meters(a_lat, a_lon, b_lat, b_lon);
            let ba = distance_meters(b_lat, b_lon, a_lat, a_lon);
            assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
        }
    }

    #[test]
    fn test_one_degree_of_longitude_at_equator() {
        let d = distance_meters(0.0, 0.0, 0.0, 1.0);
        let expected = 111_195.0;
        assert!((d - expected).abs() / expected < 0.01, "got {d}");
    }

    #[test]
    fn test_distance_monotonic_with_separation() {
        let mut previous = 0.0;
        for step in 1..=10 {
            let d = distance_meters(10.0, 10.0, 10.0 + f64::from(step) * 0.5, 10.0);
            assert!(d > previous);
            previous = d;
        }
    }

    #[test]
    fn test_antipodal_points_stay_finite() {
        let d = distance_meters(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_coordinate_distance_matches_free_function() {
        let a = Coordinate::new(37.77, -122.42);
        let b = Coordinate::new(34.05, -118.24);
        assert!((a.distance_to(&b) - distance_meters(37.77, -122.42, 34.05, -118.24)).abs() < 1e-9);
    }

    #[test]
    fn test_miles_to_meters() {
        assert!((miles_to_meters(10.0) - 16_093.4).abs() < 1e-9);
    }
}
