//! Geographic utilities: great-circle distance, path length, bounds and
//! route simplification.
//!
//! [`haversine_distance`] is the single source of truth for distance math in
//! this crate. Any other implementation that must reconcile with it (a server
//! recomputing a saved route, for example) has to use the same radius and the
//! same `atan2` form of the haversine identity.

use geo::{algorithm::simplify::Simplify, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::PositionSample;

/// Earth radius used for all distance calculations, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points given in decimal degrees.
///
/// # Example
/// ```
/// use activity_recorder::geo_utils::haversine_distance;
///
/// // 0.009 degrees of longitude at the equator is just over one kilometer
/// let d = haversine_distance(0.0, 0.0, 0.0, 0.009);
/// assert!((d - 1000.75).abs() < 0.01);
/// ```
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin() * (delta_phi / 2.0).sin()
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin() * (delta_lambda / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance in meters between two position samples.
pub fn sample_distance(a: &PositionSample, b: &PositionSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Total length of a path in meters (sum of consecutive haversine distances).
pub fn polyline_length(samples: &[PositionSample]) -> f64 {
    samples
        .windows(2)
        .map(|w| sample_distance(&w[0], &w[1]))
        .sum()
}

/// Bounding box of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Center point as `(lat, lng)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Compute bounds for a set of samples. `None` for an empty slice.
pub fn compute_bounds(samples: &[PositionSample]) -> Option<Bounds> {
    let first = samples.first()?;
    let mut bounds = Bounds {
        min_lat: first.latitude,
        max_lat: first.latitude,
        min_lng: first.longitude,
        max_lng: first.longitude,
    };
    for s in &samples[1..] {
        bounds.min_lat = bounds.min_lat.min(s.latitude);
        bounds.max_lat = bounds.max_lat.max(s.latitude);
        bounds.min_lng = bounds.min_lng.min(s.longitude);
        bounds.max_lng = bounds.max_lng.max(s.longitude);
    }
    Some(bounds)
}

/// Douglas-Peucker simplification returning the indices of the kept samples.
///
/// Tolerance is in degrees. A non-positive tolerance keeps every sample.
/// Indices are returned rather than points so callers can keep elevation and
/// timestamps, which the planar simplification does not carry.
pub fn simplify_indices(samples: &[PositionSample], tolerance_deg: f64) -> Vec<usize> {
    if samples.len() < 3 || tolerance_deg <= 0.0 {
        return (0..samples.len()).collect();
    }

    let line: LineString<f64> = samples
        .iter()
        .map(|s| Coord {
            x: s.longitude,
            y: s.latitude,
        })
        .collect();
    let simplified = line.simplify(&tolerance_deg);

    // Simplify keeps a subsequence of the input, so a forward scan recovers indices.
    let mut indices = Vec::with_capacity(simplified.0.len());
    let mut cursor = 0;
    for kept in simplified.coords() {
        while cursor < samples.len() {
            let s = &samples[cursor];
            cursor += 1;
            if s.longitude == kept.x && s.latitude == kept.y {
                indices.push(cursor - 1);
                break;
            }
        }
    }
    indices
}
