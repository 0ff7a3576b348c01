//! Append-only route of the current session.

use serde::{Deserialize, Serialize};

use crate::geo_utils::{self, Bounds};
use crate::PositionSample;

/// Position handed to the map renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub lat: f64,
    pub lng: f64,
    pub elevation: Option<f64>,
}

impl From<&PositionSample> for MapPosition {
    fn from(s: &PositionSample) -> Self {
        Self {
            lat: s.latitude,
            lng: s.longitude,
            elevation: s.elevation,
        }
    }
}

/// Ordered sequence of accepted samples.
///
/// Samples can only be appended. The route is copied into the activity record
/// when the session finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    samples: Vec<PositionSample>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: PositionSample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[PositionSample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        geo_utils::compute_bounds(&self.samples)
    }

    /// Route positions for the map, simplified with the given tolerance in degrees.
    pub fn map_positions(&self, simplify_tolerance_deg: f64) -> Vec<MapPosition> {
        geo_utils::simplify_indices(&self.samples, simplify_tolerance_deg)
            .into_iter()
            .map(|i| MapPosition::from(&self.samples[i]))
            .collect()
    }

    pub fn into_samples(self) -> Vec<PositionSample> {
        self.samples
    }
}
