//! Incremental distance and elevation-gain accumulation.
//!
//! The accumulator applies no noise filtering of its own. Whether a sample is
//! close enough to the previous one to be discarded is the controller's
//! decision (see `SessionConfig::min_segment_distance_m`).

use serde::{Deserialize, Serialize};

use crate::geo_utils::sample_distance;
use crate::PositionSample;

/// Cumulative totals. Both fields only ever grow within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceState {
    pub total_distance_m: f64,
    pub total_ascent_m: f64,
}

/// Contribution of one appended sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentDelta {
    pub segment_distance_m: f64,
    /// Signed elevation change, zero when either sample lacks elevation
    pub elevation_delta_m: f64,
}

/// Owns the distance and ascent totals of one session.
#[derive(Debug, Clone, Default)]
pub struct DistanceAccumulator {
    state: DistanceState,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `next`, given the previously accepted sample.
    ///
    /// With no previous sample (the first sample of a session or segment) the
    /// contribution is zero; the sample only seeds the baseline.
    pub fn add_sample(
        &mut self,
        prev: Option<&PositionSample>,
        next: &PositionSample,
    ) -> SegmentDelta {
        let Some(prev) = prev else {
            return SegmentDelta::default();
        };

        let segment_distance_m = sample_distance(prev, next);
        let elevation_delta_m = match (prev.elevation, next.elevation) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => b - a,
            _ => 0.0,
        };

        if segment_distance_m.is_finite() {
            self.state.total_distance_m += segment_distance_m;
        }
        if elevation_delta_m > 0.0 {
            self.state.total_ascent_m += elevation_delta_m;
        }

        SegmentDelta {
            segment_distance_m,
            elevation_delta_m,
        }
    }

    pub fn state(&self) -> DistanceState {
        self.state
    }

    pub fn total_distance_m(&self) -> f64 {
        self.state.total_distance_m
    }

    pub fn total_ascent_m(&self) -> f64 {
        self.state.total_ascent_m
    }

    pub fn reset(&mut self) {
        self.state = DistanceState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_distance;

    fn replay(samples: &[PositionSample]) -> DistanceAccumulator {
        let mut acc = DistanceAccumulator::new();
        let mut prev = None;
        for s in samples {
            acc.add_sample(prev, s);
            prev = Some(s);
        }
        acc
    }

    fn track() -> Vec<PositionSample> {
        vec![
            PositionSample::new(51.5074, -0.1278, 0).with_elevation(10.0),
            PositionSample::new(51.5080, -0.1290, 1_000).with_elevation(12.5),
            PositionSample::new(51.5090, -0.1300, 2_000).with_elevation(11.0),
            PositionSample::new(51.5100, -0.1310, 3_000).with_elevation(15.0),
            PositionSample::new(51.5110, -0.1320, 4_000).with_elevation(15.0),
        ]
    }

    #[test]
    fn test_first_sample_contributes_nothing() {
        let mut acc = DistanceAccumulator::new();
        let delta = acc.add_sample(None, &track()[0]);
        assert_eq!(delta, SegmentDelta::default());
        assert_eq!(acc.state(), DistanceState::default());
    }

    #[test]
    fn test_total_is_sum_of_pairwise_haversine() {
        let samples = track();
        let acc = replay(&samples);
        let expected: f64 = samples
            .windows(2)
            .map(|w| haversine_distance(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
            .sum();
        assert_eq!(acc.total_distance_m(), expected);

        // Replaying the same sequence gives the same totals
        assert_eq!(replay(&samples).state(), acc.state());
    }

    #[test]
    fn test_ascent_only_counts_climbs() {
        let acc = replay(&track());
        // +2.5, -1.5 ignored, +4.0, 0
        assert_eq!(acc.total_ascent_m(), 6.5);
    }

    #[test]
    fn test_ascent_is_monotonic() {
        let mut acc = DistanceAccumulator::new();
        let samples = track();
        let mut prev = None;
        let mut last_ascent = 0.0;
        for s in &samples {
            acc.add_sample(prev, s);
            assert!(acc.total_ascent_m() >= last_ascent);
            last_ascent = acc.total_ascent_m();
            prev = Some(s);
        }
    }

    #[test]
    fn test_descending_profile_has_zero_ascent() {
        let samples: Vec<PositionSample> = (0..20)
            .map(|i| {
                PositionSample::new(46.0 + i as f64 * 0.0005, 7.0, i * 1_000)
                    .with_elevation(2_000.0 - i as f64 * 7.5)
            })
            .collect();
        let acc = replay(&samples);
        assert_eq!(acc.total_ascent_m(), 0.0);
        assert!(acc.total_distance_m() > 0.0);
    }

    #[test]
    fn test_missing_elevation_reports_zero_ascent() {
        let samples = vec![
            PositionSample::new(0.0, 0.0, 0),
            PositionSample::new(0.0, 0.001, 1_000),
            PositionSample::new(0.0, 0.002, 2_000).with_elevation(50.0),
        ];
        let mut acc = DistanceAccumulator::new();
        let d1 = acc.add_sample(None, &samples[0]);
        let d2 = acc.add_sample(Some(&samples[0]), &samples[1]);
        let d3 = acc.add_sample(Some(&samples[1]), &samples[2]);
        assert_eq!(d1.elevation_delta_m, 0.0);
        assert_eq!(d2.elevation_delta_m, 0.0);
        assert_eq!(d3.elevation_delta_m, 0.0);
        assert_eq!(acc.total_ascent_m(), 0.0);
    }

    #[test]
    fn test_reset() {
        let mut acc = replay(&track());
        acc.reset();
        assert_eq!(acc.total_distance_m(), 0.0);
        assert_eq!(acc.total_ascent_m(), 0.0);
    }
}
