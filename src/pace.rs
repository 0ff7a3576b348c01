//! Moving time, speed smoothing and pace.
//!
//! Two cadences feed the engine independently:
//! - the fixed tick (default 1 s) accrues moving time and recomputes the
//!   average pace from session-lifetime totals
//! - each accepted position sample updates the smoothed speed and the
//!   current pace of the most recent segment

use serde::{Deserialize, Serialize};

/// Weight of the previous smoothed speed.
pub const SMOOTHING_PREVIOUS_WEIGHT: f64 = 0.7;

/// Weight of the new raw speed reading.
pub const SMOOTHING_RAW_WEIGHT: f64 = 0.3;

/// Pace in minutes per kilometer.
///
/// Returns `None` unless both operands are strictly positive and finite, so
/// callers never see a zero, infinite or NaN pace.
///
/// ```rust
/// use activity_recorder::pace_min_per_km;
///
/// assert_eq!(pace_min_per_km(300.0, 1000.0), Some(5.0));
/// assert_eq!(pace_min_per_km(300.0, 0.0), None);
/// ```
pub fn pace_min_per_km(elapsed_seconds: f64, distance_meters: f64) -> Option<f64> {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !usable(elapsed_seconds) || !usable(distance_meters) {
        return None;
    }
    Some((elapsed_seconds / 60.0) / (distance_meters / 1000.0))
}

/// Snapshot of the pace engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceState {
    pub moving_time_seconds: f64,
    pub average_pace_min_per_km: Option<f64>,
    pub current_pace_min_per_km: Option<f64>,
    pub smoothed_speed_mps: f64,
    /// Last raw speed reading before smoothing
    pub instantaneous_speed_mps: f64,
}

/// Moving-time and pace accumulator for one session.
#[derive(Debug, Clone, Default)]
pub struct PaceEngine {
    state: PaceState,
}

impl PaceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the tick clock. Moving time only accrues while moving.
    pub fn on_tick(&mut self, elapsed_seconds: f64, is_moving: bool) -> f64 {
        if is_moving && elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            self.state.moving_time_seconds += elapsed_seconds;
        }
        self.state.moving_time_seconds
    }

    /// Feed a raw speed reading through the exponential smoother.
    pub fn observe_speed(&mut self, raw_speed_mps: f64) -> f64 {
        if !raw_speed_mps.is_finite() || raw_speed_mps < 0.0 {
            return self.state.smoothed_speed_mps;
        }
        self.state.instantaneous_speed_mps = raw_speed_mps;
        self.state.smoothed_speed_mps = SMOOTHING_PREVIOUS_WEIGHT * self.state.smoothed_speed_mps
            + SMOOTHING_RAW_WEIGHT * raw_speed_mps;
        self.state.smoothed_speed_mps
    }

    /// Whether the last raw speed reading is above `threshold_mps`.
    pub fn is_moving(&self, threshold_mps: f64) -> bool {
        self.state.instantaneous_speed_mps > threshold_mps
    }

    /// Current pace from the single most recent segment.
    pub fn on_segment(&mut self, distance_meters: f64, elapsed_seconds: f64) -> Option<f64> {
        self.state.current_pace_min_per_km = pace_min_per_km(elapsed_seconds, distance_meters);
        self.state.current_pace_min_per_km
    }

    /// Average pace from session-lifetime totals.
    pub fn recompute(&mut self, moving_time_seconds: f64, total_distance_meters: f64) -> Option<f64> {
        self.state.average_pace_min_per_km =
            pace_min_per_km(moving_time_seconds, total_distance_meters);
        self.state.average_pace_min_per_km
    }

    /// Forget the instantaneous reading (e.g. when the stream pauses).
    ///
    /// Moving time, averages and the smoothed speed are retained.
    pub fn halt(&mut self) {
        self.state.instantaneous_speed_mps = 0.0;
        self.state.current_pace_min_per_km = None;
    }

    pub fn moving_time_seconds(&self) -> f64 {
        self.state.moving_time_seconds
    }

    pub fn state(&self) -> PaceState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = PaceState::default();
    }
}
