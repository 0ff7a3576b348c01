//! Split detection.
//!
//! A split is emitted when cumulative distance crosses a multiple of the
//! configured split distance (default 1 km). Splits can also be recorded
//! manually, and a final partial split can be produced for the record without
//! touching the recorder's history.
//!
//! Split durations are elapsed time since the previous split (or the session
//! origin), so time spent paused counts towards the split it falls in.

use std::collections::VecDeque;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::SplitConfig;
use crate::pace::pace_min_per_km;

/// Immutable split record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// 1-based, monotonic within a session
    pub split_number: u32,
    /// Distance covered since the previous split
    pub distance_km: f64,
    pub duration_seconds: f64,
    pub pace_min_per_km: Option<f64>,
    pub cumulative_distance_km: f64,
    pub cumulative_duration_seconds: f64,
    pub elevation_at_split: Option<f64>,
    pub heart_rate_at_split: Option<u8>,
    /// Smoothed speed when the split was recorded
    pub speed_at_split: f64,
    /// Difference to the previous split's speed, zero for the first split
    pub speed_trend_vs_previous: f64,
    pub timestamp_millis: i64,
    /// True only for the closing split appended at finish
    #[serde(default)]
    pub partial: bool,
}

/// Live values captured into a split when it is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SplitSnapshot {
    pub elevation: Option<f64>,
    pub heart_rate: Option<u8>,
    pub speed_mps: f64,
    pub timestamp_millis: i64,
}

/// Detects split boundaries and keeps the split history of one session.
#[derive(Debug, Clone)]
pub struct SplitRecorder {
    split_distance_m: f64,
    trailing_window: usize,
    history: Vec<Split>,
    recent: VecDeque<Split>,
    /// Cumulative distance at the previous split, in meters
    last_cumulative_m: f64,
    /// Timestamp the first split's duration is measured from
    origin_millis: Option<i64>,
}

impl SplitRecorder {
    pub fn new(config: &SplitConfig) -> Self {
        Self {
            split_distance_m: config.split_distance_m,
            trailing_window: config.trailing_window,
            history: Vec::new(),
            recent: VecDeque::with_capacity(config.trailing_window),
            last_cumulative_m: 0.0,
            origin_millis: None,
        }
    }

    /// Set the session start that the first split's duration counts from.
    ///
    /// Without an origin, durations fall back to differences of the
    /// cumulative duration passed in.
    pub fn set_origin(&mut self, timestamp_millis: i64) {
        self.origin_millis = Some(timestamp_millis);
    }

    /// Emit a split if `cumulative_distance_m` crossed a boundary since the
    /// previous split.
    ///
    /// Calling again with the same (or a smaller) distance returns `None`.
    /// A jump across several boundaries yields a single split covering the
    /// whole distance.
    pub fn check_and_emit(
        &mut self,
        cumulative_distance_m: f64,
        cumulative_duration_seconds: f64,
        snapshot: &SplitSnapshot,
    ) -> Option<Split> {
        if !cumulative_distance_m.is_finite() {
            return None;
        }
        let boundary = |d: f64| (d / self.split_distance_m).floor();
        if boundary(cumulative_distance_m) <= boundary(self.last_cumulative_m) {
            return None;
        }
        let split = self.build(cumulative_distance_m, cumulative_duration_seconds, snapshot, false);
        self.commit(split.clone(), cumulative_distance_m);
        Some(split)
    }

    /// Record a split at the current position regardless of boundaries.
    ///
    /// Returns `None` if no distance has been covered since the previous split.
    pub fn record_manual(
        &mut self,
        cumulative_distance_m: f64,
        cumulative_duration_seconds: f64,
        snapshot: &SplitSnapshot,
    ) -> Option<Split> {
        if !self.has_distance_since_last(cumulative_distance_m) {
            return None;
        }
        let split = self.build(cumulative_distance_m, cumulative_duration_seconds, snapshot, false);
        self.commit(split.clone(), cumulative_distance_m);
        Some(split)
    }

    /// The partial split covering distance after the last recorded split.
    ///
    /// The recorder is not modified, so this can be called again after more
    /// distance is added.
    pub fn final_partial(
        &self,
        cumulative_distance_m: f64,
        cumulative_duration_seconds: f64,
        snapshot: &SplitSnapshot,
    ) -> Option<Split> {
        if !self.has_distance_since_last(cumulative_distance_m) {
            return None;
        }
        Some(self.build(cumulative_distance_m, cumulative_duration_seconds, snapshot, true))
    }

    pub fn history(&self) -> &[Split] {
        &self.history
    }

    /// The most recent splits, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &Split> {
        self.recent.iter()
    }

    pub fn last(&self) -> Option<&Split> {
        self.history.last()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.recent.clear();
        self.last_cumulative_m = 0.0;
        self.origin_millis = None;
    }

    fn has_distance_since_last(&self, cumulative_distance_m: f64) -> bool {
        cumulative_distance_m.is_finite() && cumulative_distance_m > self.last_cumulative_m
    }

    fn build(
        &self,
        cumulative_distance_m: f64,
        cumulative_duration_seconds: f64,
        snapshot: &SplitSnapshot,
        partial: bool,
    ) -> Split {
        let prev = self.history.last();
        let prev_distance_m = self.last_cumulative_m;
        let distance_m = cumulative_distance_m - prev_distance_m;
        let duration_seconds = match self.origin_millis {
            Some(origin) => {
                let since = prev.map(|s| s.timestamp_millis).unwrap_or(origin);
                ((snapshot.timestamp_millis - since) as f64 / 1000.0).max(0.0)
            }
            None => {
                let prev_duration = prev.map(|s| s.cumulative_duration_seconds).unwrap_or(0.0);
                (cumulative_duration_seconds - prev_duration).max(0.0)
            }
        };

        Split {
            split_number: prev.map(|s| s.split_number).unwrap_or(0) + 1,
            distance_km: distance_m / 1000.0,
            duration_seconds,
            pace_min_per_km: pace_min_per_km(duration_seconds, distance_m),
            cumulative_distance_km: cumulative_distance_m / 1000.0,
            cumulative_duration_seconds,
            elevation_at_split: snapshot.elevation,
            heart_rate_at_split: snapshot.heart_rate,
            speed_at_split: snapshot.speed_mps,
            speed_trend_vs_previous: prev
                .map(|s| snapshot.speed_mps - s.speed_at_split)
                .unwrap_or(0.0),
            timestamp_millis: snapshot.timestamp_millis,
            partial,
        }
    }

    fn commit(&mut self, split: Split, cumulative_distance_m: f64) {
        debug!(
            "[SplitRecorder] Split {} at {:.3} km ({:.0}s)",
            split.split_number, split.cumulative_distance_km, split.duration_seconds
        );
        if self.trailing_window > 0 {
            if self.recent.len() == self.trailing_window {
                self.recent.pop_front();
            }
            self.recent.push_back(split.clone());
        }
        self.last_cumulative_m = cumulative_distance_m;
        self.history.push(split);
    }
}
