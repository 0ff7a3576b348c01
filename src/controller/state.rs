//! Tracking state machine states and the per-session accumulators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SplitConfig;
use crate::distance::DistanceAccumulator;
use crate::pace::PaceEngine;
use crate::route::Route;
use crate::splits::{SplitRecorder, SplitSnapshot};
use crate::PositionSample;

/// Controller state.
///
/// ```text
/// idle -> searching -> active <-> paused
///                        |          |
///                        +-> finishing <-+
/// finishing -> idle (save / discard) | active (resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    Idle,
    /// Waiting for the initial fix of a start or resume
    Searching,
    Active,
    Paused,
    /// Record assembled, waiting for save or discard
    Finishing,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackingState::Idle => "idle",
            TrackingState::Searching => "searching",
            TrackingState::Active => "active",
            TrackingState::Paused => "paused",
            TrackingState::Finishing => "finishing",
        };
        f.write_str(s)
    }
}

/// Everything one session accumulates. Owned by the controller and passed to
/// each component's update method.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub route: Route,
    pub distance: DistanceAccumulator,
    pub pace: PaceEngine,
    pub splits: SplitRecorder,
    /// Tick-clock duration, excluding pauses
    pub duration_seconds: f64,
    pub started_at: Option<i64>,
    /// Distance baseline; cleared at the start of every segment
    pub last_sample: Option<PositionSample>,
}

impl SessionState {
    pub fn new(split_config: &SplitConfig) -> Self {
        Self {
            route: Route::new(),
            distance: DistanceAccumulator::new(),
            pace: PaceEngine::new(),
            splits: SplitRecorder::new(split_config),
            duration_seconds: 0.0,
            started_at: None,
            last_sample: None,
        }
    }

    pub fn reset(&mut self, split_config: &SplitConfig, started_at: i64) {
        *self = Self::new(split_config);
        self.started_at = Some(started_at);
    }

    pub fn split_snapshot(&self, heart_rate: Option<u8>, timestamp_millis: i64) -> SplitSnapshot {
        SplitSnapshot {
            elevation: self.route.last().and_then(|s| s.elevation),
            heart_rate,
            speed_mps: self.pace.state().smoothed_speed_mps,
            timestamp_millis,
        }
    }
}
