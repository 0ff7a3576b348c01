//! # Activity Recorder
//!
//! Real-time activity tracking pipeline: turns a noisy, irregular stream of
//! GPS fixes and heart-rate notifications into consistent live metrics and a
//! finished activity record.
//!
//! This library provides:
//! - Incremental haversine distance and elevation gain
//! - Moving time, smoothed speed, current and average pace
//! - Kilometer (or configurable) split detection with speed trends
//! - GPS signal grading with bounded retry and single-shot recovery
//! - Heart-rate sensor sessions with staleness detection and a rolling history
//! - An [`ActivityController`] state machine tying it all together
//!
//! ## Features
//!
//! - **`persistence`** - SQLite store for finished activities
//! - **`synthetic`** - Scripted collaborators and synthetic routes for tests and demos
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! The metric components are plain values and can be used without the controller:
//!
//! ```rust
//! use activity_recorder::{DistanceAccumulator, PositionSample};
//!
//! let samples = vec![
//!     PositionSample::new(0.0, 0.0, 0).with_elevation(10.0),
//!     PositionSample::new(0.0, 0.009, 60_000).with_elevation(14.0),
//!     PositionSample::new(0.0, 0.018, 120_000).with_elevation(12.0),
//! ];
//!
//! let mut distance = DistanceAccumulator::new();
//! let mut prev: Option<&PositionSample> = None;
//! for s in &samples {
//!     distance.add_sample(prev, s);
//!     prev = Some(s);
//! }
//!
//! assert!(distance.total_distance_m() > 2000.0);
//! assert_eq!(distance.total_ascent_m(), 4.0);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{
    ConfigError, LocationError, PersistError, Result, SensorError, TrackerError, ValidationError,
};

// Configuration for every component
pub mod config;
pub use config::{HeartRateConfig, LocationConfig, SessionConfig, SplitConfig, TrackerConfig};

// Wall clock abstraction
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Geographic utilities (haversine, bounds, simplification)
pub mod geo_utils;

// Append-only route
pub mod route;
pub use route::{MapPosition, Route};

// Distance and elevation accumulation
pub mod distance;
pub use distance::{DistanceAccumulator, DistanceState, SegmentDelta};

// Moving time, speed smoothing and pace
pub mod pace;
pub use pace::{pace_min_per_km, PaceEngine, PaceState};

// Split detection
pub mod splits;
pub use splits::{Split, SplitRecorder, SplitSnapshot};

// GPS sampling and signal grading
pub mod location;
pub use location::{
    GeoSampler, GpsSignalState, LocationOptions, LocationProvider, PermissionStatus, RawFix,
};

// Heart-rate sensor sessions
pub mod heart_rate;
pub use heart_rate::{
    DeviceFilter, HRZoneConfig, HRZoneDistribution, HeartRateConnectionState, HeartRateSession,
    HeartRateTransport,
};

// Activity state machine
pub mod controller;
pub use controller::{
    ActivityController, ActivityRecord, Advisory, HeartRateSummary, Notice, TrackerEvent,
    TrackingSnapshot, TrackingState,
};

// Persistence and map sinks
pub mod sinks;
pub use sinks::{ActivitySink, MapSink, MapStyle, MemoryActivityStore, NoopMapSink};

// SQLite persistence for finished activities
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteActivityStore;

// Display formatting
pub mod format;

// Scripted collaborators for tests and demos
#[cfg(any(test, feature = "synthetic"))]
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// One normalized location reading.
///
/// Timestamps are milliseconds since the Unix epoch and strictly increase
/// within one tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters, when the provider reports one
    pub elevation: Option<f64>,
    /// Radius of 68% confidence in meters
    pub horizontal_accuracy_m: f64,
    /// Ground speed reported by the provider, in m/s
    pub speed_mps: Option<f64>,
    pub timestamp_millis: i64,
}

impl PositionSample {
    /// Create a sample with perfect accuracy and no elevation or speed.
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            horizontal_accuracy_m: 0.0,
            speed_mps: None,
            timestamp_millis,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.horizontal_accuracy_m = accuracy_m;
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One heart-rate reading from the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    pub bpm: u8,
    pub timestamp_millis: i64,
}

/// Kind of activity being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    #[default]
    Running,
    Cycling,
    Walking,
    Hiking,
}

impl ActivityType {
    pub const ALL: [ActivityType; 4] = [
        ActivityType::Running,
        ActivityType::Cycling,
        ActivityType::Walking,
        ActivityType::Hiking,
    ];

    /// The next activity type in selection order, wrapping around.
    pub fn next(self) -> Self {
        match self {
            ActivityType::Running => ActivityType::Cycling,
            ActivityType::Cycling => ActivityType::Walking,
            ActivityType::Walking => ActivityType::Hiking,
            ActivityType::Hiking => ActivityType::Running,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActivityType::Running => "Running",
            ActivityType::Cycling => "Cycling",
            ActivityType::Walking => "Walking",
            ActivityType::Hiking => "Hiking",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
