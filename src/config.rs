//! Configuration for the tracking pipeline.
//!
//! Every field has a default, so a partial JSON document (or none at all) is a
//! valid configuration:
//!
//! ```rust
//! use activity_recorder::TrackerConfig;
//!
//! let config = TrackerConfig::from_json_str(r#"{ "splits": { "split_distance_m": 1609.34 } }"#).unwrap();
//! assert_eq!(config.splits.split_distance_m, 1609.34);
//! assert_eq!(config.location.good_accuracy_m, 50.0);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::heart_rate::DeviceFilter;

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub location: LocationConfig,
    pub session: SessionConfig,
    pub splits: SplitConfig,
    pub heart_rate: HeartRateConfig,
}

impl TrackerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let loc = &self.location;
        if !(loc.good_accuracy_m > 0.0 && loc.good_accuracy_m <= loc.acceptable_accuracy_m) {
            return Err(ConfigError::Invalid {
                field: "location.good_accuracy_m",
                reason: format!(
                    "must be positive and not exceed acceptable_accuracy_m ({})",
                    loc.acceptable_accuracy_m
                ),
            });
        }
        if loc.fix_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "location.fix_retry_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }

        let session = &self.session;
        if session.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "session.tick_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if session.start_fix_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "session.start_fix_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if session.min_segment_distance_m < 0.0 {
            return Err(ConfigError::Invalid {
                field: "session.min_segment_distance_m",
                reason: "must not be negative".to_string(),
            });
        }
        if session.moving_speed_threshold_mps < 0.0
            || session.max_plausible_speed_mps <= session.moving_speed_threshold_mps
        {
            return Err(ConfigError::Invalid {
                field: "session.max_plausible_speed_mps",
                reason: "must exceed a non-negative moving_speed_threshold_mps".to_string(),
            });
        }

        if session.map_full_render_every == 0 {
            return Err(ConfigError::Invalid {
                field: "session.map_full_render_every",
                reason: "must be positive".to_string(),
            });
        }

        if !(self.splits.split_distance_m > 0.0 && self.splits.split_distance_m.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "splits.split_distance_m",
                reason: "must be a positive distance".to_string(),
            });
        }

        let hr = &self.heart_rate;
        if hr.stale_after_ms == 0 || hr.history_window_ms < hr.stale_after_ms {
            return Err(ConfigError::Invalid {
                field: "heart_rate.history_window_ms",
                reason: "must be at least stale_after_ms, which must be positive".to_string(),
            });
        }
        if hr.low_battery_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "heart_rate.low_battery_percent",
                reason: "must be a percentage".to_string(),
            });
        }

        Ok(())
    }
}

/// Location provider and GPS signal settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Request the most accurate fix the platform can give. Default: true
    pub high_accuracy: bool,

    /// How long the provider may take to produce a fix.
    /// Default: 30000 ms
    pub timeout_ms: u64,

    /// Maximum age of a cached fix the provider may return.
    /// Default: 10000 ms
    pub max_fix_age_ms: u64,

    /// Accuracy at or below which the signal is "good".
    /// Default: 50.0 meters
    pub good_accuracy_m: f64,

    /// Accuracy at or below which the signal is "acceptable"; worse is "poor".
    /// Default: 250.0 meters
    pub acceptable_accuracy_m: f64,

    /// Retries of a single fix request after the first failure.
    /// Default: 3
    pub fix_retry_attempts: u32,

    /// Delay between single-fix retries.
    /// Default: 1000 ms
    pub fix_retry_backoff_ms: u64,

    /// Delay before the one recovery probe after a stream failure.
    /// Default: 5000 ms
    pub recovery_delay_ms: u64,

    /// Signal probe cadence while idle. 0 disables the idle monitor.
    /// Default: 5000 ms
    pub idle_probe_interval_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 30_000,
            max_fix_age_ms: 10_000,
            good_accuracy_m: 50.0,
            acceptable_accuracy_m: 250.0,
            fix_retry_attempts: 3,
            fix_retry_backoff_ms: 1_000,
            recovery_delay_ms: 5_000,
            idle_probe_interval_ms: 5_000,
        }
    }
}

/// Session and metric policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial-fix attempts when starting or resuming.
    /// Default: 3
    pub start_fix_attempts: u32,

    /// Delay between initial-fix attempts.
    /// Default: 2000 ms
    pub start_retry_delay_ms: u64,

    /// Cadence of the moving-time / average-pace clock.
    /// Default: 1000 ms
    pub tick_interval_ms: u64,

    /// Samples closer than this to the previous accepted sample are dropped.
    /// Default: 0.0 meters (no filter)
    pub min_segment_distance_m: f64,

    /// Instantaneous speed above which the athlete counts as moving.
    /// Default: 0.3 m/s
    pub moving_speed_threshold_mps: f64,

    /// Samples less accurate than this are kept for display but ignored by speed logic.
    /// Default: 250.0 meters
    pub speed_accuracy_ceiling_m: f64,

    /// Speeds above this are treated as GPS outliers.
    /// Default: 60.0 m/s
    pub max_plausible_speed_mps: f64,

    /// Douglas-Peucker tolerance for the route sent to the map sink.
    /// Default: 0.0 degrees (no simplification)
    pub map_simplify_tolerance_deg: f64,

    /// With simplification on, the whole route is re-simplified and re-sent
    /// every this many samples; other samples are appended.
    /// Default: 10
    pub map_full_render_every: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_fix_attempts: 3,
            start_retry_delay_ms: 2_000,
            tick_interval_ms: 1_000,
            min_segment_distance_m: 0.0,
            moving_speed_threshold_mps: 0.3,
            speed_accuracy_ceiling_m: 250.0,
            max_plausible_speed_mps: 60.0,
            map_simplify_tolerance_deg: 0.0,
            map_full_render_every: 10,
        }
    }
}

/// Split detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Distance between automatic split boundaries.
    /// Default: 1000.0 meters
    pub split_distance_m: f64,

    /// Emit splits automatically at each boundary. Default: true
    pub auto_splits: bool,

    /// Number of recent splits kept for trend display.
    /// Default: 3
    pub trailing_window: usize,

    /// Close the record with a partial split for the distance after the last boundary.
    /// Default: true
    pub record_partial_final_split: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            split_distance_m: 1_000.0,
            auto_splits: true,
            trailing_window: 3,
            record_partial_final_split: true,
        }
    }
}

/// Heart-rate sensor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    /// Rolling history window.
    /// Default: 1800000 ms (30 minutes)
    pub history_window_ms: i64,

    /// A connected sensor with no sample for this long is stale.
    /// Default: 30000 ms
    pub stale_after_ms: i64,

    /// Battery level below which a low-battery advisory is raised.
    /// Default: 20 percent
    pub low_battery_percent: u8,

    /// Maximum heart rate used for zone classification.
    /// Default: 185 bpm
    pub max_heart_rate: u8,

    /// Which devices to offer when connecting.
    pub device_filter: DeviceFilter,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            history_window_ms: 30 * 60 * 1000,
            stale_after_ms: 30_000,
            low_battery_percent: 20,
            max_heart_rate: 185,
            device_filter: DeviceFilter::default(),
        }
    }
}
