//! Unified error handling for the activity-recorder library.
//!
//! Errors are grouped by the collaborator that produces them. Sensor errors
//! never abort an in-progress session: the controller turns them into
//! advisories and keeps tracking. Only [`LocationError::Unsupported`] is fatal,
//! and only before a session can start.

use thiserror::Error;

use crate::controller::TrackingState;
use crate::location::GpsSignalState;

/// Failures of the platform location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The user (or platform policy) denied location access
    #[error("location permission denied")]
    PermissionDenied,
    /// The provider could not produce a usable fix
    #[error("location information unavailable")]
    Unavailable,
    /// No fix arrived within the configured timeout
    #[error("location request timed out")]
    Timeout,
    /// The platform has no location capability at all
    #[error("location services are not supported on this platform")]
    Unsupported,
}

impl LocationError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LocationError::Unavailable | LocationError::Timeout)
    }
}

/// Failures of the wireless heart-rate sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("bluetooth is not supported on this platform")]
    BluetoothUnsupported,
    #[error("no matching heart-rate device found")]
    DeviceNotFound,
    #[error("GATT operation failed: {0}")]
    GattFailure(String),
    #[error("heart-rate device not connected")]
    NotConnected,
    /// A notification frame too short to hold the expected value
    #[error("malformed sensor frame ({len} bytes)")]
    MalformedFrame { len: usize },
}

/// A request rejected because the tracker is not in a suitable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Start (or resume) requested before the GPS signal was acquired
    #[error("GPS signal is {signal}; waiting for an acquired signal before starting")]
    InsufficientSignal { signal: GpsSignalState },
    /// The action is not valid from the current tracking state
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: TrackingState,
        action: &'static str,
    },
}

/// Failures of the persistence sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Serialization(err.to_string())
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for PersistError {
    fn from(err: rusqlite::Error) -> Self {
        PersistError::Storage(err.to_string())
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// Top-level error type for tracker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Location(#[from] LocationError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TrackerError {
    /// True for "can't start" conditions the user can fix and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrackerError::Location(LocationError::Unsupported))
    }
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
