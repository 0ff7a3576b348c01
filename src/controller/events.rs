//! Events consumed and notices produced by the controller.

use std::fmt;

use crate::error::{LocationError, SensorError};
use crate::heart_rate::{HeartRateConnectionState, LinkEvent};
use crate::location::GpsSignalState;
use crate::splits::Split;
use crate::PositionSample;

/// Input to the controller's single update queue.
///
/// Every producer tags its events with the generation it was started under;
/// events from a cancelled segment, monitor or sensor link are ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A fix (or stream error) from the continuous watch
    Fix {
        generation: u64,
        result: Result<PositionSample, LocationError>,
    },
    /// Fixed-cadence clock tick
    Tick { generation: u64 },
    /// Result of the single recovery probe
    Recovery {
        generation: u64,
        result: Result<PositionSample, LocationError>,
    },
    /// Idle signal monitor reading
    SignalProbe {
        generation: u64,
        result: Result<PositionSample, LocationError>,
    },
    HeartRate { generation: u64, event: LinkEvent },
}

/// Non-blocking warning shown while tracking continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    GpsDegraded(LocationError),
    GpsRecovered,
    HeartRateStale,
    HeartRateError(SensorError),
    HeartRateDisconnected,
    LowBattery(u8),
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::GpsDegraded(err) => write!(f, "GPS signal degraded: {err}"),
            Advisory::GpsRecovered => f.write_str("GPS signal recovered"),
            Advisory::HeartRateStale => f.write_str("No heart-rate data received recently"),
            Advisory::HeartRateError(err) => write!(f, "Heart-rate sensor error: {err}"),
            Advisory::HeartRateDisconnected => f.write_str("Heart-rate sensor disconnected"),
            Advisory::LowBattery(pct) => write!(f, "Heart-rate sensor battery low ({pct}%)"),
        }
    }
}

/// Observable outcome of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    SampleRecorded { total_distance_m: f64 },
    SplitRecorded(Split),
    SignalChanged(GpsSignalState),
    HeartRateStateChanged(HeartRateConnectionState),
    HeartRate(u8),
    Advisory(Advisory),
}
