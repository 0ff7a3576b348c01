//! Heart-rate sensor session state.

use std::collections::VecDeque;
use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::zones::{HRZoneConfig, HRZoneDistribution, ZoneTally};
use crate::config::HeartRateConfig;
use crate::HeartRateSample;

/// Connection lifecycle of the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartRateConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but no sample for longer than the staleness threshold
    Stale,
}

impl fmt::Display for HeartRateConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HeartRateConnectionState::Disconnected => "disconnected",
            HeartRateConnectionState::Connecting => "connecting",
            HeartRateConnectionState::Connected => "connected",
            HeartRateConnectionState::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// What a state update changed, for the controller to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartRateChange {
    None,
    StateChanged(HeartRateConnectionState),
    LowBattery(u8),
}

/// Sensor connection state, battery, rolling history and session aggregates.
///
/// Staleness is advisory: a stale session is still connected and returns to
/// `Connected` on the next sample.
#[derive(Debug, Clone)]
pub struct HeartRateSession {
    state: HeartRateConnectionState,
    battery_percent: Option<u8>,
    history: VecDeque<HeartRateSample>,
    /// Newest sample time, or connection time before the first sample
    last_activity_millis: Option<i64>,
    history_window_ms: i64,
    stale_after_ms: i64,
    low_battery_percent: u8,
    low_battery_reported: bool,
    zones: HRZoneConfig,
    tally: ZoneTally,
}

impl HeartRateSession {
    pub fn new(config: &HeartRateConfig) -> Self {
        Self {
            state: HeartRateConnectionState::Disconnected,
            battery_percent: None,
            history: VecDeque::new(),
            last_activity_millis: None,
            history_window_ms: config.history_window_ms,
            stale_after_ms: config.stale_after_ms,
            low_battery_percent: config.low_battery_percent,
            low_battery_reported: false,
            zones: HRZoneConfig::from_max_hr(config.max_heart_rate),
            tally: ZoneTally::default(),
        }
    }

    pub fn state(&self) -> HeartRateConnectionState {
        self.state
    }

    pub fn battery_percent(&self) -> Option<u8> {
        self.battery_percent
    }

    pub fn is_linked(&self) -> bool {
        matches!(
            self.state,
            HeartRateConnectionState::Connected | HeartRateConnectionState::Stale
        )
    }

    pub fn begin_connect(&mut self) -> HeartRateChange {
        self.transition(HeartRateConnectionState::Connecting)
    }

    pub fn on_connected(&mut self, now_millis: i64) -> HeartRateChange {
        self.last_activity_millis = Some(now_millis);
        self.transition(HeartRateConnectionState::Connected)
    }

    /// Explicit stop, device-level disconnect or failed connect.
    pub fn on_disconnected(&mut self) -> HeartRateChange {
        self.last_activity_millis = None;
        self.transition(HeartRateConnectionState::Disconnected)
    }

    /// Record a sample, pruning history older than the rolling window.
    pub fn record(&mut self, sample: HeartRateSample) -> HeartRateChange {
        let cutoff = sample.timestamp_millis - self.history_window_ms;
        while self
            .history
            .front()
            .is_some_and(|s| s.timestamp_millis < cutoff)
        {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.tally.add(sample.bpm, &self.zones);
        self.last_activity_millis = Some(sample.timestamp_millis);
        debug!("[HeartRateSession] {} bpm", sample.bpm);

        if self.state == HeartRateConnectionState::Stale {
            info!("[HeartRateSession] Sensor data resumed");
            return self.transition(HeartRateConnectionState::Connected);
        }
        HeartRateChange::None
    }

    /// Update the battery level. Connection state is not affected.
    ///
    /// Reports `LowBattery` once per drop below the threshold.
    pub fn update_battery(&mut self, percent: u8) -> HeartRateChange {
        self.battery_percent = Some(percent);
        if percent < self.low_battery_percent {
            if !self.low_battery_reported {
                self.low_battery_reported = true;
                warn!("[HeartRateSession] Sensor battery low ({}%)", percent);
                return HeartRateChange::LowBattery(percent);
            }
        } else {
            self.low_battery_reported = false;
        }
        HeartRateChange::None
    }

    /// Compare the newest sample time against `now_millis`.
    pub fn refresh_staleness(&mut self, now_millis: i64) -> HeartRateChange {
        if self.state != HeartRateConnectionState::Connected {
            return HeartRateChange::None;
        }
        match self.last_activity_millis {
            Some(last) if now_millis - last > self.stale_after_ms => {
                warn!(
                    "[HeartRateSession] No heart-rate data for {}s",
                    (now_millis - last) / 1000
                );
                self.transition(HeartRateConnectionState::Stale)
            }
            _ => HeartRateChange::None,
        }
    }

    pub fn latest(&self) -> Option<HeartRateSample> {
        self.history.back().copied()
    }

    /// The latest bpm, only while the sensor is connected and fresh.
    pub fn current_bpm(&self) -> Option<u8> {
        match self.state {
            HeartRateConnectionState::Connected => self.latest().map(|s| s.bpm),
            _ => None,
        }
    }

    /// Samples within the rolling window, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HeartRateSample> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Average over every sample since the last reset, not only the window.
    pub fn average_bpm(&self) -> Option<f64> {
        self.tally.average()
    }

    pub fn peak_bpm(&self) -> Option<u8> {
        self.tally.peak()
    }

    pub fn zone_distribution(&self) -> HRZoneDistribution {
        self.tally.distribution()
    }

    /// Clear samples and aggregates for a new activity. Connection and battery
    /// are kept.
    pub fn reset_metrics(&mut self) {
        self.history.clear();
        self.tally = ZoneTally::default();
    }

    fn transition(&mut self, next: HeartRateConnectionState) -> HeartRateChange {
        if self.state == next {
            return HeartRateChange::None;
        }
        debug!("[HeartRateSession] {} -> {}", self.state, next);
        self.state = next;
        HeartRateChange::StateChanged(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bpm: u8, ts: i64) -> HeartRateSample {
        HeartRateSample {
            bpm,
            timestamp_millis: ts,
        }
    }

    fn connected() -> HeartRateSession {
        let mut s = HeartRateSession::new(&HeartRateConfig::default());
        s.begin_connect();
        s.on_connected(0);
        s
    }

    #[test]
    fn test_lifecycle() {
        let mut s = HeartRateSession::new(&HeartRateConfig::default());
        assert_eq!(s.state(), HeartRateConnectionState::Disconnected);
        assert_eq!(
            s.begin_connect(),
            HeartRateChange::StateChanged(HeartRateConnectionState::Connecting)
        );
        assert_eq!(
            s.on_connected(0),
            HeartRateChange::StateChanged(HeartRateConnectionState::Connected)
        );
        assert!(s.is_linked());
        assert_eq!(
            s.on_disconnected(),
            HeartRateChange::StateChanged(HeartRateConnectionState::Disconnected)
        );
        assert_eq!(s.on_disconnected(), HeartRateChange::None);
    }

    #[test]
    fn test_history_pruned_on_insert() {
        let mut s = connected();
        let minute = 60_000;
        for i in 0..=40 {
            s.record(sample(120, i * minute));
        }
        // 30-minute window ending at minute 40 keeps minutes 10..=40
        assert_eq!(s.history_len(), 31);
        assert_eq!(s.history().next().unwrap().timestamp_millis, 10 * minute);

        // Aggregates cover the whole session
        assert_eq!(s.zone_distribution().total_samples, 41);
    }

    #[test]
    fn test_staleness_is_advisory() {
        let mut s = connected();
        s.record(sample(130, 1_000));
        assert_eq!(s.refresh_staleness(31_000), HeartRateChange::None);
        assert_eq!(
            s.refresh_staleness(31_001),
            HeartRateChange::StateChanged(HeartRateConnectionState::Stale)
        );
        assert!(s.is_linked());
        assert_eq!(s.current_bpm(), None);
        assert_eq!(s.refresh_staleness(90_000), HeartRateChange::None);

        assert_eq!(
            s.record(sample(135, 95_000)),
            HeartRateChange::StateChanged(HeartRateConnectionState::Connected)
        );
        assert_eq!(s.current_bpm(), Some(135));
    }

    #[test]
    fn test_stale_without_any_sample() {
        let mut s = connected();
        assert_eq!(
            s.refresh_staleness(30_001),
            HeartRateChange::StateChanged(HeartRateConnectionState::Stale)
        );
    }

    #[test]
    fn test_battery_does_not_touch_connection() {
        let mut s = connected();
        assert_eq!(s.update_battery(80), HeartRateChange::None);
        assert_eq!(s.update_battery(19), HeartRateChange::LowBattery(19));
        assert_eq!(s.update_battery(18), HeartRateChange::None);
        assert_eq!(s.battery_percent(), Some(18));
        assert_eq!(s.state(), HeartRateConnectionState::Connected);

        // Recharged, then low again
        s.update_battery(60);
        assert_eq!(s.update_battery(10), HeartRateChange::LowBattery(10));
    }

    #[test]
    fn test_aggregates_and_reset() {
        let mut s = connected();
        s.record(sample(100, 1));
        s.record(sample(150, 2));
        s.record(sample(170, 3));
        assert_eq!(s.average_bpm(), Some(140.0));
        assert_eq!(s.peak_bpm(), Some(170));

        s.update_battery(55);
        s.reset_metrics();
        assert_eq!(s.average_bpm(), None);
        assert_eq!(s.history_len(), 0);
        assert_eq!(s.battery_percent(), Some(55));
        assert_eq!(s.state(), HeartRateConnectionState::Connected);
    }
}
