//! Scripted collaborators and synthetic routes.
//!
//! [`ScriptedLocationProvider`] and [`ScriptedHeartRateTransport`] stand in
//! for the platform: tests decide what the next fix, frame or failure is.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};

use crate::error::{LocationError, SensorError};
use crate::heart_rate::{DeviceFilter, HeartRateTransport};
use crate::location::{LocationOptions, LocationProvider, PermissionStatus, RawFix};

/// Degrees of longitude per kilometer at the equator (approximately).
pub const EQUATOR_DEG_PER_KM: f64 = 0.009;

/// A fix with 5 m accuracy and no altitude or speed.
pub fn fix(latitude: f64, longitude: f64, timestamp_millis: i64) -> RawFix {
    RawFix {
        latitude,
        longitude,
        altitude: None,
        accuracy: Some(5.0),
        speed: None,
        timestamp_millis,
    }
}

/// `points` fixes heading east along the equator from (0, 0).
pub fn equator_route(points: usize, step_deg: f64, interval_ms: i64, start_ms: i64) -> Vec<RawFix> {
    (0..points)
        .map(|i| fix(0.0, i as f64 * step_deg, start_ms + i as i64 * interval_ms))
        .collect()
}

/// Attach altitudes to a route; extra fixes keep their altitude.
pub fn with_altitudes(mut route: Vec<RawFix>, altitudes: &[f64]) -> Vec<RawFix> {
    for (f, &alt) in route.iter_mut().zip(altitudes) {
        f.altitude = Some(alt);
    }
    route
}

type FixResult = Result<RawFix, LocationError>;

struct LocationScript {
    supported: bool,
    permission: PermissionStatus,
    position: Option<RawFix>,
    once_queue: VecDeque<FixResult>,
    once_calls: usize,
    watch_calls: usize,
    watch_error: Option<LocationError>,
    watch_tx: Option<mpsc::UnboundedSender<FixResult>>,
}

/// Location provider driven by the test.
///
/// `get_once` answers from the queue first, then with the current position,
/// and times out when neither is set. Each `watch` opens a fresh stream fed by
/// [`emit`](Self::emit).
pub struct ScriptedLocationProvider {
    script: Mutex<LocationScript>,
}

impl Default for ScriptedLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLocationProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(LocationScript {
                supported: true,
                permission: PermissionStatus::Granted,
                position: None,
                once_queue: VecDeque::new(),
                once_calls: 0,
                watch_calls: 0,
                watch_error: None,
                watch_tx: None,
            }),
        }
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut LocationScript) -> R) -> R {
        let mut guard = self.script.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_supported(&self, supported: bool) {
        self.with_script(|s| s.supported = supported);
    }

    pub fn set_permission(&self, permission: PermissionStatus) {
        self.with_script(|s| s.permission = permission);
    }

    pub fn set_position(&self, position: RawFix) {
        self.with_script(|s| s.position = Some(position));
    }

    pub fn clear_position(&self) {
        self.with_script(|s| s.position = None);
    }

    pub fn queue_once(&self, result: FixResult) {
        self.with_script(|s| s.once_queue.push_back(result));
    }

    pub fn fail_watch(&self, error: Option<LocationError>) {
        self.with_script(|s| s.watch_error = error);
    }

    /// Push an item into the active watch. Returns false if nobody is watching.
    pub fn emit(&self, item: FixResult) -> bool {
        self.with_script(|s| match &s.watch_tx {
            Some(tx) => tx.unbounded_send(item).is_ok(),
            None => false,
        })
    }

    /// End the active watch stream.
    pub fn end_watch(&self) {
        self.with_script(|s| s.watch_tx = None);
    }

    pub fn is_watching(&self) -> bool {
        self.with_script(|s| s.watch_tx.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    pub fn once_calls(&self) -> usize {
        self.with_script(|s| s.once_calls)
    }

    pub fn watch_calls(&self) -> usize {
        self.with_script(|s| s.watch_calls)
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocationProvider {
    fn is_supported(&self) -> bool {
        self.with_script(|s| s.supported)
    }

    async fn permission_status(&self) -> PermissionStatus {
        self.with_script(|s| s.permission)
    }

    async fn get_once(&self, _options: &LocationOptions) -> FixResult {
        self.with_script(|s| {
            s.once_calls += 1;
            if let Some(result) = s.once_queue.pop_front() {
                return result;
            }
            if s.permission == PermissionStatus::Denied {
                return Err(LocationError::PermissionDenied);
            }
            s.position.ok_or(LocationError::Timeout)
        })
    }

    async fn watch(
        &self,
        _options: &LocationOptions,
    ) -> Result<BoxStream<'static, FixResult>, LocationError> {
        self.with_script(|s| {
            s.watch_calls += 1;
            if let Some(err) = s.watch_error {
                return Err(err);
            }
            let (tx, rx) = mpsc::unbounded();
            s.watch_tx = Some(tx);
            Ok(rx.boxed())
        })
    }
}

struct SensorScript {
    supported: bool,
    connect_error: Option<SensorError>,
    heart_rate_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    battery_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    connect_calls: usize,
    disconnect_calls: usize,
}

/// Heart-rate transport driven by the test.
pub struct ScriptedHeartRateTransport {
    script: Mutex<SensorScript>,
}

impl Default for ScriptedHeartRateTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHeartRateTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(SensorScript {
                supported: true,
                connect_error: None,
                heart_rate_tx: None,
                battery_tx: None,
                connect_calls: 0,
                disconnect_calls: 0,
            }),
        }
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut SensorScript) -> R) -> R {
        let mut guard = self.script.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_supported(&self, supported: bool) {
        self.with_script(|s| s.supported = supported);
    }

    pub fn fail_connect(&self, error: SensorError) {
        self.with_script(|s| s.connect_error = Some(error));
    }

    /// Send a standard measurement frame (flags byte, then bpm).
    pub fn push_heart_rate(&self, bpm: u8) -> bool {
        self.push_raw_heart_rate_frame(vec![0x00, bpm])
    }

    pub fn push_raw_heart_rate_frame(&self, frame: Vec<u8>) -> bool {
        self.with_script(|s| match &s.heart_rate_tx {
            Some(tx) => tx.unbounded_send(frame).is_ok(),
            None => false,
        })
    }

    pub fn push_battery(&self, percent: u8) -> bool {
        self.with_script(|s| match &s.battery_tx {
            Some(tx) => tx.unbounded_send(vec![percent]).is_ok(),
            None => false,
        })
    }

    /// Simulate the device going out of range.
    pub fn drop_device(&self) {
        self.with_script(|s| {
            s.heart_rate_tx = None;
            s.battery_tx = None;
        });
    }

    pub fn connect_calls(&self) -> usize {
        self.with_script(|s| s.connect_calls)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.with_script(|s| s.disconnect_calls)
    }
}

#[async_trait]
impl HeartRateTransport for ScriptedHeartRateTransport {
    fn is_supported(&self) -> bool {
        self.with_script(|s| s.supported)
    }

    async fn connect(&self, _filter: &DeviceFilter) -> Result<(), SensorError> {
        self.with_script(|s| {
            s.connect_calls += 1;
            match &s.connect_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }

    async fn heart_rate_frames(&self) -> Result<BoxStream<'static, Vec<u8>>, SensorError> {
        self.with_script(|s| {
            let (tx, rx) = mpsc::unbounded();
            s.heart_rate_tx = Some(tx);
            Ok(rx.boxed())
        })
    }

    async fn battery_frames(&self) -> Result<BoxStream<'static, Vec<u8>>, SensorError> {
        self.with_script(|s| {
            let (tx, rx) = mpsc::unbounded();
            s.battery_tx = Some(tx);
            Ok(rx.boxed())
        })
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.with_script(|s| {
            s.disconnect_calls += 1;
            s.heart_rate_tx = None;
            s.battery_tx = None;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_distance;

    #[test]
    fn test_equator_route_spacing() {
        let route = equator_route(3, EQUATOR_DEG_PER_KM, 60_000, 1_000);
        assert_eq!(route.len(), 3);
        assert_eq!(route[2].timestamp_millis, 121_000);
        let d = haversine_distance(0.0, 0.0, 0.0, route[1].longitude);
        assert!((d - 1000.8).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_with_altitudes() {
        let route = with_altitudes(equator_route(3, 0.001, 1_000, 0), &[1.0, 2.0]);
        assert_eq!(route[1].altitude, Some(2.0));
        assert_eq!(route[2].altitude, None);
    }
}
