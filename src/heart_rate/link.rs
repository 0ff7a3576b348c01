//! Background task driving one sensor connection.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::frames::{decode_battery, decode_heart_rate};
use super::transport::{DeviceFilter, HeartRateTransport};
use crate::error::SensorError;

/// Events produced by a link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    ConnectFailed(SensorError),
    HeartRate(u8),
    Battery(u8),
    /// The device went away on its own
    DeviceDisconnected,
}

/// Connect to a sensor and forward its notifications until `token` is
/// cancelled or the device disconnects.
///
/// Cancellation triggers a best-effort `disconnect` inside the task, so the
/// caller never waits on the device round-trip.
pub fn spawn_link<F>(
    transport: Arc<dyn HeartRateTransport>,
    filter: DeviceFilter,
    token: CancellationToken,
    on_event: F,
) -> JoinHandle<()>
where
    F: Fn(LinkEvent) + Send + 'static,
{
    tokio::spawn(async move {
        if !transport.is_supported() {
            on_event(LinkEvent::ConnectFailed(SensorError::BluetoothUnsupported));
            return;
        }

        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            r = transport.connect(&filter) => Some(r),
        };
        match connected {
            None => {
                debug!("[HeartRateLink] Cancelled during handshake");
                return;
            }
            Some(Err(err)) => {
                warn!("[HeartRateLink] Connect failed: {}", err);
                on_event(LinkEvent::ConnectFailed(err));
                return;
            }
            Some(Ok(())) => {}
        }

        let mut heart_rate = match transport.heart_rate_frames().await {
            Ok(s) => s,
            Err(err) => {
                warn!("[HeartRateLink] Heart-rate notifications unavailable: {}", err);
                on_event(LinkEvent::ConnectFailed(err));
                if let Err(err) = transport.disconnect().await {
                    debug!("[HeartRateLink] Disconnect after failed setup: {}", err);
                }
                return;
            }
        };
        // Battery service is optional
        let mut battery = match transport.battery_frames().await {
            Ok(s) => s,
            Err(err) => {
                debug!("[HeartRateLink] No battery notifications: {}", err);
                stream::empty().boxed()
            }
        };
        let mut battery_open = true;

        info!("[HeartRateLink] Sensor connected");
        on_event(LinkEvent::Connected);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    if let Err(err) = transport.disconnect().await {
                        warn!("[HeartRateLink] Disconnect failed: {}", err);
                    }
                    info!("[HeartRateLink] Sensor disconnected");
                    return;
                }

                frame = heart_rate.next() => match frame {
                    Some(frame) => match decode_heart_rate(&frame) {
                        Ok(bpm) => on_event(LinkEvent::HeartRate(bpm)),
                        Err(err) => warn!("[HeartRateLink] Skipping frame: {}", err),
                    },
                    None => {
                        warn!("[HeartRateLink] Device disconnected");
                        on_event(LinkEvent::DeviceDisconnected);
                        return;
                    }
                },

                frame = battery.next(), if battery_open => match frame {
                    Some(frame) => match decode_battery(&frame) {
                        Ok(pct) => on_event(LinkEvent::Battery(pct)),
                        Err(err) => warn!("[HeartRateLink] Skipping battery frame: {}", err),
                    },
                    None => battery_open = false,
                },
            }
        }
    })
}
