//! Notification frame decoding.

use crate::error::SensorError;

/// Offset of the BPM byte in a heart-rate measurement frame (byte 0 is flags).
pub const HEART_RATE_OFFSET: usize = 1;

/// Offset of the percentage byte in a battery level frame.
pub const BATTERY_OFFSET: usize = 0;

pub fn decode_heart_rate(frame: &[u8]) -> Result<u8, SensorError> {
    frame
        .get(HEART_RATE_OFFSET)
        .copied()
        .ok_or(SensorError::MalformedFrame { len: frame.len() })
}

/// Battery percentage, clamped to 100.
pub fn decode_battery(frame: &[u8]) -> Result<u8, SensorError> {
    frame
        .get(BATTERY_OFFSET)
        .map(|&pct| pct.min(100))
        .ok_or(SensorError::MalformedFrame { len: frame.len() })
}
