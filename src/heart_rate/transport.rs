//! Wireless heart-rate transport seam.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::SensorError;

/// Device discovery filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    /// Service a device must advertise to be offered
    pub services: Vec<String>,
    /// Device name prefixes to offer
    pub name_prefixes: Vec<String>,
    /// Services read when present, such as the battery level
    pub optional_services: Vec<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            services: vec!["heart_rate".to_string()],
            name_prefixes: vec!["Garmin".to_string(), "Polar".to_string()],
            optional_services: vec!["battery_service".to_string()],
        }
    }
}

impl DeviceFilter {
    /// Whether an advertised device matches the filter.
    pub fn matches(&self, name: &str, advertised_services: &[&str]) -> bool {
        let name_ok = self.name_prefixes.is_empty()
            || self.name_prefixes.iter().any(|p| name.starts_with(p.as_str()));
        let services_ok = self
            .services
            .iter()
            .all(|s| advertised_services.contains(&s.as_str()));
        name_ok && services_ok
    }
}

/// Connection to a heart-rate wearable.
///
/// Frames are raw characteristic values; decoding happens in
/// [`frames`](super::frames).
#[async_trait]
pub trait HeartRateTransport: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Discover a device matching `filter` and complete the handshake.
    async fn connect(&self, filter: &DeviceFilter) -> Result<(), SensorError>;

    /// Heart-rate measurement notifications. Ends when the device disconnects.
    async fn heart_rate_frames(&self) -> Result<BoxStream<'static, Vec<u8>>, SensorError>;

    /// Battery level notifications, independent of the heart-rate stream.
    async fn battery_frames(&self) -> Result<BoxStream<'static, Vec<u8>>, SensorError>;

    async fn disconnect(&self) -> Result<(), SensorError>;
}
