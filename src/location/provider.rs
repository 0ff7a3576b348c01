//! Platform location provider seam.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::LocationConfig;
use crate::error::LocationError;

/// Options passed to every provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    pub max_fix_age_ms: u64,
}

impl From<&LocationConfig> for LocationOptions {
    fn from(config: &LocationConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            timeout_ms: config.timeout_ms,
            max_fix_age_ms: config.max_fix_age_ms,
        }
    }
}

/// Answer of the platform's permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    /// The platform will ask the user on first use
    Prompt,
    Denied,
}

/// A fix as the platform reports it, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Absent when the sensor could not estimate accuracy
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp_millis: i64,
}

/// The platform's location capability.
///
/// Implementations are consumed, never provided, by this crate (apart from
/// the scripted provider used in tests).
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Feature detection. `false` is the one fatal condition.
    fn is_supported(&self) -> bool;

    async fn permission_status(&self) -> PermissionStatus;

    /// A single fresh fix.
    async fn get_once(&self, options: &LocationOptions) -> Result<RawFix, LocationError>;

    /// Continuous fixes. Errors are delivered in-stream; the stream ends when
    /// the provider gives up.
    async fn watch(
        &self,
        options: &LocationOptions,
    ) -> Result<BoxStream<'static, Result<RawFix, LocationError>>, LocationError>;
}
