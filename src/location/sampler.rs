//! GeoSampler: normalization, bounded retry, continuous watch and
//! single-shot recovery on top of a [`LocationProvider`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::provider::{LocationOptions, LocationProvider, PermissionStatus, RawFix};
use super::signal::GpsSignalState;
use crate::config::LocationConfig;
use crate::error::LocationError;
use crate::PositionSample;

/// Handle of a running continuous watch.
///
/// `stop` only requests cancellation. The forwarding task sees it at its next
/// poll, so a fix it is already delivering (or one delivered before it is
/// scheduled again) can still reach the callback after `stop` returns.
/// Consumers must discard such late fixes themselves; the controller tags
/// every fix with a segment generation and drops stale ones.
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Wraps the platform location provider.
#[derive(Clone)]
pub struct GeoSampler {
    provider: Arc<dyn LocationProvider>,
    config: LocationConfig,
}

impl GeoSampler {
    pub fn new(provider: Arc<dyn LocationProvider>, config: LocationConfig) -> Self {
        Self { provider, config }
    }

    pub fn is_supported(&self) -> bool {
        self.provider.is_supported()
    }

    pub fn options(&self) -> LocationOptions {
        LocationOptions::from(&self.config)
    }

    pub async fn permission_status(&self) -> PermissionStatus {
        self.provider.permission_status().await
    }

    /// Grade a sample's accuracy.
    pub fn classify(&self, sample: &PositionSample) -> GpsSignalState {
        GpsSignalState::from_accuracy(Some(sample.horizontal_accuracy_m), &self.config)
    }

    /// Turn a raw fix into a [`PositionSample`].
    ///
    /// A fix without an accuracy estimate, or with impossible coordinates, is
    /// a sensor failure rather than a sample.
    pub fn normalize(raw: &RawFix) -> Result<PositionSample, LocationError> {
        let accuracy = match raw.accuracy {
            Some(a) if a.is_finite() && a >= 0.0 => a,
            _ => return Err(LocationError::Unavailable),
        };

        let sample = PositionSample {
            latitude: raw.latitude,
            longitude: raw.longitude,
            elevation: raw.altitude.filter(|e| e.is_finite()),
            horizontal_accuracy_m: accuracy,
            speed_mps: raw.speed.filter(|s| s.is_finite() && *s >= 0.0),
            timestamp_millis: raw.timestamp_millis,
        };

        if !sample.is_valid() {
            return Err(LocationError::Unavailable);
        }
        Ok(sample)
    }

    /// One provider request, no retries.
    pub async fn probe(&self) -> Result<PositionSample, LocationError> {
        if !self.provider.is_supported() {
            return Err(LocationError::Unsupported);
        }
        let options = self.options();
        let request = self.provider.get_once(&options);
        let raw = if self.config.timeout_ms > 0 {
            tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), request)
                .await
                .map_err(|_| LocationError::Timeout)??
        } else {
            request.await?
        };
        Self::normalize(&raw)
    }

    /// A single fresh sample.
    ///
    /// Transient failures are retried up to `fix_retry_attempts` times with
    /// `fix_retry_backoff_ms` between attempts. The budget is local to this
    /// call.
    pub async fn get_once(&self) -> Result<PositionSample, LocationError> {
        let backoff = Duration::from_millis(self.config.fix_retry_backoff_ms);
        let mut retries_left = self.config.fix_retry_attempts;

        loop {
            match self.probe().await {
                Ok(sample) => return Ok(sample),
                Err(err) if err.is_transient() && retries_left > 0 => {
                    retries_left -= 1;
                    debug!(
                        "[GeoSampler] Fix attempt failed ({}), {} retries left",
                        err, retries_left
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    warn!("[GeoSampler] No fix: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Begin continuous observation.
    ///
    /// Permission is checked first; a denied permission fails immediately and
    /// the provider's watch is never started. Each fix (or in-stream error) is
    /// handed to `on_event` until `parent` or the returned handle is cancelled.
    /// Errors never stop the watch.
    pub async fn start<F>(
        &self,
        parent: &CancellationToken,
        on_event: F,
    ) -> Result<WatchHandle, LocationError>
    where
        F: Fn(Result<PositionSample, LocationError>) + Send + 'static,
    {
        self.ensure_permitted().await?;

        let mut stream = self.provider.watch(&self.options()).await?;
        let token = parent.child_token();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = task_token.cancelled() => {
                        debug!("[GeoSampler] Watch cancelled");
                        break;
                    }

                    item = stream.next() => match item {
                        Some(Ok(raw)) => on_event(GeoSampler::normalize(&raw)),
                        Some(Err(err)) => on_event(Err(err)),
                        None => {
                            warn!("[GeoSampler] Location stream ended");
                            break;
                        }
                    }
                }
            }
        });

        info!("[GeoSampler] Watching location");
        Ok(WatchHandle { token, task })
    }

    /// Schedule the single recovery probe after a stream failure.
    ///
    /// After `recovery_delay_ms` one [`get_once`](Self::get_once) is issued and
    /// its result handed to `on_result`. Nothing further is retried.
    pub fn schedule_recovery<F>(&self, parent: &CancellationToken, on_result: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<PositionSample, LocationError>) + Send + 'static,
    {
        let sampler = self.clone();
        let token = parent.child_token();
        let delay = Duration::from_millis(self.config.recovery_delay_ms);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                r = sampler.get_once() => r,
            };
            match &result {
                Ok(_) => info!("[GeoSampler] Recovery probe succeeded"),
                Err(err) => warn!("[GeoSampler] Recovery probe failed: {}", err),
            }
            on_result(result);
        })
    }

    async fn ensure_permitted(&self) -> Result<(), LocationError> {
        if !self.provider.is_supported() {
            return Err(LocationError::Unsupported);
        }
        if self.provider.permission_status().await == PermissionStatus::Denied {
            warn!("[GeoSampler] Location permission denied");
            return Err(LocationError::PermissionDenied);
        }
        Ok(())
    }
}
