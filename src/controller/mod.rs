//! ActivityController: the tracking state machine.
//!
//! The controller exclusively owns all session state. Location fixes, clock
//! ticks, recovery probes, idle signal probes and heart-rate link events are
//! produced by background tasks and funnelled through one unbounded queue;
//! [`ActivityController::pump`] applies them one at a time, so no two
//! updates interleave.
//!
//! Every producer is started under a [`CancellationToken`] and tags its events
//! with a generation number. Stopping a segment cancels its token and bumps
//! the generation, so late events already sitting in the queue are ignored.

mod events;
mod record;
mod state;

pub use events::{Advisory, Notice, TrackerEvent};
pub use record::{ActivityRecord, HeartRateSummary, TrackingSnapshot};
pub use state::{SessionState, TrackingState};

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::error::{LocationError, Result, SensorError, TrackerError, ValidationError};
use crate::geo_utils::sample_distance;
use crate::heart_rate::{
    spawn_link, HeartRateChange, HeartRateSession, HeartRateTransport, LinkEvent,
};
use crate::location::{GeoSampler, GpsSignalState, LocationProvider, PermissionStatus, WatchHandle};
use crate::route::{MapPosition, Route};
use crate::sinks::{ActivitySink, MapSink, MapStyle, NoopMapSink};
use crate::splits::Split;
use crate::{ActivityType, HeartRateSample, PositionSample};

/// Background producers of one active segment.
struct Segment {
    token: CancellationToken,
    watch: WatchHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Idle,
    Pending,
    /// The probe failed; no more automatic probes until a fix arrives
    Exhausted,
}

/// Orchestrates sampling, metrics, splits and heart rate for one activity at
/// a time.
pub struct ActivityController {
    config: TrackerConfig,
    sampler: GeoSampler,
    sink: Arc<dyn ActivitySink>,
    map: Arc<dyn MapSink>,
    clock: Arc<dyn Clock>,
    heart_rate_transport: Option<Arc<dyn HeartRateTransport>>,

    state: TrackingState,
    signal: GpsSignalState,
    activity_type: ActivityType,
    map_style: MapStyle,
    session: SessionState,
    heart_rate: HeartRateSession,
    pending_record: Option<ActivityRecord>,
    advisory: Option<Advisory>,

    events_tx: mpsc::UnboundedSender<TrackerEvent>,
    events_rx: mpsc::UnboundedReceiver<TrackerEvent>,
    lifetime: CancellationToken,
    initialized: bool,
    segment: Option<Segment>,
    segment_generation: u64,
    recovery: Recovery,
    idle_monitor: Option<CancellationToken>,
    monitor_generation: u64,
    heart_rate_link: Option<CancellationToken>,
    heart_rate_generation: u64,
}

impl ActivityController {
    pub fn new(
        config: TrackerConfig,
        provider: Arc<dyn LocationProvider>,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            sampler: GeoSampler::new(provider, config.location.clone()),
            session: SessionState::new(&config.splits),
            heart_rate: HeartRateSession::new(&config.heart_rate),
            config,
            sink,
            map: Arc::new(NoopMapSink),
            clock: Arc::new(SystemClock),
            heart_rate_transport: None,
            state: TrackingState::Idle,
            signal: GpsSignalState::Initializing,
            activity_type: ActivityType::default(),
            map_style: MapStyle::default(),
            pending_record: None,
            advisory: None,
            events_tx,
            events_rx,
            lifetime: CancellationToken::new(),
            initialized: false,
            segment: None,
            segment_generation: 0,
            recovery: Recovery::Idle,
            idle_monitor: None,
            monitor_generation: 0,
            heart_rate_link: None,
            heart_rate_generation: 0,
        }
    }

    pub fn with_heart_rate(mut self, transport: Arc<dyn HeartRateTransport>) -> Self {
        self.heart_rate_transport = Some(transport);
        self
    }

    pub fn with_map_sink(mut self, map: Arc<dyn MapSink>) -> Self {
        self.map = map;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn signal(&self) -> GpsSignalState {
        self.signal
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn route(&self) -> &Route {
        &self.session.route
    }

    pub fn splits(&self) -> &[Split] {
        self.session.splits.history()
    }

    pub fn heart_rate(&self) -> &HeartRateSession {
        &self.heart_rate
    }

    /// The record awaiting save or discard.
    pub fn pending_record(&self) -> Option<&ActivityRecord> {
        self.pending_record.as_ref()
    }

    pub fn segment_generation(&self) -> u64 {
        self.segment_generation
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    pub fn set_activity_type(&mut self, activity_type: ActivityType) {
        self.activity_type = activity_type;
    }

    pub fn cycle_activity_type(&mut self) -> ActivityType {
        self.activity_type = self.activity_type.next();
        self.activity_type
    }

    pub fn map_style(&self) -> MapStyle {
        self.map_style
    }

    pub fn cycle_map_style(&mut self) -> MapStyle {
        self.map_style = self.map_style.next();
        self.map_style
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        let pace = self.session.pace.state();
        TrackingSnapshot {
            state: self.state,
            signal: self.signal,
            activity_type: self.activity_type,
            total_distance_m: self.session.distance.total_distance_m(),
            total_ascent_m: self.session.distance.total_ascent_m(),
            duration_seconds: self.session.duration_seconds,
            moving_time_seconds: pace.moving_time_seconds,
            average_pace_min_per_km: pace.average_pace_min_per_km,
            current_pace_min_per_km: pace.current_pace_min_per_km,
            smoothed_speed_mps: pace.smoothed_speed_mps,
            route_points: self.session.route.len(),
            heart_rate_bpm: self.heart_rate.current_bpm(),
            heart_rate_battery: self.heart_rate.battery_percent(),
            heart_rate_state: self.heart_rate.state(),
            split_count: self.session.splits.history().len(),
            recent_splits: self.session.splits.recent().cloned().collect(),
            advisory: self.advisory.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Feature-detect the location capability and start watching the signal.
    ///
    /// A platform without location support is the only fatal error.
    pub async fn initialize(&mut self) -> Result<()> {
        if !self.sampler.is_supported() {
            error!("[ActivityController] Location services not supported");
            return Err(LocationError::Unsupported.into());
        }
        self.initialized = true;

        if self.sampler.permission_status().await == PermissionStatus::Denied {
            warn!("[ActivityController] Location permission denied");
            self.set_signal(GpsSignalState::Denied);
        } else {
            self.set_signal(GpsSignalState::Searching);
            self.start_idle_monitor();
        }
        info!("[ActivityController] Initialized (signal {})", self.signal);
        Ok(())
    }

    /// Cancel every background task. The controller cannot be used afterwards.
    pub fn dispose(&mut self) {
        self.lifetime.cancel();
        self.segment = None;
        self.idle_monitor = None;
        self.heart_rate_link = None;
        self.segment_generation += 1;
        self.monitor_generation += 1;
        self.heart_rate_generation += 1;
        self.initialized = false;
        info!("[ActivityController] Disposed");
    }

    /// Explicit re-acquisition of the GPS signal, the only way out of
    /// `lost` or `denied` while idle.
    pub async fn refresh_signal(&mut self) -> Result<GpsSignalState> {
        if !self.sampler.is_supported() {
            return Err(LocationError::Unsupported.into());
        }
        let outcome = if self.sampler.permission_status().await == PermissionStatus::Denied {
            Err(LocationError::PermissionDenied)
        } else {
            self.sampler.get_once().await
        };

        let result = match outcome {
            Ok(sample) => {
                let graded = self.sampler.classify(&sample);
                self.set_signal(graded);
                if self.state == TrackingState::Idle {
                    self.map.fly_to(MapPosition::from(&sample));
                }
                Ok(self.signal)
            }
            Err(err) => {
                self.set_signal(match err {
                    LocationError::PermissionDenied => GpsSignalState::Denied,
                    _ => GpsSignalState::Lost,
                });
                Err(err.into())
            }
        };

        if self.state == TrackingState::Idle && self.initialized {
            self.stop_idle_monitor();
            if self.signal != GpsSignalState::Denied {
                self.start_idle_monitor();
            }
        }
        result
    }

    /// `idle -> searching -> active`. Resets all accumulators.
    ///
    /// Rejected (controller stays idle) unless the signal is at least
    /// acquired.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != TrackingState::Idle {
            return Err(self.invalid("start"));
        }
        self.begin_segment(true).await?;
        info!(
            "[ActivityController] Tracking started ({})",
            self.activity_type.label()
        );
        Ok(())
    }

    /// `paused -> active` or `finishing -> active`, through the same sequence
    /// as [`start`](Self::start) but keeping accumulated state.
    pub async fn resume(&mut self) -> Result<()> {
        let from = self.state;
        if !matches!(from, TrackingState::Paused | TrackingState::Finishing) {
            return Err(self.invalid("resume"));
        }
        self.begin_segment(false).await?;
        if from == TrackingState::Finishing {
            self.pending_record = None;
        }
        info!("[ActivityController] Tracking resumed from {}", from);
        Ok(())
    }

    /// `active -> paused`. Stops the location stream and the clock.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != TrackingState::Active {
            return Err(self.invalid("pause"));
        }
        self.end_segment();
        self.session.pace.halt();
        self.state = TrackingState::Paused;
        info!(
            "[ActivityController] Paused at {:.3} km",
            self.session.distance.total_distance_m() / 1000.0
        );
        Ok(())
    }

    /// `active/paused -> finishing`. Assembles the record.
    pub fn finish(&mut self) -> Result<ActivityRecord> {
        if !matches!(self.state, TrackingState::Active | TrackingState::Paused) {
            return Err(self.invalid("finish"));
        }
        self.end_segment();
        self.session.pace.halt();

        let record = ActivityRecord::assemble(
            &self.session,
            &self.heart_rate,
            self.activity_type,
            &self.config.splits,
            self.clock.now_millis(),
        );
        info!(
            "[ActivityController] Finished: {:.3} km, {} splits, {:.0}s",
            record.total_distance_km(),
            record.splits.len(),
            record.total_duration_seconds
        );
        self.pending_record = Some(record.clone());
        self.state = TrackingState::Finishing;
        Ok(record)
    }

    /// Persist the pending record, then return to idle.
    ///
    /// On failure the record is kept so the save can be retried.
    pub async fn save(&mut self) -> Result<()> {
        let Some(record) = self.pending_record.clone() else {
            return Err(self.invalid("save"));
        };
        if self.state != TrackingState::Finishing {
            return Err(self.invalid("save"));
        }

        let sink = Arc::clone(&self.sink);
        let result = sink.persist(&record).await;
        match result {
            Ok(()) => {
                info!("[ActivityController] Activity saved");
                self.reset_to_idle();
                Ok(())
            }
            Err(err) => {
                warn!("[ActivityController] Save failed, record kept: {}", err);
                Err(err.into())
            }
        }
    }

    /// Drop the pending record and return to idle.
    pub fn discard(&mut self) -> Result<()> {
        if self.state != TrackingState::Finishing {
            return Err(self.invalid("discard"));
        }
        info!("[ActivityController] Activity discarded");
        self.reset_to_idle();
        Ok(())
    }

    /// Lap button: record a split at the current distance.
    pub fn record_split(&mut self) -> Result<Option<Split>> {
        if self.state != TrackingState::Active {
            return Err(self.invalid("record a split"));
        }
        let timestamp = self
            .session
            .route
            .last()
            .map(|s| s.timestamp_millis)
            .unwrap_or_else(|| self.clock.now_millis());
        let snapshot = self
            .session
            .split_snapshot(self.heart_rate.current_bpm(), timestamp);
        let split = self.session.splits.record_manual(
            self.session.distance.total_distance_m(),
            self.session.duration_seconds,
            &snapshot,
        );
        if let Some(split) = &split {
            info!("[ActivityController] Manual split {}", split.split_number);
        }
        Ok(split)
    }

    // ------------------------------------------------------------------
    // Heart rate
    // ------------------------------------------------------------------

    /// Start connecting to the wearable without waiting for the handshake.
    pub fn connect_heart_rate(&mut self) -> Result<()> {
        let Some(transport) = self.heart_rate_transport.clone() else {
            return Err(SensorError::BluetoothUnsupported.into());
        };
        if !transport.is_supported() {
            return Err(SensorError::BluetoothUnsupported.into());
        }
        if self.heart_rate_link.is_some() {
            return Ok(());
        }

        self.heart_rate_generation += 1;
        let generation = self.heart_rate_generation;
        let token = self.lifetime.child_token();
        let tx = self.events_tx.clone();
        spawn_link(
            transport,
            self.config.heart_rate.device_filter.clone(),
            token.clone(),
            move |event| {
                let _ = tx.send(TrackerEvent::HeartRate { generation, event });
            },
        );
        self.heart_rate_link = Some(token);
        self.heart_rate.begin_connect();
        info!("[ActivityController] Connecting heart-rate sensor");
        Ok(())
    }

    /// Disconnect the wearable. Returns immediately; the device round-trip
    /// happens in the link task.
    pub fn disconnect_heart_rate(&mut self) {
        if let Some(token) = self.heart_rate_link.take() {
            token.cancel();
            self.heart_rate_generation += 1;
            info!("[ActivityController] Heart-rate sensor disconnecting");
        }
        self.heart_rate.on_disconnected();
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    /// Wait for the next queued event and apply it.
    pub async fn pump(&mut self) -> Vec<Notice> {
        match self.events_rx.recv().await {
            Some(event) => self.handle(event),
            None => Vec::new(),
        }
    }

    /// Apply every event already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            notices.extend(self.handle(event));
        }
        notices
    }

    /// Apply one event.
    pub fn handle(&mut self, event: TrackerEvent) -> Vec<Notice> {
        match event {
            TrackerEvent::Fix { generation, result } if self.is_current(generation) => {
                self.on_fix(result)
            }
            TrackerEvent::Tick { generation } if self.is_current(generation) => self.on_tick(),
            TrackerEvent::Recovery { generation, result } if self.is_current(generation) => {
                self.on_recovery(result)
            }
            TrackerEvent::SignalProbe { generation, result }
                if generation == self.monitor_generation
                    && self.state == TrackingState::Idle =>
            {
                self.on_probe(result)
            }
            TrackerEvent::HeartRate { generation, event }
                if generation == self.heart_rate_generation =>
            {
                self.on_link_event(event)
            }
            stale => {
                debug!("[ActivityController] Ignoring late event {:?}", stale);
                Vec::new()
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.segment_generation
            && self.state == TrackingState::Active
            && self.segment.is_some()
    }

    fn on_fix(&mut self, result: std::result::Result<PositionSample, LocationError>) -> Vec<Notice> {
        let mut notices = Vec::new();
        match result {
            Ok(sample) => {
                let was_degraded = self.signal.is_degraded();
                let graded = self.sampler.classify(&sample);
                notices.extend(self.set_signal(graded));
                if was_degraded {
                    notices.push(self.raise(Advisory::GpsRecovered));
                }
                self.recovery = Recovery::Idle;
                notices.extend(self.ingest(sample));
            }
            Err(err) => {
                warn!("[ActivityController] Location error while active: {}", err);
                let signal = match err {
                    LocationError::PermissionDenied => GpsSignalState::Denied,
                    _ => GpsSignalState::Lost,
                };
                notices.extend(self.set_signal(signal));
                notices.push(self.raise(Advisory::GpsDegraded(err)));
                if err != LocationError::PermissionDenied && self.recovery == Recovery::Idle {
                    self.schedule_recovery();
                }
            }
        }
        notices
    }

    fn on_tick(&mut self) -> Vec<Notice> {
        let tick_seconds = self.config.session.tick_interval_ms as f64 / 1000.0;
        self.session.duration_seconds += tick_seconds;

        let moving = self
            .session
            .pace
            .is_moving(self.config.session.moving_speed_threshold_mps);
        let moving_time = self.session.pace.on_tick(tick_seconds, moving);
        self.session
            .pace
            .recompute(moving_time, self.session.distance.total_distance_m());

        let mut notices = Vec::new();
        let change = self.heart_rate.refresh_staleness(self.clock.now_millis());
        if let Some(notice) = self.heart_rate_notice(change) {
            notices.push(notice);
            notices.push(self.raise(Advisory::HeartRateStale));
        }
        notices
    }

    fn on_recovery(
        &mut self,
        result: std::result::Result<PositionSample, LocationError>,
    ) -> Vec<Notice> {
        let mut notices = Vec::new();
        match result {
            Ok(_) => {
                self.recovery = Recovery::Idle;
                notices.extend(self.set_signal(GpsSignalState::Acquired));
                notices.push(self.raise(Advisory::GpsRecovered));
            }
            Err(err) => {
                self.recovery = Recovery::Exhausted;
                warn!(
                    "[ActivityController] GPS still unavailable ({}); no further automatic retries",
                    err
                );
                if err == LocationError::PermissionDenied {
                    notices.extend(self.set_signal(GpsSignalState::Denied));
                }
            }
        }
        notices
    }

    fn on_probe(&mut self, result: std::result::Result<PositionSample, LocationError>) -> Vec<Notice> {
        match result {
            Ok(sample) => {
                self.map.fly_to(MapPosition::from(&sample));
                let graded = self.sampler.classify(&sample);
                self.set_signal(graded).into_iter().collect()
            }
            Err(LocationError::PermissionDenied) => {
                self.set_signal(GpsSignalState::Denied).into_iter().collect()
            }
            // Still searching until a first reading arrives
            Err(_) if self.signal == GpsSignalState::Searching => Vec::new(),
            Err(err) => {
                debug!("[ActivityController] Idle probe failed: {}", err);
                self.set_signal(GpsSignalState::Lost).into_iter().collect()
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) -> Vec<Notice> {
        let now = self.clock.now_millis();
        let mut notices = Vec::new();
        match event {
            LinkEvent::Connected => {
                info!("[ActivityController] Heart-rate sensor connected");
                let change = self.heart_rate.on_connected(now);
                notices.extend(self.heart_rate_notice(change));
            }
            LinkEvent::ConnectFailed(err) => {
                warn!("[ActivityController] Heart-rate connect failed: {}", err);
                self.heart_rate_link = None;
                let change = self.heart_rate.on_disconnected();
                notices.extend(self.heart_rate_notice(change));
                notices.push(self.raise(Advisory::HeartRateError(err)));
            }
            LinkEvent::HeartRate(bpm) => {
                let change = self.heart_rate.record(HeartRateSample {
                    bpm,
                    timestamp_millis: now,
                });
                notices.extend(self.heart_rate_notice(change));
                notices.push(Notice::HeartRate(bpm));
            }
            LinkEvent::Battery(percent) => {
                let change = self.heart_rate.update_battery(percent);
                notices.extend(self.heart_rate_notice(change));
            }
            LinkEvent::DeviceDisconnected => {
                warn!("[ActivityController] Heart-rate sensor lost");
                self.heart_rate_link = None;
                let change = self.heart_rate.on_disconnected();
                notices.extend(self.heart_rate_notice(change));
                notices.push(self.raise(Advisory::HeartRateDisconnected));
            }
        }
        notices
    }

    /// Append an accepted sample and update every accumulator.
    fn ingest(&mut self, sample: PositionSample) -> Vec<Notice> {
        if let Some(last) = self.session.route.last() {
            if sample.timestamp_millis <= last.timestamp_millis {
                warn!(
                    "[ActivityController] Dropping out-of-order sample ({} <= {})",
                    sample.timestamp_millis, last.timestamp_millis
                );
                return Vec::new();
            }
        }

        let prev = self.session.last_sample;
        if let Some(prev) = &prev {
            let gap = sample_distance(prev, &sample);
            if gap < self.config.session.min_segment_distance_m {
                debug!("[ActivityController] Dropping {:.1}m jitter", gap);
                return Vec::new();
            }
        }

        let delta = self.session.distance.add_sample(prev.as_ref(), &sample);
        let segment = prev.map(|p| {
            let elapsed = (sample.timestamp_millis - p.timestamp_millis) as f64 / 1000.0;
            self.session.pace.on_segment(delta.segment_distance_m, elapsed);
            (delta.segment_distance_m, elapsed)
        });
        self.observe_speed(&sample, segment);

        if self.session.route.is_empty() {
            self.session.splits.set_origin(sample.timestamp_millis);
        }
        self.session.route.push(sample);
        self.session.last_sample = Some(sample);

        let total = self.session.distance.total_distance_m();
        debug!(
            "[ActivityController] Sample #{} (+{:.1}m, total {:.1}m)",
            self.session.route.len(),
            delta.segment_distance_m,
            total
        );
        let mut notices = vec![Notice::SampleRecorded {
            total_distance_m: total,
        }];

        if self.config.splits.auto_splits {
            let snapshot = self
                .session
                .split_snapshot(self.heart_rate.current_bpm(), sample.timestamp_millis);
            if let Some(split) =
                self.session
                    .splits
                    .check_and_emit(total, self.session.duration_seconds, &snapshot)
            {
                info!(
                    "[ActivityController] Split {} ({:.3} km)",
                    split.split_number, split.distance_km
                );
                notices.push(Notice::SplitRecorded(split));
            }
        }

        self.render_map(&sample);
        notices
    }

    /// Feed the speed smoother, skipping inaccurate samples and outliers.
    fn observe_speed(&mut self, sample: &PositionSample, segment: Option<(f64, f64)>) {
        let session = &self.config.session;
        if sample.horizontal_accuracy_m > session.speed_accuracy_ceiling_m {
            return;
        }
        let raw = sample.speed_mps.or_else(|| {
            segment.and_then(|(distance, elapsed)| (elapsed > 0.0).then(|| distance / elapsed))
        });
        match raw {
            Some(speed) if speed <= session.max_plausible_speed_mps => {
                self.session.pace.observe_speed(speed);
            }
            Some(speed) => {
                warn!("[ActivityController] Ignoring implausible speed {:.1} m/s", speed);
            }
            None => {}
        }
    }

    /// Appends the newest position; the full route is only sent for the
    /// first sample and, when simplifying, every `map_full_render_every`
    /// samples.
    fn render_map(&self, latest: &PositionSample) {
        let map_config = &self.config.session;
        let count = self.session.route.len();
        let position = MapPosition::from(latest);
        if count <= 1 {
            self.map.render_route(&[position]);
        } else if map_config.map_simplify_tolerance_deg > 0.0
            && count % map_config.map_full_render_every.max(1) == 0
        {
            let positions = self
                .session
                .route
                .map_positions(map_config.map_simplify_tolerance_deg);
            self.map.render_route(&positions);
        } else {
            self.map.append_route(&[position]);
        }
        self.map.fly_to(position);
    }

    // ------------------------------------------------------------------
    // Segment plumbing
    // ------------------------------------------------------------------

    /// The shared start / resume sequence.
    async fn begin_segment(&mut self, fresh: bool) -> Result<()> {
        if !self.signal.allows_start() {
            warn!(
                "[ActivityController] Start rejected, signal is {}",
                self.signal
            );
            return Err(ValidationError::InsufficientSignal {
                signal: self.signal,
            }
            .into());
        }

        let mut search = SearchGuard::enter(self);

        let initial = match search.acquire_initial_fix().await {
            Ok(sample) => sample,
            Err(err) => {
                search.set_signal(Self::signal_for_error(err));
                return Err(err.into());
            }
        };

        search.segment_generation += 1;
        let generation = search.segment_generation;
        let token = search.lifetime.child_token();
        search.pending = Some(token.clone());
        let tx = search.events_tx.clone();
        let watch = match search
            .sampler
            .start(&token, move |result| {
                let _ = tx.send(TrackerEvent::Fix { generation, result });
            })
            .await
        {
            Ok(watch) => watch,
            Err(err) => {
                search.set_signal(Self::signal_for_error(err));
                return Err(err.into());
            }
        };
        // No await past this point: the segment goes live atomically
        search.pending = None;
        let this: &mut ActivityController = &mut search;

        this.spawn_ticker(&token, generation);
        this.stop_idle_monitor();

        if fresh {
            this.session
                .reset(&this.config.splits, this.clock.now_millis());
            this.heart_rate.reset_metrics();
            this.advisory = None;
        }
        this.session.last_sample = None;
        this.recovery = Recovery::Idle;
        this.segment = Some(Segment { token, watch });
        this.state = TrackingState::Active;

        let graded = this.sampler.classify(&initial);
        this.set_signal(graded);
        this.ingest(initial);

        if fresh && this.heart_rate_transport.is_some() && this.heart_rate_link.is_none() {
            if let Err(err) = this.connect_heart_rate() {
                warn!("[ActivityController] Heart-rate unavailable: {}", err);
                if let TrackerError::Sensor(err) = err {
                    this.raise(Advisory::HeartRateError(err));
                }
            }
        }
        Ok(())
    }

    /// Initial fix with `start_fix_attempts` attempts, `start_retry_delay_ms`
    /// apart.
    async fn acquire_initial_fix(&self) -> std::result::Result<PositionSample, LocationError> {
        let delay = Duration::from_millis(self.config.session.start_retry_delay_ms);
        let attempts = self.config.session.start_fix_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sampler.get_once().await {
                Ok(sample) => return Ok(sample),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(
                        "[ActivityController] Initial fix attempt {}/{} failed: {}",
                        attempt, attempts, err
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn end_segment(&mut self) {
        if let Some(segment) = self.segment.take() {
            segment.watch.stop();
            segment.token.cancel();
        }
        self.segment_generation += 1;
        self.recovery = Recovery::Idle;
    }

    fn spawn_ticker(&self, token: &CancellationToken, generation: u64) {
        let period = Duration::from_millis(self.config.session.tick_interval_ms);
        let tx = self.events_tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(TrackerEvent::Tick { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn schedule_recovery(&mut self) {
        let Some(token) = self.segment.as_ref().map(|s| s.token.clone()) else {
            return;
        };
        self.recovery = Recovery::Pending;
        let generation = self.segment_generation;
        let tx = self.events_tx.clone();
        self.sampler.schedule_recovery(&token, move |result| {
            let _ = tx.send(TrackerEvent::Recovery { generation, result });
        });
        info!(
            "[ActivityController] Recovery probe in {}ms",
            self.config.location.recovery_delay_ms
        );
    }

    fn start_idle_monitor(&mut self) {
        let interval_ms = self.config.location.idle_probe_interval_ms;
        if interval_ms == 0 || self.idle_monitor.is_some() || self.lifetime.is_cancelled() {
            return;
        }
        self.monitor_generation += 1;
        let generation = self.monitor_generation;
        let token = self.lifetime.child_token();
        let task_token = token.clone();
        let sampler = self.sampler.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    r = sampler.probe() => r,
                };
                let denied = result == Err(LocationError::PermissionDenied);
                if tx.send(TrackerEvent::SignalProbe { generation, result }).is_err() || denied {
                    break;
                }
            }
        });
        self.idle_monitor = Some(token);
        debug!("[ActivityController] Idle signal monitor started");
    }

    fn stop_idle_monitor(&mut self) {
        if let Some(token) = self.idle_monitor.take() {
            token.cancel();
            self.monitor_generation += 1;
        }
    }

    fn reset_to_idle(&mut self) {
        self.pending_record = None;
        self.session = SessionState::new(&self.config.splits);
        self.disconnect_heart_rate();
        self.heart_rate.reset_metrics();
        self.advisory = None;
        self.state = TrackingState::Idle;
        if self.initialized {
            self.start_idle_monitor();
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn set_signal(&mut self, signal: GpsSignalState) -> Option<Notice> {
        if self.signal == signal {
            return None;
        }
        debug!("[ActivityController] GPS signal {} -> {}", self.signal, signal);
        self.signal = signal;
        Some(Notice::SignalChanged(signal))
    }

    fn signal_for_error(err: LocationError) -> GpsSignalState {
        match err {
            LocationError::PermissionDenied => GpsSignalState::Denied,
            _ => GpsSignalState::Lost,
        }
    }

    fn raise(&mut self, advisory: Advisory) -> Notice {
        info!("[ActivityController] Advisory: {}", advisory);
        self.advisory = Some(advisory.clone());
        Notice::Advisory(advisory)
    }

    fn heart_rate_notice(&mut self, change: HeartRateChange) -> Option<Notice> {
        match change {
            HeartRateChange::None => None,
            HeartRateChange::StateChanged(state) => Some(Notice::HeartRateStateChanged(state)),
            HeartRateChange::LowBattery(percent) => Some(self.raise(Advisory::LowBattery(percent))),
        }
    }

    fn invalid(&self, action: &'static str) -> TrackerError {
        ValidationError::InvalidTransition {
            from: self.state,
            action,
        }
        .into()
    }
}

impl Drop for ActivityController {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

/// Holds the controller in `Searching` while a segment is being opened.
///
/// Dropping it before the segment goes live (an error, or the caller dropping
/// the `start`/`resume` future) restores the previous state and cancels any
/// half-started watch.
struct SearchGuard<'a> {
    controller: &'a mut ActivityController,
    previous: TrackingState,
    pending: Option<CancellationToken>,
}

impl<'a> SearchGuard<'a> {
    fn enter(controller: &'a mut ActivityController) -> Self {
        let previous = controller.state;
        controller.state = TrackingState::Searching;
        Self {
            controller,
            previous,
            pending: None,
        }
    }
}

impl Deref for SearchGuard<'_> {
    type Target = ActivityController;

    fn deref(&self) -> &ActivityController {
        self.controller
    }
}

impl DerefMut for SearchGuard<'_> {
    fn deref_mut(&mut self) -> &mut ActivityController {
        self.controller
    }
}

impl Drop for SearchGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
            // Fixes already queued by the aborted watch are stale
            self.controller.segment_generation += 1;
        }
        if self.controller.state == TrackingState::Searching {
            debug!(
                "[ActivityController] Segment not opened, back to {}",
                self.previous
            );
            self.controller.state = self.previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemoryActivityStore;
    use crate::synthetic::{fix, ScriptedHeartRateTransport, ScriptedLocationProvider};
    use crate::ManualClock;

    struct Harness {
        provider: Arc<ScriptedLocationProvider>,
        store: Arc<MemoryActivityStore>,
        clock: Arc<ManualClock>,
        controller: ActivityController,
    }

    /// Idle monitor disabled so provider call counts stay deterministic.
    fn harness(mut config: TrackerConfig) -> Harness {
        config.location.idle_probe_interval_ms = 0;
        let provider = Arc::new(ScriptedLocationProvider::new());
        let store = Arc::new(MemoryActivityStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let controller = ActivityController::new(config, provider.clone(), store.clone())
            .with_clock(clock.clone());
        Harness {
            provider,
            store,
            clock,
            controller,
        }
    }

    async fn active(config: TrackerConfig) -> Harness {
        let mut h = harness(config);
        h.provider.set_position(fix(0.0, 0.0, 1_000));
        h.controller.initialize().await.unwrap();
        h.controller.refresh_signal().await.unwrap();
        h.controller.start().await.unwrap();
        h
    }

    fn fix_event(c: &ActivityController, lat: f64, lng: f64, ts: i64) -> TrackerEvent {
        TrackerEvent::Fix {
            generation: c.segment_generation(),
            result: GeoSampler::normalize(&fix(lat, lng, ts)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_while_searching() {
        let mut h = harness(TrackerConfig::default());
        h.controller.initialize().await.unwrap();
        assert_eq!(h.controller.signal(), GpsSignalState::Searching);

        let err = h.controller.start().await.unwrap_err();
        assert_eq!(
            err,
            TrackerError::Validation(ValidationError::InsufficientSignal {
                signal: GpsSignalState::Searching
            })
        );
        assert!(err.is_recoverable());
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.provider.watch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_platform_is_fatal() {
        let mut h = harness(TrackerConfig::default());
        h.provider.set_supported(false);
        let err = h.controller.initialize().await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_good_signal() {
        let h = active(TrackerConfig::default()).await;
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert_eq!(h.controller.signal(), GpsSignalState::Good);
        assert_eq!(h.controller.route().len(), 1);
        assert_eq!(h.controller.snapshot().total_distance_m, 0.0);
        assert!(h.provider.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fix_failure_returns_to_idle() {
        let mut h = harness(TrackerConfig::default());
        h.provider.set_position(fix(0.0, 0.0, 1_000));
        h.controller.initialize().await.unwrap();
        h.controller.refresh_signal().await.unwrap();
        h.provider.clear_position();

        let err = h.controller.start().await.unwrap_err();
        assert_eq!(err, TrackerError::Location(LocationError::Timeout));
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert_eq!(h.controller.signal(), GpsSignalState::Lost);
        // three start attempts, each with the sampler's own retry budget
        assert_eq!(h.provider.once_calls() - 1, 3 * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_returns_to_idle() {
        let mut h = harness(TrackerConfig::default());
        h.provider.set_position(fix(0.0, 0.0, 1_000));
        h.controller.initialize().await.unwrap();
        h.controller.refresh_signal().await.unwrap();
        h.provider.clear_position();

        // The caller gives up while the initial fix is still being awaited
        let abandoned =
            tokio::time::timeout(Duration::from_millis(500), h.controller.start()).await;
        assert!(abandoned.is_err());
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert!(!h.provider.is_watching());

        h.provider.set_position(fix(0.0, 0.0, 2_000));
        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state(), TrackingState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_resume_stays_paused() {
        let mut h = active(TrackerConfig::default()).await;
        h.controller.pause().unwrap();
        h.provider.clear_position();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(500), h.controller.resume()).await;
        assert!(abandoned.is_err());
        assert_eq!(h.controller.state(), TrackingState::Paused);

        h.provider.set_position(fix(0.0, 0.0, 90_000));
        h.controller.resume().await.unwrap();
        assert_eq!(h.controller.state(), TrackingState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixes_accumulate_and_split() {
        let mut h = active(TrackerConfig::default()).await;
        let c = &mut h.controller;

        let e1 = fix_event(c, 0.0, 0.009, 61_000);
        let notices = c.handle(e1);
        assert!(notices.iter().any(|n| matches!(n, Notice::SplitRecorded(_))));

        let e2 = fix_event(c, 0.0, 0.018, 121_000);
        let notices = c.handle(e2);
        assert!(notices.iter().any(|n| matches!(n, Notice::SplitRecorded(s) if s.split_number == 2)));
        assert_eq!(c.splits().len(), 2);
        assert_eq!(c.snapshot().total_ascent_m, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_and_jitter_dropped() {
        let mut config = TrackerConfig::default();
        config.session.min_segment_distance_m = 5.0;
        let mut h = active(config).await;
        let c = &mut h.controller;

        // ~1.1 m away: jitter
        let jitter = fix_event(c, 0.0, 0.00001, 2_000);
        assert!(c.handle(jitter).is_empty());
        // Older than the last accepted sample
        let old = fix_event(c, 0.0, 0.001, 500);
        assert!(c.handle(old).is_empty());
        assert_eq!(c.route().len(), 1);

        let good = fix_event(c, 0.0, 0.001, 3_000);
        assert!(!c.handle(good).is_empty());
        assert_eq!(c.route().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_accrue_moving_time_and_average_pace() {
        let mut h = active(TrackerConfig::default()).await;
        let c = &mut h.controller;
        let generation = c.segment_generation();
        c.handle(fix_event(c, 0.0, 0.009, 61_000));
        for _ in 0..60 {
            c.handle(TrackerEvent::Tick { generation });
        }
        let snap = c.snapshot();
        assert_eq!(snap.duration_seconds, 60.0);
        assert_eq!(snap.moving_time_seconds, 60.0);
        let pace = snap.average_pace_min_per_km.unwrap();
        assert!((pace - 60.0 / 60.0 / (snap.total_distance_m / 1000.0)).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_events_ignored_after_pause() {
        let mut h = active(TrackerConfig::default()).await;
        let c = &mut h.controller;
        let stale = fix_event(c, 0.0, 0.009, 61_000);
        c.pause().unwrap();
        assert!(c.handle(stale).is_empty());
        assert_eq!(c.route().len(), 1);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!h.provider.is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_forwarded_before_stop_is_discarded() {
        let mut h = active(TrackerConfig::default()).await;
        assert!(h.provider.emit(Ok(fix(0.0, 0.009, 61_000))));
        // Let the watch task forward the fix into the controller queue
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        h.controller.pause().unwrap();
        assert!(h.controller.drain().is_empty());
        assert_eq!(h.controller.route().len(), 1);
        assert_eq!(h.controller.snapshot().total_distance_m, 0.0);
    }

    #[derive(Default)]
    struct CountingMap {
        full: std::sync::Mutex<Vec<usize>>,
        appended: std::sync::Mutex<usize>,
    }

    impl MapSink for CountingMap {
        fn render_route(&self, positions: &[MapPosition]) {
            self.full.lock().unwrap().push(positions.len());
        }

        fn append_route(&self, positions: &[MapPosition]) {
            *self.appended.lock().unwrap() += positions.len();
        }

        fn fly_to(&self, _position: MapPosition) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_simplified_route_rerendered_periodically() {
        let mut config = TrackerConfig::default();
        config.session.map_simplify_tolerance_deg = 0.000_01;
        config.session.map_full_render_every = 2;
        let mut h = harness(config);
        let map = Arc::new(CountingMap::default());
        h.controller = h.controller.with_map_sink(map.clone());
        h.provider.set_position(fix(0.0, 0.0, 1_000));
        h.controller.initialize().await.unwrap();
        h.controller.refresh_signal().await.unwrap();
        h.controller.start().await.unwrap();

        let c = &mut h.controller;
        for (i, lng) in [0.001, 0.002, 0.003].into_iter().enumerate() {
            let event = fix_event(c, 0.0, lng, 11_000 + i as i64 * 10_000);
            c.handle(event);
        }

        // First fix, then every second one; the rest are appended
        assert_eq!(map.full.lock().unwrap().len(), 3);
        assert_eq!(*map.appended.lock().unwrap(), 1);
        // Collinear points simplify to the two endpoints
        assert_eq!(map.full.lock().unwrap().last(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_error_schedules_single_recovery() {
        let mut h = active(TrackerConfig::default()).await;
        let generation = h.controller.segment_generation();
        let notices = h.controller.handle(TrackerEvent::Fix {
            generation,
            result: Err(LocationError::Unavailable),
        });
        assert!(notices.contains(&Notice::SignalChanged(GpsSignalState::Lost)));
        assert_eq!(h.controller.state(), TrackingState::Active);

        // Second error while the probe is pending does not schedule another
        h.controller.handle(TrackerEvent::Fix {
            generation,
            result: Err(LocationError::Timeout),
        });

        let calls_before = h.provider.once_calls();
        loop {
            let notices = h.controller.pump().await;
            if notices.contains(&Notice::SignalChanged(GpsSignalState::Acquired)) {
                break;
            }
        }
        assert_eq!(h.provider.once_calls(), calls_before + 1);
        assert_eq!(h.controller.snapshot().advisory, Some(Advisory::GpsRecovered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_keeps_record() {
        let mut h = active(TrackerConfig::default()).await;
        let c = &mut h.controller;
        c.handle(fix_event(c, 0.0, 0.0045, 31_000));
        let record = c.finish().unwrap();
        assert_eq!(c.state(), TrackingState::Finishing);

        h.store.fail_next(1);
        assert!(matches!(
            c.save().await,
            Err(TrackerError::Persist(_))
        ));
        assert_eq!(c.state(), TrackingState::Finishing);
        assert_eq!(c.pending_record(), Some(&record));

        c.save().await.unwrap();
        assert_eq!(c.state(), TrackingState::Idle);
        assert_eq!(h.store.len(), 1);
        assert_eq!(c.route().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_finishing() {
        let mut h = active(TrackerConfig::default()).await;
        h.controller
            .handle(fix_event(&h.controller, 0.0, 0.0045, 31_000));
        h.controller.finish().unwrap();

        h.provider.set_position(fix(0.0, 0.005, 40_000));
        h.controller.resume().await.unwrap();
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert!(h.controller.pending_record().is_none());
        assert_eq!(h.controller.route().len(), 3);
        // Ground covered while finishing is not credited
        assert!((h.controller.snapshot().total_distance_m - 500.38).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_and_invalid_transitions() {
        let mut h = active(TrackerConfig::default()).await;
        assert!(h.controller.discard().is_err());
        h.controller.finish().unwrap();
        assert!(h.controller.pause().is_err());
        h.controller.discard().unwrap();
        assert_eq!(h.controller.state(), TrackingState::Idle);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_split() {
        let mut h = active(TrackerConfig::default()).await;
        let c = &mut h.controller;
        assert_eq!(c.record_split().unwrap(), None);
        c.handle(fix_event(c, 0.0, 0.0036, 120_000));
        let lap = c.record_split().unwrap().unwrap();
        assert_eq!(lap.split_number, 1);
        assert!(lap.distance_km > 0.39 && lap.distance_km < 0.41);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_connect_failure_is_advisory() {
        let transport = Arc::new(ScriptedHeartRateTransport::new());
        transport.fail_connect(SensorError::DeviceNotFound);
        let mut h = harness(TrackerConfig::default());
        h.controller = h.controller.with_heart_rate(transport.clone());
        h.provider.set_position(fix(0.0, 0.0, 1_000));
        h.controller.initialize().await.unwrap();
        h.controller.refresh_signal().await.unwrap();
        h.controller.start().await.unwrap();

        loop {
            let notices = h.controller.pump().await;
            if notices.contains(&Notice::Advisory(Advisory::HeartRateError(
                SensorError::DeviceNotFound,
            ))) {
                break;
            }
        }
        assert_eq!(h.controller.state(), TrackingState::Active);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_samples_and_staleness() {
        let transport = Arc::new(ScriptedHeartRateTransport::new());
        let mut h = active(TrackerConfig::default()).await;
        h.controller.heart_rate_transport = Some(transport.clone());
        h.controller.connect_heart_rate().unwrap();

        loop {
            let notices = h.controller.pump().await;
            if notices.contains(&Notice::HeartRateStateChanged(
                crate::heart_rate::HeartRateConnectionState::Connected,
            )) {
                break;
            }
        }
        transport.push_heart_rate(140);
        loop {
            if h.controller.pump().await.contains(&Notice::HeartRate(140)) {
                break;
            }
        }
        assert_eq!(h.controller.snapshot().heart_rate_bpm, Some(140));

        h.clock.advance(31_000);
        let generation = h.controller.segment_generation();
        let notices = h.controller.handle(TrackerEvent::Tick { generation });
        assert!(notices.contains(&Notice::Advisory(Advisory::HeartRateStale)));
        assert_eq!(h.controller.snapshot().heart_rate_bpm, None);
    }
}
