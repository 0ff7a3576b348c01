//! The finished activity record and live snapshots.

use serde::{Deserialize, Serialize};

use super::events::Advisory;
use super::state::{SessionState, TrackingState};
use crate::config::SplitConfig;
use crate::heart_rate::{HRZoneDistribution, HeartRateConnectionState, HeartRateSession};
use crate::location::GpsSignalState;
use crate::pace::pace_min_per_km;
use crate::splits::Split;
use crate::{ActivityType, HeartRateSample, PositionSample};

/// Heart-rate part of the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSummary {
    /// Average over the whole session
    pub average: Option<f64>,
    pub peak: Option<u8>,
    /// The rolling window at finish
    pub history: Vec<HeartRateSample>,
    pub final_battery: Option<u8>,
    pub zones: Option<HRZoneDistribution>,
}

/// Terminal artifact of a session, handed to the persistence sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity_type: ActivityType,
    pub route: Vec<PositionSample>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub moving_time_seconds: f64,
    pub total_ascent_meters: f64,
    pub average_pace_min_per_km: Option<f64>,
    pub splits: Vec<Split>,
    pub heart_rate_summary: HeartRateSummary,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub auto_splits_enabled: bool,
}

impl ActivityRecord {
    /// Build the record from the session state at finish.
    ///
    /// The session is not modified; a partial closing split is added to the
    /// record only.
    pub fn assemble(
        session: &SessionState,
        heart_rate: &HeartRateSession,
        activity_type: ActivityType,
        split_config: &SplitConfig,
        end_timestamp: i64,
    ) -> Self {
        let total_distance = session.distance.total_distance_m();
        let moving_time = session.pace.moving_time_seconds();

        let mut splits = session.splits.history().to_vec();
        if split_config.record_partial_final_split {
            // Split timestamps follow the fixes, not the wall clock
            let last_fix = session
                .route
                .last()
                .map_or(end_timestamp, |s| s.timestamp_millis);
            let snapshot = session.split_snapshot(heart_rate.current_bpm(), last_fix);
            if let Some(partial) =
                session
                    .splits
                    .final_partial(total_distance, session.duration_seconds, &snapshot)
            {
                splits.push(partial);
            }
        }

        let heart_rate_summary = HeartRateSummary {
            average: heart_rate.average_bpm(),
            peak: heart_rate.peak_bpm(),
            history: heart_rate.history().copied().collect(),
            final_battery: heart_rate.battery_percent(),
            zones: heart_rate.peak_bpm().map(|_| heart_rate.zone_distribution()),
        };

        Self {
            activity_type,
            route: session.route.samples().to_vec(),
            total_distance_meters: total_distance,
            total_duration_seconds: session.duration_seconds,
            moving_time_seconds: moving_time,
            total_ascent_meters: session.distance.total_ascent_m(),
            average_pace_min_per_km: pace_min_per_km(moving_time, total_distance),
            splits,
            heart_rate_summary,
            start_timestamp: session.started_at.unwrap_or(end_timestamp),
            end_timestamp,
            auto_splits_enabled: split_config.auto_splits,
        }
    }

    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_meters / 1000.0
    }
}

/// Consistent read-only view of the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub state: TrackingState,
    pub signal: GpsSignalState,
    pub activity_type: ActivityType,
    pub total_distance_m: f64,
    pub total_ascent_m: f64,
    pub duration_seconds: f64,
    pub moving_time_seconds: f64,
    pub average_pace_min_per_km: Option<f64>,
    pub current_pace_min_per_km: Option<f64>,
    pub smoothed_speed_mps: f64,
    pub route_points: usize,
    pub heart_rate_bpm: Option<u8>,
    pub heart_rate_battery: Option<u8>,
    pub heart_rate_state: HeartRateConnectionState,
    pub split_count: usize,
    /// Trailing window of splits, oldest first
    pub recent_splits: Vec<Split>,
    pub advisory: Option<Advisory>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartRateConfig;

    fn session_with_distance() -> SessionState {
        let config = SplitConfig::default();
        let mut session = SessionState::new(&config);
        session.started_at = Some(1_000);
        session.splits.set_origin(1_000);
        let samples = [
            PositionSample::new(0.0, 0.0, 1_000).with_elevation(5.0),
            PositionSample::new(0.0, 0.009, 61_000).with_elevation(9.0),
            PositionSample::new(0.0, 0.0135, 91_000).with_elevation(7.0),
        ];
        let mut prev: Option<PositionSample> = None;
        for s in samples {
            session.distance.add_sample(prev.as_ref(), &s);
            session.pace.on_tick(30.0, true);
            session.duration_seconds += 30.0;
            session.route.push(s);
            let total = session.distance.total_distance_m();
            let snap = session.split_snapshot(None, s.timestamp_millis);
            session.splits.check_and_emit(total, session.duration_seconds, &snap);
            prev = Some(s);
        }
        session
    }

    #[test]
    fn test_assemble_adds_partial_split() {
        let session = session_with_distance();
        let hr = HeartRateSession::new(&HeartRateConfig::default());
        let record = ActivityRecord::assemble(
            &session,
            &hr,
            ActivityType::Running,
            &SplitConfig::default(),
            100_000,
        );

        assert_eq!(record.route.len(), 3);
        assert_eq!(record.splits.len(), 2);
        assert!(!record.splits[0].partial);
        assert!(record.splits[1].partial);
        assert_eq!(record.splits[0].duration_seconds, 60.0);
        assert_eq!(record.splits[1].duration_seconds, 30.0);
        assert_eq!(record.splits[1].timestamp_millis, 91_000);
        assert!((record.total_distance_km() - 1.501).abs() < 0.01);
        assert_eq!(record.total_ascent_meters, 4.0);
        assert_eq!(record.start_timestamp, 1_000);
        assert!(record.average_pace_min_per_km.is_some());
        assert_eq!(record.heart_rate_summary, HeartRateSummary::default());

        // The recorder itself is untouched
        assert_eq!(session.splits.history().len(), 1);
    }

    #[test]
    fn test_assemble_without_partial_split() {
        let session = session_with_distance();
        let hr = HeartRateSession::new(&HeartRateConfig::default());
        let config = SplitConfig {
            record_partial_final_split: false,
            ..SplitConfig::default()
        };
        let record = ActivityRecord::assemble(&session, &hr, ActivityType::Hiking, &config, 100_000);
        assert_eq!(record.splits.len(), 1);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let session = session_with_distance();
        let hr = HeartRateSession::new(&HeartRateConfig::default());
        let record = ActivityRecord::assemble(
            &session,
            &hr,
            ActivityType::Cycling,
            &SplitConfig::default(),
            100_000,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"activityType\":\"cycling\""));
        assert!(json.contains("\"totalAscentMeters\":4.0"));
        let back: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
