//! # SQLite Activity Store
//!
//! Append-only storage for finished activities.
//!
//! ## Layout
//!
//! - Summary columns (type, distance, durations, pace, timestamps) are plain
//!   SQL values so listings never touch the blobs.
//! - The route and the heart-rate summary are MessagePack blobs.
//! - Splits are stored as JSON text, readable with the SQLite JSON functions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{params, Connection, Row};

use crate::controller::{ActivityRecord, HeartRateSummary};
use crate::error::PersistError;
use crate::sinks::ActivitySink;
use crate::splits::Split;
use crate::{ActivityType, PositionSample};

/// Finished activities in a SQLite database.
pub struct SqliteActivityStore {
    db: Mutex<Connection>,
}

impl SqliteActivityStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let db = Connection::open(path.as_ref())?;
        Self::init_schema(&db)?;
        info!(
            "[SqliteActivityStore] Opened {}",
            path.as_ref().display()
        );
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, PersistError> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activity_type TEXT NOT NULL,
                total_distance_m REAL NOT NULL,
                total_duration_s REAL NOT NULL,
                moving_time_s REAL NOT NULL,
                total_ascent_m REAL NOT NULL,
                average_pace REAL,
                start_timestamp INTEGER NOT NULL,
                end_timestamp INTEGER NOT NULL,
                auto_splits INTEGER NOT NULL,
                point_count INTEGER NOT NULL,
                route BLOB NOT NULL,
                splits TEXT NOT NULL,
                heart_rate BLOB NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_activities_start
                ON activities(start_timestamp);
            "#,
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one record. Returns the row id.
    pub fn insert(&self, record: &ActivityRecord) -> Result<i64, PersistError> {
        let route = rmp_serde::to_vec(&record.route)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let heart_rate = rmp_serde::to_vec(&record.heart_rate_summary)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let splits = serde_json::to_string(&record.splits)?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO activities (activity_type, total_distance_m, total_duration_s,
                moving_time_s, total_ascent_m, average_pace, start_timestamp, end_timestamp,
                auto_splits, point_count, route, splits, heart_rate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                activity_type_key(record.activity_type),
                record.total_distance_meters,
                record.total_duration_seconds,
                record.moving_time_seconds,
                record.total_ascent_meters,
                record.average_pace_min_per_km,
                record.start_timestamp,
                record.end_timestamp,
                record.auto_splits_enabled,
                record.route.len() as i64,
                route,
                splits,
                heart_rate
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            "[SqliteActivityStore] Stored activity {} ({} points)",
            id,
            record.route.len()
        );
        Ok(id)
    }

    /// Number of stored activities.
    pub fn count(&self) -> Result<usize, PersistError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every stored activity, oldest start first.
    pub fn load_all(&self) -> Result<Vec<ActivityRecord>, PersistError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT activity_type, total_distance_m, total_duration_s, moving_time_s,
                    total_ascent_m, average_pace, start_timestamp, end_timestamp,
                    auto_splits, route, splits, heart_rate
             FROM activities ORDER BY start_timestamp, id",
        )?;
        let rows = stmt.query_map([], StoredRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Start timestamps and distances, for listings.
    pub fn summaries(&self) -> Result<Vec<(i64, ActivityType, f64)>, PersistError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT start_timestamp, activity_type, total_distance_m
             FROM activities ORDER BY start_timestamp, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (start, kind, distance) = row?;
            out.push((start, parse_activity_type(&kind)?, distance));
        }
        Ok(out)
    }
}

#[async_trait]
impl ActivitySink for SqliteActivityStore {
    async fn persist(&self, record: &ActivityRecord) -> Result<(), PersistError> {
        self.insert(record).map(|_| ())
    }
}

/// Raw column values of one row, decoded outside the rusqlite callback.
struct StoredRow {
    activity_type: String,
    total_distance_m: f64,
    total_duration_s: f64,
    moving_time_s: f64,
    total_ascent_m: f64,
    average_pace: Option<f64>,
    start_timestamp: i64,
    end_timestamp: i64,
    auto_splits: bool,
    route: Vec<u8>,
    splits: String,
    heart_rate: Vec<u8>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            activity_type: row.get(0)?,
            total_distance_m: row.get(1)?,
            total_duration_s: row.get(2)?,
            moving_time_s: row.get(3)?,
            total_ascent_m: row.get(4)?,
            average_pace: row.get(5)?,
            start_timestamp: row.get(6)?,
            end_timestamp: row.get(7)?,
            auto_splits: row.get(8)?,
            route: row.get(9)?,
            splits: row.get(10)?,
            heart_rate: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<ActivityRecord, PersistError> {
        let route: Vec<PositionSample> = rmp_serde::from_slice(&self.route)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let heart_rate_summary: HeartRateSummary = rmp_serde::from_slice(&self.heart_rate)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let splits: Vec<Split> = serde_json::from_str(&self.splits)?;

        Ok(ActivityRecord {
            activity_type: parse_activity_type(&self.activity_type)?,
            route,
            total_distance_meters: self.total_distance_m,
            total_duration_seconds: self.total_duration_s,
            moving_time_seconds: self.moving_time_s,
            total_ascent_meters: self.total_ascent_m,
            average_pace_min_per_km: self.average_pace,
            splits,
            heart_rate_summary,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            auto_splits_enabled: self.auto_splits,
        })
    }
}

fn activity_type_key(activity_type: ActivityType) -> &'static str {
    match activity_type {
        ActivityType::Running => "running",
        ActivityType::Cycling => "cycling",
        ActivityType::Walking => "walking",
        ActivityType::Hiking => "hiking",
    }
}

fn parse_activity_type(key: &str) -> Result<ActivityType, PersistError> {
    ActivityType::ALL
        .into_iter()
        .find(|t| activity_type_key(*t) == key)
        .ok_or_else(|| PersistError::Serialization(format!("unknown activity type '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeartRateSample;

    fn record(start: i64, activity_type: ActivityType) -> ActivityRecord {
        ActivityRecord {
            activity_type,
            route: vec![
                PositionSample::new(0.0, 0.0, start).with_elevation(3.0),
                PositionSample::new(0.0, 0.009, start + 60_000).with_accuracy(4.0),
            ],
            total_distance_meters: 1000.75,
            total_duration_seconds: 60.0,
            moving_time_seconds: 58.0,
            total_ascent_meters: 0.0,
            average_pace_min_per_km: Some(0.966),
            splits: Vec::new(),
            heart_rate_summary: HeartRateSummary {
                average: Some(150.0),
                peak: Some(152),
                history: vec![HeartRateSample {
                    bpm: 152,
                    timestamp_millis: start + 30_000,
                }],
                final_battery: Some(80),
                zones: None,
            },
            start_timestamp: start,
            end_timestamp: start + 60_000,
            auto_splits_enabled: true,
        }
    }

    #[test]
    fn test_insert_and_load() {
        let store = SqliteActivityStore::in_memory().unwrap();
        store.insert(&record(2_000, ActivityType::Hiking)).unwrap();
        store.insert(&record(1_000, ActivityType::Running)).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0], record(1_000, ActivityType::Running));
        assert_eq!(loaded[1].activity_type, ActivityType::Hiking);

        let summaries = store.summaries().unwrap();
        assert_eq!(summaries[0], (1_000, ActivityType::Running, 1000.75));
    }

    #[test]
    fn test_activity_type_keys() {
        for t in ActivityType::ALL {
            assert_eq!(parse_activity_type(activity_type_key(t)).unwrap(), t);
        }
        assert!(parse_activity_type("rowing").is_err());
    }

    #[tokio::test]
    async fn test_sink_persist() {
        let store = SqliteActivityStore::in_memory().unwrap();
        store
            .persist(&record(5, ActivityType::Cycling))
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
