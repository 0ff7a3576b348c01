//! Persistence and map sinks.
//!
//! Both are external collaborators: the controller hands them data and never
//! depends on what they do with it, except that a failed persist keeps the
//! record available for another attempt.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::controller::ActivityRecord;
use crate::error::PersistError;
use crate::route::MapPosition;

/// Accepts one finished activity per session. Append-only.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn persist(&self, record: &ActivityRecord) -> Result<(), PersistError>;
}

/// Receives the live route and camera commands.
pub trait MapSink: Send + Sync {
    /// Replace the displayed route.
    fn render_route(&self, positions: &[MapPosition]);

    /// Extend the displayed route.
    fn append_route(&self, positions: &[MapPosition]);

    fn fly_to(&self, position: MapPosition);
}

/// Map sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMapSink;

impl MapSink for NoopMapSink {
    fn render_route(&self, _positions: &[MapPosition]) {}

    fn append_route(&self, _positions: &[MapPosition]) {}

    fn fly_to(&self, _position: MapPosition) {}
}

/// Base map style, cycled by the map style control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStyle {
    #[default]
    Street,
    Satellite,
    Terrain,
}

impl MapStyle {
    pub const ALL: [MapStyle; 3] = [MapStyle::Street, MapStyle::Satellite, MapStyle::Terrain];

    pub fn next(self) -> Self {
        match self {
            MapStyle::Street => MapStyle::Satellite,
            MapStyle::Satellite => MapStyle::Terrain,
            MapStyle::Terrain => MapStyle::Street,
        }
    }
}

impl fmt::Display for MapStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapStyle::Street => "street",
            MapStyle::Satellite => "satellite",
            MapStyle::Terrain => "terrain",
        };
        f.write_str(s)
    }
}

/// In-memory activity store.
///
/// Can be told to fail the next persist calls, which is how save-failure
/// handling is exercised.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    records: Mutex<Vec<ActivityRecord>>,
    failures_remaining: Mutex<u32>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` persist calls fail with a storage error.
    pub fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivitySink for MemoryActivityStore {
    async fn persist(&self, record: &ActivityRecord) -> Result<(), PersistError> {
        {
            let mut failures = self
                .failures_remaining
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(PersistError::Storage("store unavailable".to_string()));
            }
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
