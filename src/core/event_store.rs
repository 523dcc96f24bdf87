//! Time-windowed buffer of detection snapshots.
//!
//! Snapshots are kept in arrival order. Every insert evicts entries older
//! than the retention window, measured from the newest timestamp the store
//! has seen, so replayed feeds age out the same way a live feed does.

use crate::core::error::AnalyticsError;
use crate::ingest::types::{DetectionEvent, Position};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One camera frame worth of detections. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub positions: Vec<Position>,
    pub count: usize,
}

impl DetectionSnapshot {
    pub fn new(camera_id: impl Into<String>, positions: Vec<Position>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            camera_id: camera_id.into(),
            count: positions.len(),
            positions,
        }
    }
}

impl From<DetectionEvent> for DetectionSnapshot {
    fn from(event: DetectionEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            camera_id: event.camera_id,
            positions: event.positions,
            count: event.count,
        }
    }
}

/// Bounded, time-windowed store of detection snapshots.
pub struct EventStore {
    /// How long snapshots are kept
    retention: Duration,
    /// Snapshots in arrival order
    snapshots: VecDeque<DetectionSnapshot>,
    /// Newest timestamp seen, the reference point for eviction
    high_water: Option<DateTime<Utc>>,
    /// Total number of snapshots evicted so far
    evicted: u64,
}

impl EventStore {
    /// Create a store with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            snapshots: VecDeque::new(),
            high_water: None,
            evicted: 0,
        }
    }

    /// Append a snapshot, then evict everything outside the retention window.
    ///
    /// Returns the number of snapshots evicted by this call.
    pub fn record(&mut self, snapshot: DetectionSnapshot) -> usize {
        let now = match self.high_water {
            Some(hw) if hw > snapshot.timestamp => hw,
            _ => snapshot.timestamp,
        };
        self.high_water = Some(now);
        self.snapshots.push_back(snapshot);
        self.evict_before(now)
    }

    /// Evict entries relative to an explicit clock reading.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        if self.high_water.map_or(true, |hw| now > hw) {
            self.high_water = Some(now);
        }
        self.evict_before(now)
    }

    /// Oldest timestamp still inside the window ending at `now`.
    ///
    /// `None` when the window reaches past the representable range, in which
    /// case nothing is old enough to evict.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(self.retention)
    }

    fn evict_before(&mut self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = self.cutoff(now) else {
            return 0;
        };
        let before = self.snapshots.len();
        self.snapshots.retain(|s| s.timestamp >= cutoff);
        let evicted = before - self.snapshots.len();
        self.evicted += evicted as u64;
        evicted
    }

    /// The `n` most recent snapshots, oldest first.
    pub fn latest(&self, n: usize) -> Result<Vec<&DetectionSnapshot>, AnalyticsError> {
        if self.snapshots.len() < n {
            return Err(AnalyticsError::EmptyHistory {
                needed: n,
                available: self.snapshots.len(),
            });
        }
        Ok(self.snapshots.iter().skip(self.snapshots.len() - n).collect())
    }

    /// The most recent snapshot, if any.
    pub fn last(&self) -> Option<&DetectionSnapshot> {
        self.snapshots.back()
    }

    /// Iterate over retained snapshots in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &DetectionSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Total number of snapshots evicted since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted
    }

    /// Newest timestamp recorded so far.
    pub fn high_water(&self) -> Option<DateTime<Utc>> {
        self.high_water
    }
}
