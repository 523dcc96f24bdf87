//! Consolidated metrics snapshots published on every tick.

use crate::core::alerts::AlertStatus;
use crate::core::herd::Cluster;
use crate::core::motion::BehaviorTally;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The name of this producer.
pub const PRODUCER_NAME: &str = "herdsense";

/// Coarse activity label derived from average speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityLevel {
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl ActivityLevel {
    /// Bands: `< 0.5`, `< 2.0`, `< 5.0`, `>= 5.0`.
    pub fn from_speed(avg_speed: f64) -> Self {
        if avg_speed < 0.5 {
            ActivityLevel::Low
        } else if avg_speed < 2.0 {
            ActivityLevel::Moderate
        } else if avg_speed < 5.0 {
            ActivityLevel::High
        } else {
            ActivityLevel::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Low => "Low",
            ActivityLevel::Moderate => "Moderate",
            ActivityLevel::High => "High",
            ActivityLevel::VeryHigh => "Very High",
        }
    }
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer metadata attached to each snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
    pub host: String,
}

/// Running herd statistics since the engine started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HerdSummary {
    /// Sum of detection counts over all snapshots
    pub total_detections: u64,
    /// Distinct upstream track ids seen
    pub unique_tracks: usize,
    /// Largest single-snapshot count
    pub peak_count: usize,
    /// When the peak was observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_time: Option<DateTime<Utc>>,
    /// Mean confidence over recent detections
    pub avg_confidence: f64,
    /// Cameras whose latest retained detection counted at least one animal
    pub cameras_active: usize,
    /// Sum of the latest retained count of every camera
    pub current_total: usize,
    /// Fastest movement in the latest motion pass
    pub max_speed: f64,
}

/// Everything the engine measured on one tick.
#[derive(Debug, Clone)]
pub struct TickReadings {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub avg_speed: f64,
    pub herd_cohesion: f64,
    pub behavior: BehaviorTally,
    pub clusters: Vec<Cluster>,
    pub alert_status: AlertStatus,
    pub summary: HerdSummary,
}

/// Consolidated view of all derived values, one per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub avg_speed: f64,
    pub herd_cohesion: f64,
    pub activity_level: ActivityLevel,
    pub alert_status: AlertStatus,
    pub behavior: BehaviorTally,
    pub cluster_count: usize,
    pub clusters: Vec<Cluster>,
    pub summary: HerdSummary,
    pub producer: Producer,
}

/// Builds metrics snapshots stamped with this instance's identity.
pub struct MetricsBuilder {
    instance_id: Uuid,
    host: String,
}

impl MetricsBuilder {
    pub fn new() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self {
            instance_id: Uuid::new_v4(),
            host,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn build(&self, readings: TickReadings) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: readings.timestamp,
            count: readings.count,
            avg_speed: readings.avg_speed,
            herd_cohesion: readings.herd_cohesion,
            activity_level: ActivityLevel::from_speed(readings.avg_speed),
            alert_status: readings.alert_status,
            behavior: readings.behavior,
            cluster_count: readings.clusters.len(),
            clusters: readings.clusters,
            summary: readings.summary,
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                instance_id: self.instance_id.to_string(),
                host: self.host.clone(),
            },
        }
    }
}

impl Default for MetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of recent snapshots for chart consumers.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    cap: usize,
    snapshots: VecDeque<MetricsSnapshot>,
}

impl MetricsHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            snapshots: VecDeque::new(),
        }
    }

    pub fn push(&mut self, snapshot: MetricsSnapshot) {
        if self.snapshots.len() == self.cap {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.snapshots.back()
    }

    pub fn to_vec(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Fixed-period tick schedule that can be stopped and restarted.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    interval: Duration,
    running: bool,
    last_tick: Option<Instant>,
}

impl TickSchedule {
    /// A running schedule with the given period.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: true,
            last_tick: None,
        }
    }

    /// Resume ticking. No effect when already running.
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.last_tick = None;
        }
    }

    /// Stop ticking. No effect when already stopped.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether a tick is due at `now`; marks the tick as taken when it is.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        let due = self
            .last_tick
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last_tick = Some(now);
        }
        due
    }
}
