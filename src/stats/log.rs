//! Counters for processed events, ticks and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Engine statistics for the current session.
#[derive(Debug)]
pub struct EngineStats {
    /// Number of detection events processed
    detection_events: AtomicU64,
    /// Number of tracking events processed
    tracking_events: AtomicU64,
    /// Number of metrics ticks run
    ticks: AtomicU64,
    /// Number of alerts emitted
    alerts_emitted: AtomicU64,
    /// Number of snapshots evicted from the event store
    snapshots_evicted: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl EngineStats {
    /// Create an empty stats record.
    pub fn new() -> Self {
        Self {
            detection_events: AtomicU64::new(0),
            tracking_events: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            snapshots_evicted: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats record that loads from and saves to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::info!("Could not load previous engine stats: {}", e);
        }

        stats
    }

    pub fn record_detection_event(&self) {
        self.detection_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracking_event(&self) {
        self.tracking_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.snapshots_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            detection_events: self.detection_events.load(Ordering::Relaxed),
            tracking_events: self.tracking_events.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            snapshots_evicted: self.snapshots_evicted.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Detection events processed: {}\n\
             - Tracking events processed: {}\n\
             - Metrics ticks: {}\n\
             - Alerts emitted: {}\n\
             - Snapshots evicted: {}\n\
             - Session duration: {} seconds",
            stats.detection_events,
            stats.tracking_events,
            stats.ticks,
            stats.alerts_emitted,
            stats.snapshots_evicted,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                detection_events: stats.detection_events,
                tracking_events: stats.tracking_events,
                ticks: stats.ticks,
                alerts_emitted: stats.alerts_emitted,
                snapshots_evicted: stats.snapshots_evicted,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.detection_events
                    .store(persisted.detection_events, Ordering::Relaxed);
                self.tracking_events
                    .store(persisted.tracking_events, Ordering::Relaxed);
                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.alerts_emitted
                    .store(persisted.alerts_emitted, Ordering::Relaxed);
                self.snapshots_evicted
                    .store(persisted.snapshots_evicted, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.detection_events.store(0, Ordering::Relaxed);
        self.tracking_events.store(0, Ordering::Relaxed);
        self.ticks.store(0, Ordering::Relaxed);
        self.alerts_emitted.store(0, Ordering::Relaxed);
        self.snapshots_evicted.store(0, Ordering::Relaxed);
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of engine statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub detection_events: u64,
    pub tracking_events: u64,
    pub ticks: u64,
    pub alerts_emitted: u64,
    pub snapshots_evicted: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    detection_events: u64,
    tracking_events: u64,
    ticks: u64,
    alerts_emitted: u64,
    snapshots_evicted: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared engine statistics.
pub type SharedEngineStats = Arc<EngineStats>;

/// Create new shared statistics.
pub fn create_shared_stats() -> SharedEngineStats {
    Arc::new(EngineStats::new())
}

/// Create new shared statistics with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedEngineStats {
    Arc::new(EngineStats::with_persistence(path))
}
