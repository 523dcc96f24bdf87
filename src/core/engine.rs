//! The analytics engine.
//!
//! `HerdEngine` owns every container (event store, track registry, alert
//! log, metrics history) and processes inbound events and ticks one at a
//! time, each to completion. Callers observe published snapshots and
//! read-only views; nothing hands out mutable access to internal state.

use crate::config::{AlertThresholds, ClusterStrategy, Config, MatchStrategy, ThresholdName};
use crate::core::alerts::{AlertEvaluator, AlertInputs, AlertLog};
use crate::core::error::AnalyticsError;
use crate::core::event_store::{DetectionSnapshot, EventStore};
use crate::core::herd;
use crate::core::metrics::{
    HerdSummary, MetricsBuilder, MetricsHistory, MetricsSnapshot, TickReadings, TickSchedule,
};
use crate::core::motion::{self, MotionPass};
use crate::core::track_registry::{TrackPath, TrackRegistry, TrackSample};
use crate::ingest::types::{DetectionEvent, InboundEvent, Point, TrackId, TrackingEvent};
use crate::publish::{Outbound, Publisher};
use crate::stats::{create_shared_stats, SharedEngineStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Number of recent detection confidences averaged in the herd summary.
const CONFIDENCE_WINDOW: usize = 1000;

/// What an engine leaves behind when torn down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    pub alerts: Vec<crate::core::alerts::AlertEvent>,
    pub metrics: Vec<MetricsSnapshot>,
}

/// Streaming herd analytics engine.
pub struct HerdEngine {
    cluster_threshold: f64,
    cluster_strategy: ClusterStrategy,
    match_strategy: MatchStrategy,

    store: EventStore,
    registry: TrackRegistry,
    evaluator: AlertEvaluator,
    history: MetricsHistory,
    builder: MetricsBuilder,
    schedule: TickSchedule,
    publisher: Box<dyn Publisher>,
    stats: SharedEngineStats,

    /// Result of the most recent motion pass
    last_pass: MotionPass,
    /// Newest event timestamp seen
    stream_time: Option<DateTime<Utc>>,
    /// Tracks updated since the previous tick
    touched: HashSet<TrackId>,
    /// Latest count and its timestamp per camera
    camera_counts: HashMap<String, (usize, DateTime<Utc>)>,
    /// Track ids seen since start
    seen_tracks: HashSet<TrackId>,
    total_detections: u64,
    peak_count: usize,
    peak_time: Option<DateTime<Utc>>,
    confidences: VecDeque<f64>,
}

impl HerdEngine {
    /// Create an engine from configuration.
    pub fn new(config: &Config, publisher: Box<dyn Publisher>) -> Self {
        Self::with_stats(config, publisher, create_shared_stats())
    }

    /// Create an engine that reports into existing shared statistics.
    pub fn with_stats(config: &Config, publisher: Box<dyn Publisher>, stats: SharedEngineStats) -> Self {
        let retention = chrono::Duration::from_std(config.retention_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut schedule = TickSchedule::new(config.tick_interval);
        if config.paused {
            schedule.stop();
        }

        Self {
            cluster_threshold: config.cluster_threshold,
            cluster_strategy: config.cluster_strategy,
            match_strategy: config.match_strategy,
            store: EventStore::new(retention),
            registry: TrackRegistry::new(config.track_history_cap),
            evaluator: AlertEvaluator::new(
                config.thresholds,
                config.alert_trigger,
                config.subject.clone(),
                config.alert_log_capacity,
            ),
            history: MetricsHistory::new(config.metrics_history_cap),
            builder: MetricsBuilder::new(),
            schedule,
            publisher,
            stats,
            last_pass: MotionPass::default(),
            stream_time: None,
            touched: HashSet::new(),
            camera_counts: HashMap::new(),
            seen_tracks: HashSet::new(),
            total_detections: 0,
            peak_count: 0,
            peak_time: None,
            confidences: VecDeque::with_capacity(CONFIDENCE_WINDOW),
        }
    }

    /// Process one inbound event to completion.
    pub fn handle_event(&mut self, event: InboundEvent) {
        let timestamp = event.timestamp();
        match event {
            InboundEvent::Detection(e) => self.record_detection(e),
            InboundEvent::Tracking(e) => self.record_tracking(e),
        }
        self.advance_stream_time(timestamp);
    }

    /// Advance stream time and forget tracks and camera counts that fell
    /// out of the retention window.
    fn advance_stream_time(&mut self, timestamp: DateTime<Utc>) {
        if self.stream_time.map_or(true, |t| timestamp > t) {
            self.stream_time = Some(timestamp);
        }
        let Some(cutoff) = self.stream_time.and_then(|t| self.store.cutoff(t)) else {
            return;
        };

        let stale = self.registry.evict_stale(cutoff);
        if stale > 0 {
            tracing::debug!("Dropped {} stale track(s) older than {}", stale, cutoff);
            self.touched.retain(|id| self.registry.contains(*id));
        }
        self.camera_counts.retain(|_, (_, seen)| *seen >= cutoff);
    }

    /// Record a detection frame, update tracks and rerun motion analysis.
    fn record_detection(&mut self, event: DetectionEvent) {
        let snapshot = DetectionSnapshot::from(event);
        let timestamp = snapshot.timestamp;

        let newer = self
            .camera_counts
            .get(&snapshot.camera_id)
            .map_or(true, |(_, seen)| timestamp >= *seen);
        if newer {
            self.camera_counts
                .insert(snapshot.camera_id.clone(), (snapshot.count, timestamp));
        }

        self.total_detections += snapshot.count as u64;
        if snapshot.count > self.peak_count || self.peak_time.is_none() {
            self.peak_count = snapshot.count;
            self.peak_time = Some(timestamp);
        }

        for position in &snapshot.positions {
            if position.confidence.is_finite() {
                if self.confidences.len() == CONFIDENCE_WINDOW {
                    self.confidences.pop_front();
                }
                self.confidences.push_back(position.confidence);
            }
            if let Some(id) = position.id {
                self.seen_tracks.insert(id);
                self.touched.insert(id);
                self.registry
                    .update(id, TrackSample::new(timestamp, Point::from(position), None));
            }
        }

        tracing::debug!(
            "Detection from {}: {} position(s) at {}",
            snapshot.camera_id,
            snapshot.positions.len(),
            timestamp
        );

        let evicted = self.store.record(snapshot);
        if evicted > 0 {
            tracing::debug!("Evicted {} snapshot(s) outside retention window", evicted);
            self.stats.record_evictions(evicted as u64);
        }

        self.last_pass = motion::analyze_latest(&self.store, self.match_strategy);
        self.stats.record_detection_event();
    }

    /// Record a batch of track states.
    fn record_tracking(&mut self, event: TrackingEvent) {
        for track in event.tracks {
            self.seen_tracks.insert(track.id);
            self.touched.insert(track.id);
            self.registry.update(
                track.id,
                TrackSample::new(event.timestamp, track.position, track.velocity),
            );
        }

        let evicted = self.store.evict_expired(event.timestamp);
        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
        }
        self.stats.record_tracking_event();
    }

    /// Run the tick if the schedule says one is due.
    pub fn poll_tick(&mut self, now: Instant) -> Option<MetricsSnapshot> {
        if self.schedule.poll(now) {
            Some(self.tick(Utc::now()))
        } else {
            None
        }
    }

    /// Recompute all derived metrics, evaluate alerts and publish.
    pub fn tick(&mut self, now: DateTime<Utc>) -> MetricsSnapshot {
        let (count, clusters, herd_cohesion) = match self.store.last() {
            Some(latest) => (
                latest.count,
                herd::cluster(&latest.positions, self.cluster_threshold, self.cluster_strategy),
                herd::cohesion(&latest.positions),
            ),
            None => (0, Vec::new(), herd::cohesion(&[])),
        };
        let avg_speed = self.average_speed();

        let (alert_status, alert) = self.evaluator.evaluate(
            AlertInputs {
                average_speed: avg_speed,
                count,
            },
            now,
        );

        if let Some(alert) = alert {
            tracing::info!("Alert [{:?}] {}", alert.severity, alert.message);
            self.stats.record_alert();
            self.publisher.publish(Outbound::Alert(alert));
        }

        let snapshot = self.builder.build(TickReadings {
            timestamp: now,
            count,
            avg_speed,
            herd_cohesion,
            behavior: self.last_pass.tally,
            clusters,
            alert_status,
            summary: self.summary(),
        });

        self.history.push(snapshot.clone());
        self.publisher.publish(Outbound::MetricsSnapshot(snapshot.clone()));
        self.stats.record_tick();
        self.touched.clear();

        tracing::debug!(
            "Tick: count={} avg_speed={:.2} cohesion={:.1} activity={}",
            snapshot.count,
            snapshot.avg_speed,
            snapshot.herd_cohesion,
            snapshot.activity_level
        );

        snapshot
    }

    /// Mean speed of the latest motion pass.
    ///
    /// Falls back to the mean velocity of tracks updated since the previous
    /// tick when the last pass matched nothing, and to zero when neither is
    /// available.
    pub fn average_speed(&self) -> f64 {
        if let Some(speed) = self.last_pass.average_speed() {
            return speed;
        }
        let speeds: Vec<f64> = self
            .touched
            .iter()
            .filter_map(|id| self.registry.velocity(*id))
            .map(|v| v.magnitude)
            .filter(|m| m.is_finite())
            .collect();
        if speeds.is_empty() {
            return 0.0;
        }
        speeds.iter().mean()
    }

    fn summary(&self) -> HerdSummary {
        let avg_confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().mean()
        };
        let max_speed = self
            .last_pass
            .vectors
            .iter()
            .map(|v| v.speed)
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max);
        HerdSummary {
            total_detections: self.total_detections,
            unique_tracks: self.seen_tracks.len(),
            peak_count: self.peak_count,
            peak_time: self.peak_time,
            avg_confidence,
            cameras_active: self.camera_counts.values().filter(|(count, _)| *count > 0).count(),
            current_total: self.camera_counts.values().map(|(count, _)| *count).sum(),
            max_speed,
        }
    }

    /// Update one alert threshold. Applies from the next tick on.
    pub fn set_threshold(&mut self, name: ThresholdName, value: f64) -> Result<(), AnalyticsError> {
        match self.evaluator.set_threshold(name, value) {
            Ok(()) => {
                tracing::info!("Threshold {} set to {}", name.as_str(), value);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Rejected threshold update: {}", e);
                Err(e)
            }
        }
    }

    /// Replace all thresholds, e.g. after a configuration reload.
    pub fn apply_thresholds(&mut self, thresholds: AlertThresholds) {
        if thresholds != self.evaluator.thresholds() {
            tracing::info!("Alert thresholds reloaded: {:?}", thresholds);
            self.evaluator.replace_thresholds(thresholds);
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.evaluator.thresholds()
    }

    /// Stop the periodic tick.
    pub fn pause(&mut self) {
        self.schedule.stop();
    }

    /// Restart the periodic tick.
    pub fn resume(&mut self) {
        self.schedule.start();
    }

    pub fn is_ticking(&self) -> bool {
        self.schedule.is_running()
    }

    pub fn alert_log(&self) -> &AlertLog {
        self.evaluator.log()
    }

    pub fn metrics_history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn latest_metrics(&self) -> Option<&MetricsSnapshot> {
        self.history.latest()
    }

    pub fn last_motion_pass(&self) -> &MotionPass {
        &self.last_pass
    }

    pub fn event_store(&self) -> &EventStore {
        &self.store
    }

    pub fn track_registry(&self) -> &TrackRegistry {
        &self.registry
    }

    /// Paths of the most recently seen tracks.
    pub fn track_paths(&self, limit: usize) -> Vec<TrackPath> {
        self.registry.paths(limit)
    }

    pub fn stats(&self) -> &SharedEngineStats {
        &self.stats
    }

    /// Identity stamped on every metrics snapshot from this engine.
    pub fn instance_id(&self) -> uuid::Uuid {
        self.builder.instance_id()
    }

    /// Tear the engine down, returning its alert log and metrics history.
    pub fn shutdown(self) -> EngineOutput {
        tracing::info!(
            "Engine shutting down: {} alert(s), {} metrics snapshot(s) retained",
            self.evaluator.log().len(),
            self.history.len()
        );
        EngineOutput {
            alerts: self.evaluator.log().to_vec(),
            metrics: self.history.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::{AlertKind, Severity};
    use crate::core::metrics::ActivityLevel;
    use crate::ingest::types::{Position, TrackUpdate, Velocity};
    use crate::publish::channel;
    use chrono::Duration;

    fn engine() -> (HerdEngine, crossbeam_channel::Receiver<Outbound>) {
        let (publisher, receiver) = channel(1024);
        (HerdEngine::new(&Config::default(), Box::new(publisher)), receiver)
    }

    fn detection(positions: Vec<Position>, ts: DateTime<Utc>) -> InboundEvent {
        InboundEvent::Detection(DetectionEvent::new("cam-1", positions, ts))
    }

    #[test]
    fn test_tick_without_data() {
        let (mut engine, rx) = engine();
        let snapshot = engine.tick(Utc::now());

        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.avg_speed, 0.0);
        assert_eq!(snapshot.herd_cohesion, 100.0);
        assert_eq!(snapshot.activity_level, ActivityLevel::Low);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_motion_pass_runs_on_detection() {
        let (mut engine, _rx) = engine();
        let t0 = Utc::now();

        engine.handle_event(detection(vec![Position::new(0.0, 0.0)], t0));
        assert!(engine.last_motion_pass().is_empty());

        engine.handle_event(detection(vec![Position::new(3.0, 4.0)], t0 + Duration::seconds(1)));
        assert_eq!(engine.last_motion_pass().tally.unknown, 1);
        assert!((engine.average_speed() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_rapid_movement_alert_published_once() {
        let (mut engine, rx) = engine();
        engine.set_threshold(ThresholdName::RapidMovement, 3.0).unwrap();

        let t0 = Utc::now();
        engine.handle_event(detection(vec![Position::new(0.0, 0.0)], t0));
        engine.handle_event(detection(vec![Position::new(4.0, 0.0)], t0 + Duration::seconds(1)));

        let snapshot = engine.tick(t0 + Duration::seconds(1));
        assert!((snapshot.avg_speed - 4.0).abs() < 1e-9);

        let alerts: Vec<_> = rx
            .try_iter()
            .filter_map(|m| match m {
                Outbound::Alert(a) => Some(a),
                Outbound::MetricsSnapshot(_) => None,
            })
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].kind, AlertKind::RapidMovement);
        assert_eq!(engine.alert_log().len(), 1);
        assert_eq!(engine.stats().stats().alerts_emitted, 1);
    }

    #[test]
    fn test_invalid_threshold_surfaces_to_caller() {
        let (mut engine, _rx) = engine();
        let before = engine.thresholds();
        assert!(engine.set_threshold(ThresholdName::Crowding, -2.0).is_err());
        assert_eq!(engine.thresholds(), before);
    }

    #[test]
    fn test_tracking_velocity_used_when_no_motion_pass() {
        let (mut engine, _rx) = engine();
        engine.handle_event(InboundEvent::Tracking(TrackingEvent {
            tracks: vec![
                TrackUpdate {
                    id: 1,
                    position: Point::new(0.0, 0.0),
                    velocity: Some(Velocity {
                        magnitude: 1.0,
                        direction_degrees: 0.0,
                    }),
                },
                TrackUpdate {
                    id: 2,
                    position: Point::new(5.0, 0.0),
                    velocity: Some(Velocity {
                        magnitude: 3.0,
                        direction_degrees: 90.0,
                    }),
                },
            ],
            timestamp: Utc::now(),
        }));

        assert!((engine.average_speed() - 2.0).abs() < 1e-9);
        assert_eq!(engine.track_registry().len(), 2);
    }

    #[test]
    fn test_summary_tracks_peak_and_unique_ids() {
        let (mut engine, _rx) = engine();
        let t0 = Utc::now();
        engine.handle_event(detection(
            vec![Position::new(0.0, 0.0).with_id(1), Position::new(1.0, 0.0).with_id(2)],
            t0,
        ));
        engine.handle_event(detection(
            vec![Position::new(0.0, 0.0).with_id(1)],
            t0 + Duration::seconds(1),
        ));

        let snapshot = engine.tick(t0 + Duration::seconds(1));
        assert_eq!(snapshot.summary.total_detections, 3);
        assert_eq!(snapshot.summary.unique_tracks, 2);
        assert_eq!(snapshot.summary.peak_count, 2);
        assert_eq!(snapshot.summary.peak_time, Some(t0));
        assert!((snapshot.summary.avg_confidence - 1.0).abs() < 1e-9);
    }

    fn tracking(id: TrackId, speed: f64, ts: DateTime<Utc>) -> InboundEvent {
        InboundEvent::Tracking(TrackingEvent {
            tracks: vec![TrackUpdate {
                id,
                position: Point::new(0.0, 0.0),
                velocity: Some(Velocity {
                    magnitude: speed,
                    direction_degrees: 0.0,
                }),
            }],
            timestamp: ts,
        })
    }

    fn alerts_in(rx: &crossbeam_channel::Receiver<Outbound>) -> usize {
        rx.try_iter()
            .filter(|m| matches!(m, Outbound::Alert(_)))
            .count()
    }

    #[test]
    fn test_far_past_timestamp_does_not_panic() {
        let (mut engine, _rx) = engine();
        let line = r#"{"type":"detection","camera_id":"cam-1","count":1,"positions":[{"x":0.0,"y":0.0}],"timestamp":"-262143-01-01T00:00:00Z"}"#;
        let event = crate::ingest::parse_line(line).expect("far-past timestamp parses");

        engine.handle_event(event);
        assert_eq!(engine.event_store().len(), 1);

        engine.handle_event(detection(vec![Position::new(1.0, 0.0)], Utc::now()));
        assert_eq!(engine.event_store().len(), 1);

        let snapshot = engine.tick(Utc::now());
        assert_eq!(snapshot.count, 1);
    }

    #[test]
    fn test_oversized_retention_does_not_panic() {
        let config = Config {
            retention_window: std::time::Duration::from_secs(10_000_000_000_000),
            ..Config::default()
        };
        let (publisher, _rx) = channel(16);
        let mut engine = HerdEngine::new(&config, Box::new(publisher));

        let t0 = Utc::now();
        engine.handle_event(detection(vec![Position::new(0.0, 0.0).with_id(1)], t0));
        engine.handle_event(tracking(2, 1.0, t0 + Duration::seconds(1)));
        engine.handle_event(detection(vec![Position::new(1.0, 0.0).with_id(1)], t0 + Duration::seconds(2)));

        assert_eq!(engine.event_store().len(), 2);
        assert_eq!(engine.track_registry().len(), 2);
        assert_eq!(engine.tick(t0).count, 1);
    }

    #[test]
    fn test_stale_track_dropped_and_ignored_for_speed() {
        let (mut engine, rx) = engine();
        let t0 = Utc::now();

        engine.handle_event(tracking(1, 10.0, t0));
        assert!((engine.tick(t0).avg_speed - 10.0).abs() < 1e-9);
        assert!(rx.try_iter().count() >= 1);

        engine.handle_event(detection(vec![Position::new(0.0, 0.0)], t0 + Duration::hours(3)));
        assert!(engine.track_registry().is_empty());

        let snapshot = engine.tick(t0 + Duration::hours(3));
        assert_eq!(snapshot.avg_speed, 0.0);
        assert_eq!(snapshot.activity_level, ActivityLevel::Low);
        assert_eq!(alerts_in(&rx), 0);
    }

    #[test]
    fn test_speed_fallback_uses_tracks_updated_since_last_tick() {
        let (mut engine, _rx) = engine();
        let t0 = Utc::now();

        engine.handle_event(tracking(1, 4.0, t0));
        assert!((engine.tick(t0).avg_speed - 4.0).abs() < 1e-9);

        engine.handle_event(tracking(2, 1.0, t0 + Duration::seconds(1)));
        assert!((engine.tick(t0 + Duration::seconds(1)).avg_speed - 1.0).abs() < 1e-9);

        // Both tracks are retained but neither moved since the last tick.
        assert_eq!(engine.track_registry().len(), 2);
        assert_eq!(engine.tick(t0 + Duration::seconds(2)).avg_speed, 0.0);
    }

    #[test]
    fn test_summary_camera_totals() {
        let (mut engine, _rx) = engine();
        let t0 = Utc::now();
        let at = |x: f64| Position::new(x, 0.0);

        let frame = |camera: &str, positions: Vec<Position>, ts| {
            InboundEvent::Detection(DetectionEvent::new(camera, positions, ts))
        };
        engine.handle_event(frame("cam-1", vec![at(0.0), at(1.0), at(2.0)], t0));
        engine.handle_event(frame("cam-2", vec![at(5.0), at(6.0)], t0 + Duration::seconds(1)));
        engine.handle_event(frame("cam-1", vec![at(0.5)], t0 + Duration::seconds(2)));
        engine.handle_event(frame("cam-3", Vec::new(), t0 + Duration::seconds(3)));

        let summary = engine.tick(t0 + Duration::seconds(3)).summary;
        assert_eq!(summary.cameras_active, 2);
        assert_eq!(summary.current_total, 3);

        engine.handle_event(frame("cam-3", vec![at(9.0)], t0 + Duration::hours(2)));
        let summary = engine.tick(t0 + Duration::hours(2)).summary;
        assert_eq!(summary.cameras_active, 1);
        assert_eq!(summary.current_total, 1);
        assert_eq!(summary.total_detections, 7);
    }

    #[test]
    fn test_summary_max_speed_from_latest_pass() {
        let (mut engine, _rx) = engine();
        let t0 = Utc::now();
        engine.handle_event(detection(vec![Position::new(0.0, 0.0), Position::new(1.0, 0.0)], t0));
        engine.handle_event(detection(
            vec![Position::new(3.0, 4.0), Position::new(1.0, 1.0)],
            t0 + Duration::seconds(1),
        ));

        let snapshot = engine.tick(t0 + Duration::seconds(1));
        assert!((snapshot.summary.max_speed - 5.0).abs() < 1e-9);
        assert!((snapshot.avg_speed - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_instance_id_matches_snapshot_producer() {
        let (mut engine, _rx) = engine();
        let snapshot = engine.tick(Utc::now());
        assert_eq!(snapshot.producer.instance_id, engine.instance_id().to_string());
    }

    #[test]
    fn test_pause_stops_scheduled_ticks() {
        let (mut engine, _rx) = engine();
        let now = Instant::now();

        engine.pause();
        assert!(engine.poll_tick(now).is_none());

        engine.resume();
        assert!(engine.poll_tick(now).is_some());
        assert!(engine.poll_tick(now).is_none());
    }

    #[test]
    fn test_shutdown_returns_history() {
        let (mut engine, _rx) = engine();
        engine.tick(Utc::now());
        engine.tick(Utc::now());

        let output = engine.shutdown();
        assert_eq!(output.metrics.len(), 2);
        assert!(output.alerts.is_empty());
    }
}
