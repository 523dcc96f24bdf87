//! End-to-end tests driving the engine through its public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use herdsense::config::{AlertTrigger, ClusterStrategy, Config, ThresholdName};
use herdsense::core::{AlertKind, AlertLevel, HerdEngine, Severity};
use herdsense::ingest::{parse_line, DetectionEvent, InboundEvent, Position};
use herdsense::publish::{channel, Outbound};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn engine_with(config: Config) -> (HerdEngine, crossbeam_channel::Receiver<Outbound>) {
    let (publisher, receiver) = channel(10_000);
    (HerdEngine::new(&config, Box::new(publisher)), receiver)
}

fn frame(positions: &[(f64, f64)], ts: DateTime<Utc>) -> InboundEvent {
    let positions = positions.iter().map(|&(x, y)| Position::new(x, y)).collect();
    InboundEvent::Detection(DetectionEvent::new("cam-1", positions, ts))
}

fn alerts(receiver: &crossbeam_channel::Receiver<Outbound>) -> Vec<herdsense::core::AlertEvent> {
    receiver
        .try_iter()
        .filter_map(|m| match m {
            Outbound::Alert(a) => Some(a),
            Outbound::MetricsSnapshot(_) => None,
        })
        .collect()
}

#[test]
fn test_clusters_in_published_snapshot() {
    let (mut engine, receiver) = engine_with(Config::default());
    engine.handle_event(frame(&[(0.0, 0.0), (5.0, 0.0), (20.0, 20.0)], t0()));

    let snapshot = engine.tick(t0());
    assert_eq!(snapshot.cluster_count, 2);
    assert_eq!(snapshot.clusters[0].size, 2);
    assert!((snapshot.clusters[0].center.x - 2.5).abs() < 1e-9);
    assert!(snapshot.clusters[0].center.y.abs() < 1e-9);
    assert_eq!(snapshot.clusters[1].size, 1);

    let published: Vec<_> = receiver.try_iter().collect();
    assert_eq!(published.len(), 1);
    assert!(matches!(published[0], Outbound::MetricsSnapshot(_)));
}

#[test]
fn test_linked_strategy_merges_chain() {
    let config = Config {
        cluster_strategy: ClusterStrategy::Linked,
        ..Config::default()
    };
    let (mut engine, _receiver) = engine_with(config);
    engine.handle_event(frame(&[(0.0, 0.0), (8.0, 0.0), (16.0, 0.0)], t0()));

    let snapshot = engine.tick(t0());
    assert_eq!(snapshot.cluster_count, 1);
    assert_eq!(snapshot.clusters[0].size, 3);
}

#[test]
fn test_cohesion_bounds() {
    let (mut engine, _receiver) = engine_with(Config::default());

    // Singleton herd
    engine.handle_event(frame(&[(3.0, 3.0)], t0()));
    assert_eq!(engine.tick(t0()).herd_cohesion, 100.0);

    // Widely scattered herd clamps to zero
    engine.handle_event(frame(&[(0.0, 0.0), (500.0, 500.0)], t0() + Duration::seconds(1)));
    assert_eq!(engine.tick(t0()).herd_cohesion, 0.0);

    // Two animals 10 apart: 100 - 2 * 10
    engine.handle_event(frame(&[(0.0, 0.0), (10.0, 0.0)], t0() + Duration::seconds(2)));
    assert!((engine.tick(t0()).herd_cohesion - 80.0).abs() < 1e-9);
}

#[test]
fn test_rapid_movement_threshold_update() {
    let (mut engine, receiver) = engine_with(Config::default());
    engine.set_threshold(ThresholdName::RapidMovement, 3.0).unwrap();

    engine.handle_event(frame(&[(0.0, 0.0)], t0()));
    engine.handle_event(frame(&[(4.0, 0.0)], t0() + Duration::seconds(1)));

    let snapshot = engine.tick(t0() + Duration::seconds(1));
    assert_eq!(snapshot.alert_status.level, AlertLevel::High);
    assert_eq!(snapshot.activity_level.as_str(), "High");

    let emitted = alerts(&receiver);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].severity, Severity::High);
    assert_eq!(emitted[0].kind, AlertKind::RapidMovement);
    assert_eq!(emitted[0].message, "Rapid movement detected");
}

#[test]
fn test_level_trigger_repeats_and_edge_does_not() {
    let crowd: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, 0.0)).collect();

    let (mut level, level_rx) = engine_with(Config::default());
    level.handle_event(frame(&crowd, t0()));
    level.tick(t0());
    level.tick(t0() + Duration::seconds(1));
    assert_eq!(alerts(&level_rx).len(), 2);

    let config = Config {
        alert_trigger: AlertTrigger::Edge,
        ..Config::default()
    };
    let (mut edge, edge_rx) = engine_with(config);
    edge.handle_event(frame(&crowd, t0()));
    edge.tick(t0());
    edge.tick(t0() + Duration::seconds(1));

    let emitted = alerts(&edge_rx);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].kind, AlertKind::Crowding);
    assert_eq!(emitted[0].message, "High concentration of bison");
}

#[test]
fn test_alert_log_bounded() {
    let config = Config {
        thresholds: herdsense::AlertThresholds {
            crowding_count: 0,
            ..Default::default()
        },
        ..Config::default()
    };
    let (mut engine, receiver) = engine_with(config);
    engine.handle_event(frame(&[(1.0, 1.0)], t0()));

    for i in 0..101 {
        engine.tick(t0() + Duration::seconds(i));
    }

    assert_eq!(alerts(&receiver).len(), 101);
    assert_eq!(engine.alert_log().len(), 100);
    let oldest = engine.alert_log().iter().next().map(|a| a.timestamp);
    assert_eq!(oldest, Some(t0() + Duration::seconds(1)));
}

#[test]
fn test_old_snapshots_evicted() {
    let (mut engine, _receiver) = engine_with(Config::default());
    engine.handle_event(frame(&[(0.0, 0.0)], t0()));
    engine.handle_event(frame(&[(1.0, 0.0)], t0() + Duration::minutes(30)));
    engine.handle_event(frame(&[(2.0, 0.0)], t0() + Duration::minutes(61)));

    let store = engine.event_store();
    assert_eq!(store.len(), 2);
    let newest = t0() + Duration::minutes(61);
    assert!(store.iter().all(|s| newest - s.timestamp <= Duration::hours(1)));
    assert_eq!(engine.stats().stats().snapshots_evicted, 1);
}

#[test]
fn test_identity_matching_across_reordered_frames() {
    let (mut engine, _receiver) = engine_with(Config::default());
    let first = vec![
        Position::new(0.0, 0.0).with_id(1),
        Position::new(100.0, 0.0).with_id(2),
    ];
    let second = vec![
        Position::new(100.1, 0.0).with_id(2),
        Position::new(0.1, 0.0).with_id(1),
    ];
    engine.handle_event(InboundEvent::Detection(DetectionEvent::new("cam-1", first, t0())));
    engine.handle_event(InboundEvent::Detection(DetectionEvent::new(
        "cam-1",
        second,
        t0() + Duration::seconds(1),
    )));

    let pass = engine.last_motion_pass();
    assert_eq!(pass.tally.grazing, 2);
    assert_eq!(pass.tally.total(), 2);
    assert_eq!(engine.track_registry().len(), 2);
}

#[test]
fn test_feed_lines_drive_engine() {
    let lines = [
        r#"{"type":"detection","camera_id":"north","count":1,"positions":[{"x":0.0,"y":0.0}],"timestamp":"2024-06-01T12:00:00Z"}"#,
        r#"{"type":"detection","camera_id":"north","count":1,"positions":[{"x":1.0,"y":0.0}],"timestamp":"2024-06-01T12:00:01Z"}"#,
        r#"{"type":"tracking","tracks":[{"id":7,"position":{"x":1.0,"y":0.0},"velocity":{"magnitude":1.0,"direction":0.0}}],"timestamp":"2024-06-01T12:00:01Z"}"#,
    ];

    let (mut engine, _receiver) = engine_with(Config::default());
    for line in lines {
        let event = parse_line(line).expect("line should parse");
        engine.handle_event(event);
    }

    let snapshot = engine.tick(t0() + Duration::seconds(1));
    assert_eq!(snapshot.count, 1);
    assert!((snapshot.avg_speed - 1.0).abs() < 1e-9);
    assert_eq!(snapshot.behavior.moving, 1);
    assert_eq!(snapshot.activity_level.as_str(), "Moderate");
    assert_eq!(snapshot.summary.unique_tracks, 1);
}

#[test]
fn test_far_past_feed_line_is_tolerated() {
    let (mut engine, _receiver) = engine_with(Config::default());
    let line = r#"{"type":"detection","camera_id":"cam-1","count":1,"positions":[{"x":0.0,"y":0.0}],"timestamp":"-262143-01-01T00:00:00Z"}"#;
    let event = parse_line(line).expect("far-past timestamp parses");

    engine.handle_event(event);
    engine.handle_event(frame(&[(0.0, 0.0), (1.0, 0.0)], t0()));

    let snapshot = engine.tick(t0());
    assert_eq!(snapshot.count, 2);
    assert_eq!(engine.event_store().len(), 1);
}

#[test]
fn test_stale_tracking_velocity_does_not_alert_hours_later() {
    let (mut engine, receiver) = engine_with(Config::default());
    let line = format!(
        r#"{{"type":"tracking","tracks":[{{"id":4,"position":{{"x":0.0,"y":0.0}},"velocity":{{"magnitude":9.0,"direction":0.0}}}}],"timestamp":"{}"}}"#,
        t0().to_rfc3339()
    );
    engine.handle_event(parse_line(&line).unwrap());

    let later = t0() + Duration::hours(3);
    engine.handle_event(frame(&[(0.0, 0.0)], later));

    let snapshot = engine.tick(later);
    assert_eq!(snapshot.avg_speed, 0.0);
    assert_eq!(snapshot.activity_level.to_string(), "Low");
    assert!(alerts(&receiver).is_empty());
    assert!(engine.track_registry().is_empty());
}

#[test]
fn test_overflowing_positions_leave_cohesion_unchanged() {
    let herd: Vec<(f64, f64)> = (0..10).map(|i| (0.1 * i as f64, 0.05 * i as f64)).collect();

    let (mut clean, _rx) = engine_with(Config::default());
    clean.handle_event(frame(&herd, t0()));
    let baseline = clean.tick(t0());

    let mut noisy_positions = herd.clone();
    noisy_positions.push((1e308, 0.0));
    noisy_positions.push((-1e308, 0.0));
    let (mut noisy, _rx) = engine_with(Config::default());
    noisy.handle_event(frame(&noisy_positions, t0()));
    let snapshot = noisy.tick(t0());

    assert!(baseline.herd_cohesion > 95.0);
    assert_eq!(snapshot.herd_cohesion, baseline.herd_cohesion);
    assert_eq!(snapshot.cluster_count, baseline.cluster_count);
}
