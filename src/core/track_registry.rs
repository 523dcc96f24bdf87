//! Per-track rolling history of position and velocity samples.

use crate::core::error::AnalyticsError;
use crate::ingest::types::{Point, TrackId, Velocity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One observation of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSample {
    pub timestamp: DateTime<Utc>,
    pub position: Point,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
}

impl TrackSample {
    pub fn new(timestamp: DateTime<Utc>, position: Point, velocity: Option<Velocity>) -> Self {
        Self {
            timestamp,
            position,
            velocity,
        }
    }

    /// Velocity implied by moving from `prev` to this sample.
    ///
    /// `None` when no time has elapsed or the result is not finite.
    pub fn velocity_since(&self, prev: &TrackSample) -> Option<Velocity> {
        let dt = (self.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if dt <= 0.0 {
            return None;
        }
        let dx = self.position.x - prev.position.x;
        let dy = self.position.y - prev.position.y;
        let magnitude = dx.hypot(dy) / dt;
        if !magnitude.is_finite() {
            return None;
        }
        Some(Velocity {
            magnitude,
            direction_degrees: dy.atan2(dx).to_degrees(),
        })
    }
}

/// Summary of one track's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub samples: usize,
    pub total_distance: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A point on an exported track path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub time: DateTime<Utc>,
}

/// Recent positions of one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPath {
    pub id: TrackId,
    pub points: Vec<PathPoint>,
}

#[derive(Debug)]
struct TrackHistory {
    samples: VecDeque<TrackSample>,
    total_distance: f64,
    first_seen: DateTime<Utc>,
}

/// Rolling per-track sample history, keyed by upstream track id.
pub struct TrackRegistry {
    /// Maximum samples kept per track
    cap: usize,
    tracks: HashMap<TrackId, TrackHistory>,
}

impl TrackRegistry {
    /// Create a registry that keeps at most `cap` samples per track.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(2),
            tracks: HashMap::new(),
        }
    }

    /// Append a sample to a track, oldest samples discarded past the cap.
    ///
    /// A sample without a velocity gets one derived from the previous sample
    /// of the same track when possible.
    pub fn update(&mut self, track_id: TrackId, mut sample: TrackSample) {
        let history = self.tracks.entry(track_id).or_insert_with(|| TrackHistory {
            samples: VecDeque::with_capacity(16),
            total_distance: 0.0,
            first_seen: sample.timestamp,
        });

        if let Some(prev) = history.samples.back() {
            let step = (sample.position.x - prev.position.x)
                .hypot(sample.position.y - prev.position.y);
            if step.is_finite() {
                history.total_distance += step;
            }
            if sample.velocity.is_none() {
                sample.velocity = sample.velocity_since(prev);
            }
        }

        history.samples.push_back(sample);
        while history.samples.len() > self.cap {
            history.samples.pop_front();
        }
    }

    /// The two most recent samples of a track, older first.
    pub fn latest(&self, track_id: TrackId) -> Result<(&TrackSample, &TrackSample), AnalyticsError> {
        let available = self.tracks.get(&track_id).map_or(0, |h| h.samples.len());
        if available < 2 {
            return Err(AnalyticsError::InsufficientHistory {
                track_id,
                available,
            });
        }
        let samples = &self.tracks[&track_id].samples;
        Ok((&samples[available - 2], &samples[available - 1]))
    }

    /// Heading change between the last two samples, in degrees within (-180, 180].
    ///
    /// `Ok(None)` when either sample lacks a velocity.
    pub fn direction_change(&self, track_id: TrackId) -> Result<Option<f64>, AnalyticsError> {
        let (prev, curr) = self.latest(track_id)?;
        Ok(match (prev.velocity, curr.velocity) {
            (Some(a), Some(b)) => normalize_degrees(b.direction_degrees - a.direction_degrees),
            _ => None,
        })
    }

    /// Velocity of a track's newest sample, if it has one.
    pub fn velocity(&self, track_id: TrackId) -> Option<Velocity> {
        self.tracks
            .get(&track_id)
            .and_then(|h| h.samples.back())
            .and_then(|s| s.velocity)
    }

    /// Forget every track whose newest sample is older than `cutoff`.
    ///
    /// Returns the number of tracks removed.
    pub fn evict_stale(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, h| h.samples.back().map_or(false, |s| s.timestamp >= cutoff));
        before - self.tracks.len()
    }

    /// Keep only the newest `keep` samples of a track.
    pub fn trim(&mut self, track_id: TrackId, keep: usize) {
        if let Some(history) = self.tracks.get_mut(&track_id) {
            while history.samples.len() > keep {
                history.samples.pop_front();
            }
        }
    }

    /// Forget a track entirely.
    pub fn remove(&mut self, track_id: TrackId) -> bool {
        self.tracks.remove(&track_id).is_some()
    }

    /// Summary for one track.
    pub fn summary(&self, track_id: TrackId) -> Option<TrackSummary> {
        let history = self.tracks.get(&track_id)?;
        let last = history.samples.back()?;
        Some(TrackSummary {
            id: track_id,
            samples: history.samples.len(),
            total_distance: history.total_distance,
            first_seen: history.first_seen,
            last_seen: last.timestamp,
        })
    }

    /// Paths of the `limit` most recently seen tracks, most recent first.
    pub fn paths(&self, limit: usize) -> Vec<TrackPath> {
        let mut recent: Vec<(TrackId, DateTime<Utc>)> = self
            .tracks
            .iter()
            .filter_map(|(id, h)| h.samples.back().map(|s| (*id, s.timestamp)))
            .collect();
        recent.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        recent
            .into_iter()
            .take(limit)
            .map(|(id, _)| TrackPath {
                id,
                points: self.tracks[&id]
                    .samples
                    .iter()
                    .map(|s| PathPoint {
                        x: s.position.x,
                        y: s.position.y,
                        time: s.timestamp,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Number of samples held for a track.
    pub fn sample_count(&self, track_id: TrackId) -> usize {
        self.tracks.get(&track_id).map_or(0, |h| h.samples.len())
    }

    pub fn contains(&self, track_id: TrackId) -> bool {
        self.tracks.contains_key(&track_id)
    }

    /// Number of tracks held.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Per-track sample cap.
    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Wrap an angle into (-180, 180]. `None` for non-finite input.
fn normalize_degrees(delta: f64) -> Option<f64> {
    if !delta.is_finite() {
        return None;
    }
    let wrapped = (delta + 180.0).rem_euclid(360.0) - 180.0;
    Some(if wrapped <= -180.0 { 180.0 } else { wrapped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(ts: DateTime<Utc>, x: f64, y: f64) -> TrackSample {
        TrackSample::new(ts, Point::new(x, y), None)
    }

    #[test]
    fn test_latest_requires_two_samples() {
        let mut registry = TrackRegistry::new(10);
        assert_eq!(
            registry.latest(1).unwrap_err(),
            AnalyticsError::InsufficientHistory {
                track_id: 1,
                available: 0
            }
        );

        registry.update(1, sample(Utc::now(), 0.0, 0.0));
        assert!(matches!(
            registry.latest(1),
            Err(AnalyticsError::InsufficientHistory { available: 1, .. })
        ));
    }

    #[test]
    fn test_update_trims_to_cap() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(3);
        for i in 0..5 {
            registry.update(9, sample(start + Duration::seconds(i), i as f64, 0.0));
        }

        assert_eq!(registry.sample_count(9), 3);
        let (prev, curr) = registry.latest(9).unwrap();
        assert_eq!(prev.position.x, 3.0);
        assert_eq!(curr.position.x, 4.0);
    }

    #[test]
    fn test_velocity_derived_when_missing() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(10);
        registry.update(2, sample(start, 0.0, 0.0));
        registry.update(2, sample(start + Duration::seconds(2), 6.0, 8.0));

        let (_, curr) = registry.latest(2).unwrap();
        let v = curr.velocity.unwrap();
        assert!((v.magnitude - 5.0).abs() < 1e-9);
        assert!((v.direction_degrees - 8.0_f64.atan2(6.0).to_degrees()).abs() < 1e-9);
    }

    #[test]
    fn test_supplied_velocity_is_kept() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(10);
        let given = Velocity {
            magnitude: 0.3,
            direction_degrees: 45.0,
        };
        registry.update(2, sample(start, 0.0, 0.0));
        registry.update(
            2,
            TrackSample::new(start + Duration::seconds(1), Point::new(9.0, 9.0), Some(given)),
        );

        assert_eq!(registry.velocity(2), Some(given));
        assert_eq!(registry.velocity(99), None);
    }

    #[test]
    fn test_zero_elapsed_time_yields_no_velocity() {
        let now = Utc::now();
        let mut registry = TrackRegistry::new(10);
        registry.update(4, sample(now, 0.0, 0.0));
        registry.update(4, sample(now, 1.0, 1.0));

        let (_, curr) = registry.latest(4).unwrap();
        assert!(curr.velocity.is_none());
    }

    #[test]
    fn test_direction_change_wraps() {
        let now = Utc::now();
        let mut registry = TrackRegistry::new(10);
        let heading = |deg: f64| {
            Some(Velocity {
                magnitude: 1.0,
                direction_degrees: deg,
            })
        };
        registry.update(5, TrackSample::new(now, Point::new(0.0, 0.0), heading(170.0)));
        registry.update(
            5,
            TrackSample::new(now + Duration::seconds(1), Point::new(1.0, 0.0), heading(-170.0)),
        );

        let change = registry.direction_change(5).unwrap().unwrap();
        assert!((change - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_degrees_range() {
        assert_eq!(normalize_degrees(180.0), Some(180.0));
        assert_eq!(normalize_degrees(-180.0), Some(180.0));
        assert_eq!(normalize_degrees(540.0), Some(180.0));
        assert_eq!(normalize_degrees(-190.0), Some(170.0));
        assert_eq!(normalize_degrees(0.0), Some(0.0));
        assert_eq!(normalize_degrees(f64::NAN), None);
        assert_eq!(normalize_degrees(f64::INFINITY), None);
    }

    #[test]
    fn test_direction_change_with_huge_heading() {
        let now = Utc::now();
        let mut registry = TrackRegistry::new(10);
        let heading = |deg: f64| {
            Some(Velocity {
                magnitude: 1.0,
                direction_degrees: deg,
            })
        };
        registry.update(6, TrackSample::new(now, Point::new(0.0, 0.0), heading(0.0)));
        registry.update(
            6,
            TrackSample::new(now + Duration::seconds(1), Point::new(1.0, 0.0), heading(1e12)),
        );

        // 1e12 mod 360 = 280, i.e. -80
        let change = registry.direction_change(6).unwrap().unwrap();
        assert!((change + 80.0).abs() < 1e-6);

        registry.update(
            6,
            TrackSample::new(now + Duration::seconds(2), Point::new(2.0, 0.0), heading(f64::INFINITY)),
        );
        assert_eq!(registry.direction_change(6).unwrap(), None);
    }

    #[test]
    fn test_evict_stale_tracks() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(10);
        registry.update(1, sample(start, 0.0, 0.0));
        registry.update(2, sample(start, 0.0, 0.0));
        registry.update(2, sample(start + Duration::hours(2), 1.0, 0.0));

        assert_eq!(registry.evict_stale(start + Duration::hours(1)), 1);
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
        assert_eq!(registry.evict_stale(start + Duration::hours(1)), 0);
    }

    #[test]
    fn test_distance_and_paths() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(10);
        registry.update(1, sample(start, 0.0, 0.0));
        registry.update(1, sample(start + Duration::seconds(1), 3.0, 4.0));
        registry.update(2, sample(start + Duration::seconds(5), 1.0, 1.0));

        let summary = registry.summary(1).unwrap();
        assert!((summary.total_distance - 5.0).abs() < 1e-9);
        assert_eq!(summary.samples, 2);

        let paths = registry.paths(1);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].id, 2);

        let paths = registry.paths(10);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1].points.len(), 2);
    }

    #[test]
    fn test_trim_and_remove() {
        let start = Utc::now();
        let mut registry = TrackRegistry::new(10);
        for i in 0..4 {
            registry.update(3, sample(start + Duration::seconds(i), 0.0, 0.0));
        }
        registry.trim(3, 1);
        assert_eq!(registry.sample_count(3), 1);

        assert!(registry.remove(3));
        assert!(!registry.contains(3));
        assert!(registry.is_empty());
    }
}
