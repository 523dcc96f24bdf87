//! Movement vectors between consecutive snapshots and behavior classification.
//!
//! Positions in the two most recent snapshots are paired, turned into
//! speed/direction vectors and bucketed into a [`BehaviorTally`].

use crate::config::MatchStrategy;
use crate::core::event_store::{DetectionSnapshot, EventStore};
use crate::ingest::types::{Position, TrackId};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// Speed below which an individual counts as grazing.
pub const GRAZING_MAX_SPEED: f64 = 0.5;

/// Speed below which an individual counts as moving.
pub const MOVING_MAX_SPEED: f64 = 2.0;

/// Speed below which an individual counts as resting. Checked after the
/// grazing and moving bands, so it never matches.
pub const RESTING_MAX_SPEED: f64 = 0.1;

/// Speed above which an individual counts as alert.
pub const ALERT_MIN_SPEED: f64 = 5.0;

/// Which individual a movement vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackRef {
    /// Matched through the upstream track id
    Id(TrackId),
    /// Matched by list position in the current snapshot
    Index(usize),
}

/// Speed and heading of one individual between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementVector {
    pub track_ref: TrackRef,
    pub speed: f64,
    pub direction_degrees: f64,
    pub distance: f64,
}

/// Behavior bucket of one individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Grazing,
    Moving,
    Resting,
    Alert,
    Unknown,
}

/// Classify a speed.
///
/// Bands are tested in a fixed order: grazing, moving, resting, alert. The
/// resting band lies inside the grazing band and is therefore dead; speeds
/// between the moving band and the alert band (inclusive of exactly
/// [`ALERT_MIN_SPEED`]) are `Unknown`.
pub fn classify(speed: f64) -> Behavior {
    if speed < GRAZING_MAX_SPEED {
        Behavior::Grazing
    } else if speed < MOVING_MAX_SPEED {
        Behavior::Moving
    } else if speed < RESTING_MAX_SPEED {
        Behavior::Resting
    } else if speed > ALERT_MIN_SPEED {
        Behavior::Alert
    } else {
        Behavior::Unknown
    }
}

/// Per-bucket counts for one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorTally {
    pub grazing: u32,
    pub moving: u32,
    pub resting: u32,
    pub alert: u32,
    pub unknown: u32,
}

impl BehaviorTally {
    /// Count one individual.
    pub fn add(&mut self, behavior: Behavior) {
        match behavior {
            Behavior::Grazing => self.grazing += 1,
            Behavior::Moving => self.moving += 1,
            Behavior::Resting => self.resting += 1,
            Behavior::Alert => self.alert += 1,
            Behavior::Unknown => self.unknown += 1,
        }
    }

    /// Sum over all buckets.
    pub fn total(&self) -> u32 {
        self.grazing + self.moving + self.resting + self.alert + self.unknown
    }
}

/// Result of one motion analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionPass {
    pub vectors: Vec<MovementVector>,
    pub tally: BehaviorTally,
}

impl MotionPass {
    /// Mean speed of the pass, `None` when nothing was matched.
    pub fn average_speed(&self) -> Option<f64> {
        if self.vectors.is_empty() {
            return None;
        }
        Some(self.vectors.iter().map(|v| v.speed).mean())
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Pair positions of `curr` with positions of `prev`.
///
/// With [`MatchStrategy::Identity`], positions are matched by upstream id
/// when every position in both snapshots carries one; otherwise, and with
/// [`MatchStrategy::Positional`], `curr[i]` pairs with `prev[i]`. Positional
/// pairing is only correct when both snapshots list the same individuals in
/// the same order.
pub fn match_positions<'a>(
    prev: &'a DetectionSnapshot,
    curr: &'a DetectionSnapshot,
    strategy: MatchStrategy,
) -> Vec<(TrackRef, &'a Position, &'a Position)> {
    let fully_identified = |s: &DetectionSnapshot| s.positions.iter().all(|p| p.id.is_some());

    if strategy == MatchStrategy::Identity && fully_identified(prev) && fully_identified(curr) {
        let by_id: HashMap<TrackId, &Position> = prev
            .positions
            .iter()
            .filter_map(|p| p.id.map(|id| (id, p)))
            .collect();

        return curr
            .positions
            .iter()
            .filter_map(|c| {
                let id = c.id?;
                by_id.get(&id).map(|p| (TrackRef::Id(id), *p, c))
            })
            .collect();
    }

    prev.positions
        .iter()
        .zip(curr.positions.iter())
        .enumerate()
        .map(|(i, (p, c))| (TrackRef::Index(i), p, c))
        .collect()
}

/// Movement vectors between two snapshots.
///
/// Nothing is produced when the elapsed time is not positive; individual
/// pairs with a non-finite distance are dropped.
pub fn movement_vectors(
    prev: &DetectionSnapshot,
    curr: &DetectionSnapshot,
    strategy: MatchStrategy,
) -> Vec<MovementVector> {
    let time_diff = (curr.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
    if time_diff <= 0.0 {
        tracing::debug!(
            "Discarding motion pass: non-positive elapsed time {:.3}s",
            time_diff
        );
        return Vec::new();
    }

    match_positions(prev, curr, strategy)
        .into_iter()
        .filter_map(|(track_ref, p, c)| {
            let dx = c.x - p.x;
            let dy = c.y - p.y;
            let distance = dx.hypot(dy);
            if !distance.is_finite() {
                return None;
            }
            Some(MovementVector {
                track_ref,
                speed: distance / time_diff,
                direction_degrees: dy.atan2(dx).to_degrees(),
                distance,
            })
        })
        .collect()
}

/// Run a full pass over two snapshots.
pub fn analyze(prev: &DetectionSnapshot, curr: &DetectionSnapshot, strategy: MatchStrategy) -> MotionPass {
    let vectors = movement_vectors(prev, curr, strategy);
    let mut tally = BehaviorTally::default();
    for vector in &vectors {
        tally.add(classify(vector.speed));
    }
    MotionPass { vectors, tally }
}

/// Run a pass over the two most recent snapshots in a store.
///
/// An empty pass is returned when the store holds fewer than two snapshots.
pub fn analyze_latest(store: &EventStore, strategy: MatchStrategy) -> MotionPass {
    match store.latest(2) {
        Ok(pair) => analyze(pair[0], pair[1], strategy),
        Err(e) => {
            tracing::debug!("Skipping motion pass: {}", e);
            MotionPass::default()
        }
    }
}
