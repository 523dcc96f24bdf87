//! Spatial grouping of the herd and cohesion scoring.

use crate::config::ClusterStrategy;
use crate::ingest::types::{Point, Position};
use serde::{Deserialize, Serialize};

/// Default proximity threshold for clustering, in distance units.
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 10.0;

/// Largest distance from the origin a position may have. Any two positions
/// within it are a finite distance apart.
const MAX_POSITION_NORM: f64 = f64::MAX / 2.0;

/// Whether a position can take part in distance computations.
///
/// Entries with non-finite coordinates, or so far out that a distance to
/// another entry could overflow, are left out of clustering and cohesion.
fn is_usable(position: &Position) -> bool {
    position.x.is_finite()
        && position.y.is_finite()
        && position.x.hypot(position.y) <= MAX_POSITION_NORM
}

fn usable_positions(positions: &[Position]) -> Vec<&Position> {
    let usable: Vec<&Position> = positions.iter().filter(|p| is_usable(p)).collect();
    if usable.len() < positions.len() {
        tracing::debug!(
            "Discarding {} position(s) with unusable coordinates",
            positions.len() - usable.len()
        );
    }
    usable
}

/// A group of nearby positions within one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub member_positions: Vec<Position>,
    pub center: Point,
    pub size: usize,
}

impl Cluster {
    fn from_members(members: Vec<Position>) -> Self {
        // Running mean keeps large coordinates from overflowing a plain sum.
        let mut center = Point::default();
        for (k, p) in members.iter().enumerate() {
            let k = (k + 1) as f64;
            center.x += (p.x - center.x) / k;
            center.y += (p.y - center.y) / k;
        }
        Self {
            size: members.len(),
            member_positions: members,
            center,
        }
    }
}

/// Cluster positions with the configured strategy.
pub fn cluster(positions: &[Position], threshold: f64, strategy: ClusterStrategy) -> Vec<Cluster> {
    match strategy {
        ClusterStrategy::Greedy => cluster_greedy(positions, threshold),
        ClusterStrategy::Linked => cluster_linked(positions, threshold),
    }
}

/// Single pass greedy clustering.
///
/// Each unvisited position seeds a cluster and absorbs every later unvisited
/// position closer than `threshold` to the seed. Membership is not
/// transitive and depends on list order.
pub fn cluster_greedy(positions: &[Position], threshold: f64) -> Vec<Cluster> {
    let positions = usable_positions(positions);
    let mut visited = vec![false; positions.len()];
    let mut clusters = Vec::new();

    for (i, seed) in positions.iter().enumerate() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let mut members = vec![(*seed).clone()];

        for (j, other) in positions.iter().enumerate() {
            if visited[j] {
                continue;
            }
            if seed.distance_to(other) < threshold {
                visited[j] = true;
                members.push((*other).clone());
            }
        }

        clusters.push(Cluster::from_members(members));
    }

    clusters
}

/// Single-linkage clustering: positions chained by hops shorter than
/// `threshold` share a cluster regardless of order. Clusters are ordered by
/// their first member's list position.
pub fn cluster_linked(positions: &[Position], threshold: f64) -> Vec<Cluster> {
    let positions = usable_positions(positions);
    let mut visited = vec![false; positions.len()];
    let mut clusters = Vec::new();

    for start in 0..positions.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut frontier = vec![start];
        let mut indices = vec![start];

        while let Some(current) = frontier.pop() {
            for (j, other) in positions.iter().enumerate() {
                if !visited[j] && positions[current].distance_to(other) < threshold {
                    visited[j] = true;
                    frontier.push(j);
                    indices.push(j);
                }
            }
        }

        indices.sort_unstable();
        let members = indices.into_iter().map(|i| positions[i].clone()).collect();
        clusters.push(Cluster::from_members(members));
    }

    clusters
}

/// Mean Euclidean distance over all unordered pairs of usable positions,
/// `None` below two of them.
pub fn mean_pairwise_distance(positions: &[Position]) -> Option<f64> {
    let positions = usable_positions(positions);
    let mut mean = 0.0;
    let mut pairs = 0usize;
    for (i, a) in positions.iter().enumerate() {
        for b in &positions[i + 1..] {
            let d = a.distance_to(b);
            if !d.is_finite() {
                continue;
            }
            pairs += 1;
            mean += (d - mean) / pairs as f64;
        }
    }
    (pairs > 0).then_some(mean)
}

/// Herd cohesion in `[0, 100]`.
///
/// `100 - 2 * mean pairwise distance`, clamped. Fewer than two usable
/// positions score 100.
pub fn cohesion(positions: &[Position]) -> f64 {
    match mean_pairwise_distance(positions) {
        Some(mean) => (100.0 - 2.0 * mean).clamp(0.0, 100.0),
        None => 100.0,
    }
}
