//! Inbound event types delivered by the upstream detection/tracking producer.
//!
//! The engine never assigns track identifiers; any `id` seen here is the
//! producer's own and is assumed stable across frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to an individual by the upstream tracker.
pub type TrackId = u64;

/// A single detected position in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// Upstream track id, when the producer supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TrackId>,
    /// Detector confidence (0-1)
    #[serde(default)]
    pub confidence: f64,
}

impl Position {
    /// Create an anonymous position with full confidence.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            id: None,
            confidence: 1.0,
        }
    }

    /// Attach an upstream track id.
    pub fn with_id(mut self, id: TrackId) -> Self {
        self.id = Some(id);
        self
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Planar point without detection metadata.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<&Position> for Point {
    fn from(p: &Position) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Velocity reported by (or derived for) a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// Speed in distance units per second
    pub magnitude: f64,
    /// Heading in degrees, `atan2(dy, dx)` convention
    #[serde(alias = "direction")]
    pub direction_degrees: f64,
}

/// A frame of detections from one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: String,
    /// Number of detections reported by the producer
    pub count: usize,
    pub positions: Vec<Position>,
    /// Frame-level confidence
    #[serde(default)]
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl DetectionEvent {
    /// Build an event whose count matches its position list.
    pub fn new(camera_id: impl Into<String>, positions: Vec<Position>, timestamp: DateTime<Utc>) -> Self {
        let confidence = if positions.is_empty() {
            0.0
        } else {
            positions.iter().map(|p| p.confidence).sum::<f64>() / positions.len() as f64
        };
        Self {
            camera_id: camera_id.into(),
            count: positions.len(),
            positions,
            confidence,
            timestamp,
        }
    }
}

/// One track's state in a tracking update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackUpdate {
    pub id: TrackId,
    pub position: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Velocity>,
}

/// A batch of track states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub tracks: Vec<TrackUpdate>,
    pub timestamp: DateTime<Utc>,
}

/// Unified inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Detection(DetectionEvent),
    Tracking(TrackingEvent),
}

impl InboundEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InboundEvent::Detection(e) => e.timestamp,
            InboundEvent::Tracking(e) => e.timestamp,
        }
    }
}
