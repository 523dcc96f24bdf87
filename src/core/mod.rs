//! Core analytics for herdsense.
//!
//! This module contains:
//! - The time-windowed event store and per-track history
//! - Motion analysis and behavior classification
//! - Herd clustering and cohesion
//! - Alert evaluation and metrics aggregation
//! - The engine that ties them together

pub mod alerts;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod herd;
pub mod metrics;
pub mod motion;
pub mod track_registry;

// Re-export commonly used types
pub use alerts::{
    AlertEvaluator, AlertEvent, AlertInputs, AlertKind, AlertLevel, AlertLog, AlertStatus,
    Severity,
};
pub use engine::{EngineOutput, HerdEngine};
pub use error::AnalyticsError;
pub use event_store::{DetectionSnapshot, EventStore};
pub use herd::{cluster, cluster_greedy, cluster_linked, cohesion, Cluster};
pub use metrics::{
    ActivityLevel, HerdSummary, MetricsBuilder, MetricsHistory, MetricsSnapshot, TickSchedule,
    PRODUCER_NAME,
};
pub use motion::{analyze, classify, Behavior, BehaviorTally, MotionPass, MovementVector, TrackRef};
pub use track_registry::{TrackPath, TrackRegistry, TrackSample, TrackSummary};
