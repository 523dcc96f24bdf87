//! Errors raised by the analytics core.

use crate::ingest::types::TrackId;

/// Errors from the engine's stores and configuration updates.
///
/// `EmptyHistory` and `InsufficientHistory` are recovered inside the engine
/// by skipping the dependent computation; only `InvalidThreshold` reaches
/// callers of the configuration update.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    /// Fewer snapshots are stored than a computation needs
    EmptyHistory { needed: usize, available: usize },
    /// A track has fewer samples than a computation needs
    InsufficientHistory { track_id: TrackId, available: usize },
    /// A threshold update was rejected
    InvalidThreshold {
        name: String,
        value: f64,
        reason: String,
    },
}

impl std::fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsError::EmptyHistory { needed, available } => {
                write!(f, "Empty history: need {needed} snapshots, have {available}")
            }
            AnalyticsError::InsufficientHistory {
                track_id,
                available,
            } => write!(
                f,
                "Insufficient history for track {track_id}: {available} sample(s)"
            ),
            AnalyticsError::InvalidThreshold {
                name,
                value,
                reason,
            } => write!(f, "Invalid threshold {name}={value}: {reason}"),
        }
    }
}

impl std::error::Error for AnalyticsError {}
