//! Engine activity statistics.
//!
//! Counters describing what the engine has processed, shareable across
//! threads and persisted between runs.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, EngineStats, SharedEngineStats,
    StatsSnapshot,
};
