//! herdsense - streaming herd analytics.
//!
//! This library turns per-frame animal detections and tracker updates into
//! herd-level signals: per-animal motion classification, spatial clusters,
//! a herd-cohesion score and threshold-based alerts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          herdsense                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │    Feed     │──▶│ Event Store │──▶│   Motion    │        │
//! │  │ (JSON lines)│   │ (1h window) │   │  Analyzer   │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                 │                 │               │
//! │         ▼                 ▼                 ▼               │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │    Track    │   │    Herd     │──▶│   Alert     │        │
//! │  │  Registry   │   │  Analyzer   │   │  Evaluator  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                           │                 │               │
//! │                           ▼                 ▼               │
//! │                    ┌──────────────────────────┐             │
//! │                    │ Metrics tick ──▶ Publish │             │
//! │                    └──────────────────────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use herdsense::{config::Config, core::HerdEngine, ingest::*, publish};
//!
//! let (publisher, receiver) = publish::channel(1024);
//! let mut engine = HerdEngine::new(&Config::default(), Box::new(publisher));
//!
//! let frame = DetectionEvent::new("cam-1", vec![Position::new(0.0, 0.0)], Utc::now());
//! engine.handle_event(InboundEvent::Detection(frame));
//!
//! let snapshot = engine.tick(Utc::now());
//! println!("cohesion: {}", snapshot.herd_cohesion);
//! # drop(receiver);
//! ```

pub mod config;
pub mod core;
pub mod ingest;
pub mod publish;
pub mod stats;

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{AlertThresholds, Config, ThresholdName};
pub use crate::core::{AlertEvent, AnalyticsError, HerdEngine, MetricsSnapshot};
pub use ingest::{DetectionEvent, FeedReader, FeedSource, InboundEvent, TrackingEvent};
pub use publish::{Outbound, Publisher};
pub use stats::{EngineStats, SharedEngineStats};

// Webhook re-exports (when enabled)
#[cfg(feature = "webhook")]
pub use webhook::{BlockingWebhookClient, WebhookClient, WebhookConfig, WebhookError, WebhookPublisher};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
