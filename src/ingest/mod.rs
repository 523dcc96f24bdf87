//! Inbound event handling.
//!
//! Detection and tracking model output arrives as two event kinds. This
//! module defines them and provides a line-oriented feed reader.

pub mod feed;
pub mod types;

// Re-export commonly used types
pub use feed::{parse_line, FeedError, FeedReader, FeedSource};
pub use types::{
    DetectionEvent, InboundEvent, Point, Position, TrackId, TrackUpdate, TrackingEvent, Velocity,
};
