//! Outward channel for metrics snapshots and alerts.
//!
//! Publication is fire-and-forget: a publisher never blocks the engine and
//! never reports failure back to it.

use crate::core::alerts::AlertEvent;
use crate::core::metrics::MetricsSnapshot;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// A message published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    MetricsSnapshot(MetricsSnapshot),
    Alert(AlertEvent),
}

/// Sink for engine output.
pub trait Publisher: Send {
    fn publish(&mut self, message: Outbound);
}

/// Publishes into a bounded in-process channel, dropping on overflow.
pub struct ChannelPublisher {
    sender: Sender<Outbound>,
    dropped: u64,
}

impl ChannelPublisher {
    pub fn new(sender: Sender<Outbound>) -> Self {
        Self { sender, dropped: 0 }
    }

    /// Messages dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&mut self, message: Outbound) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::warn!("Outbound channel full, dropped message ({} total)", self.dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Outbound channel disconnected");
            }
        }
    }
}

/// Create a channel publisher and the receiving end consumers read from.
pub fn channel(capacity: usize) -> (ChannelPublisher, Receiver<Outbound>) {
    let (sender, receiver) = bounded(capacity);
    (ChannelPublisher::new(sender), receiver)
}

/// Writes each message as one JSON line.
pub struct JsonLinesPublisher<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn publish(&mut self, message: Outbound) {
        let result = serde_json::to_string(&message)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(self.writer, "{line}"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to write outbound message: {}", e);
        }
    }
}

/// Forwards every message to several publishers.
#[derive(Default)]
pub struct FanoutPublisher {
    targets: Vec<Box<dyn Publisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Box<dyn Publisher>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Publisher for FanoutPublisher {
    fn publish(&mut self, message: Outbound) {
        if let Some((last, rest)) = self.targets.split_last_mut() {
            for target in rest {
                target.publish(message.clone());
            }
            last.publish(message);
        }
    }
}
