//! Threshold evaluation and the bounded alert log.
//!
//! Evaluation is stateless apart from the thresholds, the log and, under the
//! edge policy, the condition seen on the previous tick.

use crate::config::{AlertThresholds, AlertTrigger, ThresholdName};
use crate::core::error::AnalyticsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of alerts kept in the log.
pub const DEFAULT_ALERT_LOG_CAPACITY: usize = 100;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

/// Which condition raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RapidMovement,
    Crowding,
}

impl AlertKind {
    pub fn severity(&self) -> Severity {
        match self {
            AlertKind::RapidMovement => Severity::High,
            AlertKind::Crowding => Severity::Medium,
        }
    }
}

/// A discrete notification. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub data: serde_json::Value,
}

/// Current alert state as reported in metrics snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Medium,
    High,
}

impl From<Severity> for AlertLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Medium => AlertLevel::Medium,
            Severity::High => AlertLevel::High,
        }
    }
}

/// Alert level plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStatus {
    pub level: AlertLevel,
    pub message: String,
}

impl AlertStatus {
    pub fn normal() -> Self {
        Self {
            level: AlertLevel::Normal,
            message: "Normal".to_string(),
        }
    }
}

/// Metrics the evaluator looks at on each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertInputs {
    /// Mean speed of the latest matched movement vectors
    pub average_speed: f64,
    /// Current detection count
    pub count: usize,
}

/// Bounded FIFO log of emitted alerts.
#[derive(Debug, Clone)]
pub struct AlertLog {
    capacity: usize,
    entries: VecDeque<AlertEvent>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append an alert, evicting the oldest when full.
    pub fn push(&mut self, alert: AlertEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(alert);
    }

    /// Alerts oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AlertEvent> {
        self.entries.iter()
    }

    /// The `n` most recent alerts, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AlertEvent> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<AlertEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Applies thresholds to derived metrics.
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
    trigger: AlertTrigger,
    subject: String,
    log: AlertLog,
    /// Condition active on the previous evaluation
    last_condition: Option<AlertKind>,
}

impl AlertEvaluator {
    pub fn new(
        thresholds: AlertThresholds,
        trigger: AlertTrigger,
        subject: impl Into<String>,
        log_capacity: usize,
    ) -> Self {
        Self {
            thresholds,
            trigger,
            subject: subject.into(),
            log: AlertLog::new(log_capacity),
            last_condition: None,
        }
    }

    /// Evaluate one tick.
    ///
    /// Rapid movement is checked before crowding and at most one alert is
    /// raised. An emitted alert is already appended to the log; the caller
    /// forwards it outward. `unusual_activity_zscore` is not consulted.
    pub fn evaluate(&mut self, inputs: AlertInputs, now: DateTime<Utc>) -> (AlertStatus, Option<AlertEvent>) {
        let condition = if inputs.average_speed > self.thresholds.rapid_movement_speed {
            Some((
                AlertKind::RapidMovement,
                "Rapid movement detected".to_string(),
                serde_json::json!({
                    "avg_speed": inputs.average_speed,
                    "threshold": self.thresholds.rapid_movement_speed,
                }),
            ))
        } else if inputs.count > self.thresholds.crowding_count as usize {
            Some((
                AlertKind::Crowding,
                format!("High concentration of {}", self.subject),
                serde_json::json!({
                    "count": inputs.count,
                    "threshold": self.thresholds.crowding_count,
                }),
            ))
        } else {
            None
        };

        let previous = self.last_condition;
        self.last_condition = condition.as_ref().map(|(kind, _, _)| *kind);

        let Some((kind, message, data)) = condition else {
            return (AlertStatus::normal(), None);
        };

        let status = AlertStatus {
            level: kind.severity().into(),
            message: message.clone(),
        };

        if self.trigger == AlertTrigger::Edge && previous == Some(kind) {
            return (status, None);
        }

        let alert = AlertEvent {
            timestamp: now,
            severity: kind.severity(),
            kind,
            message,
            data,
        };
        self.log.push(alert.clone());
        (status, Some(alert))
    }

    /// Update one threshold. The previous value is kept on rejection.
    pub fn set_threshold(&mut self, name: ThresholdName, value: f64) -> Result<(), AnalyticsError> {
        self.thresholds.set(name, value)
    }

    /// Replace all thresholds at once.
    pub fn replace_thresholds(&mut self, thresholds: AlertThresholds) {
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }
}
