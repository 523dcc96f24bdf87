//! Webhook forwarding of published messages.
//!
//! Alerts and metrics snapshots are POSTed as JSON to a configured URL,
//! optionally with a bearer token. Delivery runs on a dedicated worker
//! thread so the engine never waits on the network.

use crate::publish::{Outbound, Publisher};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::Serialize;
use std::thread::{self, JoinHandle};

/// Messages buffered for the delivery thread before new ones are dropped.
const QUEUE_CAPACITY: usize = 1000;

/// Webhook configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Target URL
    pub url: String,
    /// Optional bearer token
    pub token: Option<String>,
    /// Request timeout
    pub timeout: std::time::Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout: std::time::Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reject URLs that reqwest would only fail on at send time.
    pub fn validate(&self) -> Result<(), WebhookError> {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            Ok(())
        } else {
            Err(WebhookError::Config(format!(
                "Webhook URL must start with http:// or https://, got '{}'",
                self.url
            )))
        }
    }
}

/// Webhook error types.
#[derive(Debug)]
pub enum WebhookError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Receiver returned an error response
    Server { status: u16, message: String },
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::Config(msg) => write!(f, "Webhook config error: {msg}"),
            WebhookError::Network(msg) => write!(f, "Webhook network error: {msg}"),
            WebhookError::Server { status, message } => {
                write!(f, "Webhook server error ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for WebhookError {}

/// Body POSTed to the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    pub source: &'a str,
    pub version: &'a str,
    pub sent_at: DateTime<Utc>,
    pub message: &'a Outbound,
}

/// Async webhook client.
pub struct WebhookClient {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// POST one message.
    pub async fn send(&self, message: &Outbound) -> Result<(), WebhookError> {
        let payload = WebhookPayload {
            source: crate::core::PRODUCER_NAME,
            version: env!("CARGO_PKG_VERSION"),
            sent_at: Utc::now(),
            message,
        };

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(WebhookError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

/// Blocking webhook client for use in synchronous contexts.
pub struct BlockingWebhookClient {
    inner: WebhookClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingWebhookClient {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WebhookError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: WebhookClient::new(config)?,
            runtime,
        })
    }

    pub fn send(&self, message: &Outbound) -> Result<(), WebhookError> {
        self.runtime.block_on(self.inner.send(message))
    }
}

/// Publisher that forwards every message to a webhook.
///
/// Failed deliveries are logged and dropped.
pub struct WebhookPublisher {
    sender: Option<Sender<Outbound>>,
    handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl WebhookPublisher {
    /// Start the delivery thread.
    pub fn spawn(config: WebhookConfig) -> Result<Self, WebhookError> {
        config.validate()?;
        let (sender, receiver) = bounded::<Outbound>(QUEUE_CAPACITY);

        let handle = thread::Builder::new()
            .name("webhook".to_string())
            .spawn(move || {
                // The runtime must be built on the thread that drives it.
                let client = match BlockingWebhookClient::new(config) {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::error!("{}", e);
                        return;
                    }
                };
                for message in receiver {
                    if let Err(e) = client.send(&message) {
                        tracing::warn!("Webhook delivery to {} failed: {}", client.inner.url(), e);
                    }
                }
                tracing::debug!("Webhook delivery thread finished");
            })
            .map_err(|e| WebhookError::Config(format!("Failed to start webhook thread: {e}")))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Messages dropped because the delivery queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Publisher for WebhookPublisher {
    fn publish(&mut self, message: Outbound) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::warn!("Webhook queue full, dropping message");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.sender = None;
                tracing::warn!("Webhook delivery thread stopped");
            }
        }
    }
}

impl Drop for WebhookPublisher {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AlertEvent, AlertKind, Severity};

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("http://127.0.0.1:9000/hook").validate().is_ok());
        assert!(WebhookConfig::new("https://example.org").validate().is_ok());
        assert!(WebhookConfig::new("ftp://example.org").validate().is_err());
    }

    #[test]
    fn test_webhook_config_token() {
        let config = WebhookConfig::new("http://localhost").with_token("secret");
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_payload_shape() {
        let alert = Outbound::Alert(AlertEvent {
            timestamp: Utc::now(),
            severity: Severity::Medium,
            kind: AlertKind::Crowding,
            message: "High concentration of bison".to_string(),
            data: serde_json::json!({ "count": 20 }),
        });
        let payload = WebhookPayload {
            source: "herdsense",
            version: "0.1.0",
            sent_at: Utc::now(),
            message: &alert,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["source"], "herdsense");
        assert_eq!(json["message"]["event"], "alert");
        assert_eq!(json["message"]["payload"]["type"], "crowding");
        assert_eq!(json["message"]["payload"]["message"], "High concentration of bison");
    }

    #[test]
    fn test_error_display() {
        let err = WebhookError::Server {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }
}
