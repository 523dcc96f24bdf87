//! HTTP server for live ingestion and metrics.
//!
//! This module provides an HTTP server that:
//! - Accepts detection and tracking events via POST /detection and /tracking
//! - Runs the metrics tick on a timer
//! - Serves the latest metrics snapshot and recent alerts
//! - Accepts threshold updates via PUT /thresholds
//!
//! # Architecture
//!
//! ```text
//! POST /detection ─┐
//! POST /tracking  ─┼──→ mpsc queue ──→ engine task ──→ publisher (webhook)
//! PUT /thresholds ─┤         ↑              │
//! GET /metrics    ─┘      interval        replies
//! ```
//!
//! One task owns the engine. Requests and ticks are applied in the order
//! they are queued, each to completion.

use crate::config::{AlertThresholds, Config, ThresholdName};
use crate::core::{AlertEvent, AnalyticsError, HerdEngine, MetricsSnapshot};
use crate::ingest::{DetectionEvent, InboundEvent, TrackingEvent};
use crate::publish::{FanoutPublisher, Publisher};
use crate::webhook::{WebhookConfig, WebhookPublisher};
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};

/// Requests queued for the engine task before senders wait.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Default number of alerts returned by GET /alerts.
const DEFAULT_ALERT_LIMIT: usize = 20;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Engine configuration
    pub engine: Config,
    /// Optional webhook receiving alerts and metrics
    pub webhook: Option<WebhookConfig>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, engine: Config) -> Self {
        Self {
            port,
            engine,
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

/// Work items processed by the engine task.
enum Command {
    Event(InboundEvent),
    Tick,
    SetThreshold {
        name: ThresholdName,
        value: f64,
        reply: oneshot::Sender<Result<AlertThresholds, AnalyticsError>>,
    },
    LatestMetrics(oneshot::Sender<Option<MetricsSnapshot>>),
    RecentAlerts {
        limit: usize,
        reply: oneshot::Sender<Vec<AlertEvent>>,
    },
}

/// Shared server state
pub struct ServerState {
    commands: mpsc::Sender<Command>,
}

impl ServerState {
    async fn send(&self, command: Command) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
        self.commands
            .send(command)
            .await
            .map_err(|_| engine_unavailable())
    }
}

/// Threshold update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    pub name: String,
    pub value: f64,
}

/// Response from ingest endpoints
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn engine_unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Engine is not running".to_string(),
            code: "ENGINE_UNAVAILABLE".to_string(),
        }),
    )
}

fn invalid_threshold(e: AnalyticsError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: e.to_string(),
            code: "INVALID_THRESHOLD".to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /detection
async fn ingest_detection(
    State(state): State<Arc<ServerState>>,
    Json(event): Json<DetectionEvent>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    state.send(Command::Event(InboundEvent::Detection(event))).await?;
    Ok(accepted())
}

/// POST /tracking
async fn ingest_tracking(
    State(state): State<Arc<ServerState>>,
    Json(event): Json<TrackingEvent>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    state.send(Command::Event(InboundEvent::Tracking(event))).await?;
    Ok(accepted())
}

fn accepted() -> (StatusCode, Json<IngestResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted".to_string(),
        }),
    )
}

/// PUT /thresholds
///
/// Returns the full threshold set after the update. A rejected update
/// leaves the previous thresholds in place.
async fn update_threshold(
    State(state): State<Arc<ServerState>>,
    Json(update): Json<ThresholdUpdate>,
) -> Result<Json<AlertThresholds>, ApiError> {
    let name: ThresholdName = update.name.parse().map_err(invalid_threshold)?;

    let (reply, rx) = oneshot::channel();
    state
        .send(Command::SetThreshold {
            name,
            value: update.value,
            reply,
        })
        .await?;

    match rx.await {
        Ok(Ok(thresholds)) => Ok(Json(thresholds)),
        Ok(Err(e)) => Err(invalid_threshold(e)),
        Err(_) => Err(engine_unavailable()),
    }
}

/// GET /metrics
async fn latest_metrics(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    let (reply, rx) = oneshot::channel();
    state.send(Command::LatestMetrics(reply)).await?;

    match rx.await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No metrics computed yet".to_string(),
                code: "NO_METRICS".to_string(),
            }),
        )),
        Err(_) => Err(engine_unavailable()),
    }
}

/// GET /alerts?limit=N
async fn recent_alerts(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Vec<AlertEvent>>, ApiError> {
    let (reply, rx) = oneshot::channel();
    state
        .send(Command::RecentAlerts {
            limit: query.limit.unwrap_or(DEFAULT_ALERT_LIMIT),
            reply,
        })
        .await?;

    rx.await.map(Json).map_err(|_| engine_unavailable())
}

/// Drain commands until every sender is gone.
async fn run_engine(mut engine: HerdEngine, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Event(event) => engine.handle_event(event),
            Command::Tick => {
                if engine.is_ticking() {
                    engine.tick(Utc::now());
                }
            }
            Command::SetThreshold { name, value, reply } => {
                let result = engine
                    .set_threshold(name, value)
                    .map(|()| engine.thresholds());
                let _ = reply.send(result);
            }
            Command::LatestMetrics(reply) => {
                let _ = reply.send(engine.latest_metrics().cloned());
            }
            Command::RecentAlerts { limit, reply } => {
                let _ = reply.send(engine.alert_log().recent(limit));
            }
        }
    }

    // Dropping the publishers may join delivery threads.
    match tokio::task::spawn_blocking(move || engine.shutdown()).await {
        Ok(output) => tracing::debug!(
            "Engine task finished with {} alert(s) in log",
            output.alerts.len()
        ),
        Err(e) => tracing::warn!("Engine teardown failed: {}", e),
    }
}

/// Queue a tick every interval for as long as the engine task accepts them.
async fn run_ticker(commands: mpsc::WeakSender<Command>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(sender) = commands.upgrade() else {
            break;
        };
        if sender.send(Command::Tick).await.is_err() {
            break;
        }
    }
}

fn build_publisher(config: &ServerConfig) -> anyhow::Result<Box<dyn Publisher>> {
    let mut fanout = FanoutPublisher::new();
    if let Some(webhook) = &config.webhook {
        tracing::info!("Forwarding alerts and metrics to {}", webhook.url);
        fanout = fanout.with(Box::new(WebhookPublisher::spawn(webhook.clone())?));
    }
    Ok(Box::new(fanout))
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let engine = HerdEngine::new(&config.engine, build_publisher(&config)?);
    let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

    tokio::spawn(run_engine(engine, receiver));
    tokio::spawn(run_ticker(commands.downgrade(), config.engine.tick_interval));

    let state = Arc::new(ServerState { commands });

    let app = Router::new()
        .route("/health", get(health))
        .route("/detection", post(ingest_detection))
        .route("/tracking", post(ingest_tracking))
        .route("/thresholds", put(update_threshold))
        .route("/metrics", get(latest_metrics))
        .route("/alerts", get(recent_alerts))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("herdsense server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
