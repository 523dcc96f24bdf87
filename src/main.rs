//! herdsense CLI
//!
//! Streaming herd analytics over detection and tracking feeds.

use chrono::Utc;
use clap::{Parser, Subcommand};
use herdsense::{
    config::{Config, ThresholdName},
    core::{AlertEvent, HerdEngine, Severity},
    ingest::{FeedReader, FeedSource},
    publish::{FanoutPublisher, JsonLinesPublisher, Outbound, Publisher},
    stats::create_shared_stats_with_persistence,
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "webhook")]
use herdsense::webhook::{WebhookConfig, WebhookPublisher};

#[derive(Parser)]
#[command(name = "herdsense")]
#[command(version = VERSION)]
#[command(about = "Streaming herd analytics: motion, clustering, cohesion and alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a JSON-lines event feed
    Run {
        /// Input file, or '-' for stdin
        #[arg(long, short, default_value = "-")]
        input: String,

        /// Do not write published messages to stdout
        #[arg(long)]
        quiet: bool,

        /// Forward alerts and metrics to this URL (requires webhook feature)
        #[arg(long)]
        webhook_url: Option<String>,

        /// Bearer token for the webhook
        #[arg(long)]
        webhook_token: Option<String>,
    },

    /// Stop the periodic metrics tick
    Pause,

    /// Restart the periodic metrics tick
    Resume,

    /// Show configuration and cumulative statistics
    Status,

    /// Update an alert threshold (rapid_movement, crowding, unusual_activity)
    SetThreshold {
        name: String,
        value: f64,
    },

    /// Merge exported alert logs
    Export {
        /// Directory holding session exports
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,

    /// Serve the HTTP API (requires server feature)
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind to
        #[arg(long, default_value = "8700")]
        port: u16,

        /// Forward alerts and metrics to this URL
        #[arg(long)]
        webhook_url: Option<String>,

        /// Bearer token for the webhook
        #[arg(long)]
        webhook_token: Option<String>,
    },
}

fn main() {
    // Logs go to stderr; stdout carries published messages.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("herdsense=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            quiet,
            webhook_url,
            webhook_token,
        } => {
            cmd_run(&input, quiet, webhook_url, webhook_token);
        }
        Commands::Pause => {
            cmd_pause();
        }
        Commands::Resume => {
            cmd_resume();
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::SetThreshold { name, value } => {
            cmd_set_threshold(&name, value);
        }
        Commands::Export { output, format } => {
            cmd_export(output, &format);
        }
        Commands::Config => {
            cmd_config();
        }
        #[cfg(feature = "server")]
        Commands::Serve {
            port,
            webhook_url,
            webhook_token,
        } => {
            cmd_serve(port, webhook_url, webhook_token);
        }
    }
}

/// Prints alerts to stderr in the configured display timezone.
struct ConsolePublisher {
    timezone: chrono_tz::Tz,
}

impl Publisher for ConsolePublisher {
    fn publish(&mut self, message: Outbound) {
        if let Outbound::Alert(alert) = message {
            let marker = match alert.severity {
                Severity::High => "!!",
                Severity::Medium => "! ",
            };
            eprintln!(
                "[{}] {} {}",
                alert.timestamp.with_timezone(&self.timezone).format("%H:%M:%S %Z"),
                marker,
                alert.message
            );
        }
    }
}

#[allow(unused_variables)]
fn cmd_run(input: &str, quiet: bool, webhook_url: Option<String>, webhook_token: Option<String>) {
    eprintln!("herdsense v{VERSION}");
    eprintln!();

    // Load or create configuration
    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let source = FeedSource::from_arg(input);
    eprintln!("Reading events from {source}");
    eprintln!("  Tick interval: {}ms", config.tick_interval.as_millis());
    eprintln!("  Retention window: {}s", config.retention_window.as_secs());
    eprintln!(
        "  Thresholds: rapid movement {}, crowding {}",
        config.thresholds.rapid_movement_speed, config.thresholds.crowding_count
    );

    let mut publisher = FanoutPublisher::new().with(Box::new(ConsolePublisher {
        timezone: config.timezone(),
    }));
    if !quiet {
        publisher = publisher.with(Box::new(JsonLinesPublisher::new(std::io::stdout())));
    }

    #[cfg(feature = "webhook")]
    if let Some(url) = webhook_url {
        let mut webhook = WebhookConfig::new(url);
        if let Some(token) = webhook_token {
            webhook = webhook.with_token(token);
        }
        match WebhookPublisher::spawn(webhook) {
            Ok(p) => {
                eprintln!("  Webhook forwarding: enabled");
                publisher = publisher.with(Box::new(p));
            }
            Err(e) => {
                eprintln!("Warning: Webhook initialization failed: {e}");
                eprintln!("Continuing without webhook forwarding.");
            }
        }
    }

    #[cfg(not(feature = "webhook"))]
    if webhook_url.is_some() {
        eprintln!("Warning: --webhook-url ignored (webhook feature not enabled at compile time)");
    }

    let stats = create_shared_stats_with_persistence(config.data_path.join("stats.json"));
    let mut engine = HerdEngine::with_stats(&config, Box::new(publisher), stats.clone());
    eprintln!("  Instance ID: {}", engine.instance_id());

    let mut feed = FeedReader::new(source);
    if let Err(e) = feed.start() {
        eprintln!("Error opening input: {e}");
        std::process::exit(1);
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    // Support pause/resume and threshold changes from another process by
    // polling the config file.
    let mut paused = config.paused;
    let mut last_config_check = Instant::now();

    if paused {
        eprintln!("Metrics tick is currently paused.");
        eprintln!("Run `herdsense resume` to start publishing.");
    }
    eprintln!();
    eprintln!("Press Ctrl+C to stop");
    eprintln!();

    let receiver = feed.receiver().clone();

    while running.load(Ordering::SeqCst) {
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    if paused {
                        eprintln!("Pausing metrics tick...");
                        engine.pause();
                    } else {
                        eprintln!("Resuming metrics tick...");
                        engine.resume();
                    }
                }
                engine.apply_thresholds(cfg.thresholds);
            }
            last_config_check = Instant::now();
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => engine.handle_event(event),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                tracing::info!("Input exhausted");
                break;
            }
        }

        engine.poll_tick(Instant::now());
    }

    eprintln!();
    eprintln!("Stopping...");
    feed.stop();

    // Publish metrics for whatever arrived since the last tick.
    if engine.is_ticking() {
        engine.tick(Utc::now());
    }

    if feed.skipped_lines() > 0 {
        eprintln!("Skipped {} malformed input line(s)", feed.skipped_lines());
    }

    let output = engine.shutdown();

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    if !output.alerts.is_empty() {
        let path = config.export_path.join(format!("session_{stamp}_alerts.json"));
        write_export(&path, &output.alerts, "alerts");
    }
    if !output.metrics.is_empty() {
        let path = config.export_path.join(format!("session_{stamp}_metrics.json"));
        write_export(&path, &output.metrics, "metrics snapshots");
    }

    // Final stats
    eprintln!();
    eprintln!("{}", stats.summary());
}

fn write_export<T: serde::Serialize>(path: &Path, items: &[T], label: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(items) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                eprintln!("Error writing {label}: {e}");
            } else {
                eprintln!("Exported {} {} to {:?}", items.len(), label, path);
            }
        }
        Err(e) => {
            eprintln!("Error serializing {label}: {e}");
        }
    }
}

fn cmd_pause() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = true;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Metrics tick paused. Use 'herdsense resume' to continue.");
}

fn cmd_resume() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = false;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Metrics tick resumed.");
}

fn cmd_set_threshold(name: &str, value: f64) {
    let mut config = Config::load().unwrap_or_default();

    let result = name
        .parse::<ThresholdName>()
        .and_then(|name| config.thresholds.set(name, value));
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Threshold {name} set to {value}.");
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("herdsense Status");
    println!("================");
    println!();

    println!("Configuration:");
    println!("  Tick interval: {}ms", config.tick_interval.as_millis());
    println!("  Retention window: {}s", config.retention_window.as_secs());
    println!("  Cluster threshold: {}", config.cluster_threshold);
    println!(
        "  Rapid movement threshold: {}",
        config.thresholds.rapid_movement_speed
    );
    println!("  Crowding threshold: {}", config.thresholds.crowding_count);
    println!("  Paused: {}", config.paused);
    println!();

    // Load and show cumulative stats if available
    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                if let Some(v) = stats.get("detection_events") {
                    println!("  Detection events: {v}");
                }
                if let Some(v) = stats.get("tracking_events") {
                    println!("  Tracking events: {v}");
                }
                if let Some(v) = stats.get("ticks") {
                    println!("  Ticks: {v}");
                }
                if let Some(v) = stats.get("alerts_emitted") {
                    println!("  Alerts emitted: {v}");
                }
                if let Some(v) = stats.get("snapshots_evicted") {
                    println!("  Snapshots evicted: {v}");
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_export(output: Option<PathBuf>, format: &str) {
    let config = Config::load().unwrap_or_default();
    let export_dir = output.unwrap_or(config.export_path.clone());

    // Find all alert exports
    let alert_files: Vec<PathBuf> = std::fs::read_dir(&export_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with("_alerts.json"))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();

    if alert_files.is_empty() {
        println!("No alert exports found in {export_dir:?}");
        println!("Run 'herdsense run' to process a feed.");
        return;
    }

    println!(
        "Found {} alert file(s) in {:?}",
        alert_files.len(),
        export_dir
    );

    let mut all_alerts: Vec<AlertEvent> = Vec::new();
    for file in &alert_files {
        if let Ok(content) = std::fs::read_to_string(file) {
            match serde_json::from_str::<Vec<AlertEvent>>(&content) {
                Ok(alerts) => all_alerts.extend(alerts),
                Err(e) => eprintln!("Warning: Skipping {file:?}: {e}"),
            }
        }
    }
    all_alerts.sort_by_key(|a| a.timestamp);

    println!("Total alerts: {}", all_alerts.len());

    let output_path = export_dir.join(format!(
        "export_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        if format == "jsonl" { "jsonl" } else { "json" }
    ));

    let result = if format == "jsonl" {
        // JSON Lines format
        let lines: Vec<String> = all_alerts
            .iter()
            .filter_map(|a| serde_json::to_string(a).ok())
            .collect();
        std::fs::write(&output_path, lines.join("\n"))
    } else {
        match serde_json::to_string_pretty(&all_alerts) {
            Ok(json) => std::fs::write(&output_path, json),
            Err(e) => {
                eprintln!("Error serializing: {e}");
                return;
            }
        }
    };

    match result {
        Ok(_) => println!("Exported to {output_path:?}"),
        Err(e) => eprintln!("Error writing export: {e}"),
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16, webhook_url: Option<String>, webhook_token: Option<String>) {
    use herdsense::server::{run, ServerConfig};

    let config = Config::load().unwrap_or_default();
    let mut server_config = ServerConfig::new(port, config);
    if let Some(url) = webhook_url {
        let mut webhook = WebhookConfig::new(url);
        if let Some(token) = webhook_token {
            webhook = webhook.with_token(token);
        }
        server_config = server_config.with_webhook(webhook);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let (addr, shutdown_tx) = match run(server_config).await {
            Ok(started) => started,
            Err(e) => {
                eprintln!("Error starting server: {e}");
                std::process::exit(1);
            }
        };
        println!("herdsense v{VERSION} listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Error waiting for Ctrl+C: {e}");
        }
        let _ = shutdown_tx.send(());
    });
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
