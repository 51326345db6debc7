//! Event dispatcher binary: reads JSON-lines events from stdin and ships them

use clap::Parser;
use event_dispatcher::{AnalyticsClient, Config, DispatchVariant, Event, Result, new_session_id};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version, about = "Buffer analytics events and deliver them to a collector")]
struct Cli {
    /// Application key (overrides APTABASE_APP_KEY)
    #[arg(long)]
    app_key: Option<String>,

    /// Collector host (overrides APTABASE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// batch or single (overrides DISPATCH_VARIANT)
    #[arg(long)]
    variant: Option<DispatchVariant>,

    /// Snapshot directory (overrides STORE_DIR)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Seconds between timer flushes (overrides FLUSH_INTERVAL_SECONDS)
    #[arg(long)]
    flush_interval_seconds: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(app_key) = self.app_key {
            config.app_key = app_key;
        }
        if let Some(host) = self.host {
            config.host = Some(host);
        }
        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(store_dir) = self.store_dir {
            config.store_dir = store_dir;
        }
        if let Some(seconds) = self.flush_interval_seconds {
            config.flush_interval = Duration::from_secs(seconds);
        }
    }
}

/// One stdin line
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputEvent {
    event_name: String,
    #[serde(default)]
    props: HashMap<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    info!("Starting event dispatcher v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    Cli::parse().apply(&mut config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Dispatcher configuration - Variant: {:?}, Collector: {}, Store: {}",
        config.variant,
        config.base_url().unwrap_or_default(),
        config.store_dir.display()
    );

    let client = AnalyticsClient::new(config).await?;
    client.start_flush_timer();

    let session_id = new_session_id();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str::<InputEvent>(&line) {
                    Ok(input) => {
                        debug!("Queued {}", input.event_name);
                        client.enqueue(Event::new(input.event_name, session_id.clone()).with_props(input.props));
                    }
                    Err(e) => warn!("Skipping malformed input line: {}", e),
                },
                None => {
                    info!("Input closed");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to wait for shutdown signal: {}", e);
                }
                info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        error!("Shutdown failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
