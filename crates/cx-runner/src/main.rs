//! # cx-runner
//!
//! Main entry point for the market-data pipeline.
//!
//! Loads a JSON configuration file, builds the stream client, subscribes the
//! configured products, and runs until Ctrl+C. Push events are drained on a
//! consumer task that logs a digest, standing in for a rendering surface.
//!
//! # Usage
//!
//! ```bash
//! cx-runner config.json --products BTC-USD,ETH-USD --log-level info
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use cx_core::types::PushEvent;
use cx_md::client::StreamClient;

/// Interval between monitor digests in the log.
const STATS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Coinbase Advanced Trade market-data runner.
#[derive(Parser)]
#[command(name = "cx-runner", about = "Coinbase Advanced Trade market-data runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Products to subscribe, overriding the config (comma-separated).
    #[arg(short, long, value_delimiter = ',')]
    products: Option<Vec<String>>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration, then initialize logging from config + flags.
    let config = cx_core::config::load_config(&cli.config)?;
    let log_level = cli.log_level.as_deref().unwrap_or(config.log_level()).to_string();
    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    cx_core::logging::init_logging(&log_level, log_dir.as_deref(), "cx-runner");

    info!("cx-runner starting — config={}, endpoint={}", cli.config.display(), config.ws_url());

    // 2. Build and start the pipeline.
    let mut client = StreamClient::from_config(&config)?;
    client.start();

    let products = cli.products.unwrap_or_else(|| config.products());
    if products.is_empty() {
        warn!("no products configured — stream will stay idle until a subscribe");
    } else {
        info!("subscribing {} product(s): {}", products.len(), products.join(", "));
        client.subscribe(&products);
    }

    // 3. Drain push events on a consumer task.
    let events = client.events().clone();
    let consumer = tokio::task::spawn_blocking(move || {
        for event in events.iter() {
            match event {
                PushEvent::ConnectionStatusChanged(connected) => {
                    info!("connection status: {}", if connected { "up" } else { "down" });
                }
                PushEvent::ErrorOccurred(message) => error!("stream error: {message}"),
                PushEvent::Alert(alert) => warn!("monitor alert: {alert:?}"),
                // Trade and book traffic is high-volume; the cache holds the
                // state, nothing to do here.
                PushEvent::TradeReceived(_) | PushEvent::OrderBookUpdated(_) => {}
            }
        }
    });

    // 4. Periodic monitor digest.
    let monitor = client.monitor();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            info!("{}", monitor.snapshot());
        }
    });

    // 5. Wait for shutdown signal.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    stats_task.abort();
    client.stop().await;
    // The event channel closes with the core; the consumer drains and exits.
    drop(client);
    let _ = consumer.await;

    info!("stopped — goodbye");
    Ok(())
}
