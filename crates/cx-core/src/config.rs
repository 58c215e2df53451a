//! Configuration parsing for the CX market-data system.
//!
//! The runner reads a single JSON config file. Every field is optional and
//! falls back to the documented default, so an empty object `{}` is a valid
//! config (public endpoint, both channels, default aggregation settings).
//!
//! # Example config
//!
//! ```json
//! {
//!   "key_file_path": "key.json",
//!   "products": ["BTC-USD", "ETH-USD"],
//!   "channels": ["level2", "market_trades"],
//!   "price_resolution": 1.0,
//!   "timeframes_ms": [100, 250, 500, 1000, 2000, 5000, 10000],
//!   "max_history_slices": 5000,
//!   "depth_limit": 2000,
//!   "display_mode": "average",
//!   "log_level": "info"
//! }
//! ```

use serde::Deserialize;

use crate::types::{Channel, DisplayMode};

/// Default WebSocket endpoint of the Advanced Trade feed.
pub const DEFAULT_HOST: &str = "advanced-trade-ws.coinbase.com";
pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_TARGET: &str = "/";

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Path to the JSON key material file (default `key.json`).
    pub key_file_path: Option<String>,

    /// WebSocket endpoint overrides.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub target: Option<String>,

    /// Products to subscribe at startup (e.g. `["BTC-USD"]`).
    pub products: Option<Vec<String>>,

    /// Channel subset (default: both `level2` and `market_trades`).
    pub channels: Option<Vec<Channel>>,

    /// Liquidity engine quantization step in currency units (default 1.0).
    pub price_resolution: Option<f64>,

    /// Ordered set of aggregation bucket widths in milliseconds.
    pub timeframes_ms: Option<Vec<u64>>,

    /// Retained slices per timeframe (default 5000).
    pub max_history_slices: Option<usize>,

    /// Per-snapshot bid/ask level cap (default 2000).
    pub depth_limit: Option<usize>,

    /// Default metric for liquidity queries (default `average`).
    pub display_mode: Option<DisplayMode>,

    /// Log level if `RUST_LOG` is not set (default `info`).
    pub log_level: Option<String>,

    /// Optional directory for daily-rotating log files.
    pub log_dir: Option<String>,
}

impl AppConfig {
    pub fn key_file_path(&self) -> &str {
        self.key_file_path.as_deref().unwrap_or("key.json")
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(DEFAULT_TARGET)
    }

    /// Full `wss://` URL of the configured endpoint.
    pub fn ws_url(&self) -> String {
        format!("wss://{}:{}{}", self.host(), self.port(), self.target())
    }

    pub fn products(&self) -> Vec<String> {
        self.products.clone().unwrap_or_default()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.clone().unwrap_or_else(|| Channel::ALL.to_vec())
    }

    pub fn price_resolution(&self) -> f64 {
        self.price_resolution.unwrap_or(1.0)
    }

    pub fn timeframes_ms(&self) -> Vec<u64> {
        self.timeframes_ms
            .clone()
            .unwrap_or_else(|| vec![100, 250, 500, 1000, 2000, 5000, 10000])
    }

    pub fn max_history_slices(&self) -> usize {
        self.max_history_slices.unwrap_or(5000)
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_limit.unwrap_or(2000)
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode.unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.host(), DEFAULT_HOST);
        assert_eq!(cfg.port(), 443);
        assert_eq!(cfg.target(), "/");
        assert_eq!(cfg.ws_url(), "wss://advanced-trade-ws.coinbase.com:443/");
        assert_eq!(cfg.channels(), vec![Channel::Level2, Channel::MarketTrades]);
        assert_eq!(cfg.price_resolution(), 1.0);
        assert_eq!(cfg.timeframes_ms(), vec![100, 250, 500, 1000, 2000, 5000, 10000]);
        assert_eq!(cfg.max_history_slices(), 5000);
        assert_eq!(cfg.depth_limit(), 2000);
        assert_eq!(cfg.display_mode(), DisplayMode::Average);
        assert_eq!(cfg.key_file_path(), "key.json");
    }

    #[test]
    fn overrides_parse() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{
                "host": "localhost",
                "port": 8080,
                "channels": ["market_trades"],
                "products": ["BTC-USD"],
                "display_mode": "resting",
                "timeframes_ms": [100, 1000]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.ws_url(), "wss://localhost:8080/");
        assert_eq!(cfg.channels(), vec![Channel::MarketTrades]);
        assert_eq!(cfg.products(), vec!["BTC-USD".to_string()]);
        assert_eq!(cfg.display_mode(), DisplayMode::Resting);
        assert_eq!(cfg.timeframes_ms(), vec![100, 1000]);
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"products": ["ETH-USD"]}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.products(), vec!["ETH-USD".to_string()]);
    }

    #[test]
    fn load_config_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_config(&path).is_err());
    }
}
