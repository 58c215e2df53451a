//! Host-facing stream-client facade.
//!
//! Wires the whole pipeline from an [`AppConfig`]: key material and signer,
//! data cache, liquidity engine, monitor, and the market-data core. The host
//! constructs one `StreamClient`, subscribes products, and consumes push
//! events plus pull queries. Dropping the client after `stop()` tears
//! everything down in reverse construction order.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use cx_core::cache::{DataCache, LiveBookHandle};
use cx_core::config::AppConfig;
use cx_core::monitor::{Monitor, MonitorSnapshot};
use cx_core::trade_stats::{ProductStats, TradeStatsProcessor};
use cx_core::types::{BookLevel, PushEvent, SparseBook, Trade};
use cx_liq::{LiquidityEngine, LiquidityEngineConfig, LiquidityTimeSlice};

use crate::auth::{KeyMaterial, TokenSigner};
use crate::core::{CoreConfig, MarketDataCore};

/// Consumer-facing channel depth. Subscriptions are push-heavy; the bound
/// keeps a stalled consumer from wedging the read loop.
const EVENT_QUEUE: usize = 8192;

/// Depth of the finalized-slice channel.
const SLICE_QUEUE: usize = 1024;

/// Owns the full ingestion pipeline for one exchange connection.
pub struct StreamClient {
    cache: Arc<DataCache>,
    engine: Arc<Mutex<LiquidityEngine>>,
    monitor: Arc<Monitor>,
    trade_stats: Arc<TradeStatsProcessor>,
    core: MarketDataCore,
    events_rx: Receiver<PushEvent>,
    slices_rx: Receiver<(u64, LiquidityTimeSlice)>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient").finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Build the pipeline. Fails only on key-material errors
    /// ([`cx_core::error::CxError::KeyMissing`] / `KeyMalformed`).
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let material = KeyMaterial::load(Path::new(config.key_file_path()))?;
        let signer = Arc::new(TokenSigner::new(&material)?);

        let cache = Arc::new(DataCache::new());
        let monitor = Arc::new(Monitor::new());
        let trade_stats = Arc::new(TradeStatsProcessor::new());

        let mut engine = LiquidityEngine::new(LiquidityEngineConfig {
            price_resolution: config.price_resolution(),
            timeframes_ms: config.timeframes_ms(),
            max_history_slices: config.max_history_slices(),
            depth_limit: config.depth_limit(),
            display_mode: config.display_mode(),
            ..Default::default()
        });

        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE);
        let (slices_tx, slices_rx) = crossbeam_channel::bounded(SLICE_QUEUE);
        monitor.set_alert_sender(events_tx.clone());
        engine.set_slice_sender(slices_tx);
        let engine = Arc::new(Mutex::new(engine));

        let core = MarketDataCore::new(
            CoreConfig::new(config.ws_url(), config.channels()),
            signer,
            Arc::clone(&cache),
            Arc::clone(&engine),
            Arc::clone(&monitor),
            Arc::clone(&trade_stats),
            events_tx,
        );

        Ok(Self { cache, engine, monitor, trade_stats, core, events_rx, slices_rx })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&mut self) {
        self.core.start();
    }

    pub async fn stop(&mut self) {
        self.core.stop().await;
    }

    pub fn subscribe(&self, products: &[String]) {
        self.core.subscribe(products);
    }

    pub fn unsubscribe(&self, products: &[String]) {
        self.core.unsubscribe(products);
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    // -----------------------------------------------------------------------
    // Push interfaces
    // -----------------------------------------------------------------------

    /// Consumer notification channel (trades, book updates, status, errors,
    /// monitor alerts).
    pub fn events(&self) -> &Receiver<PushEvent> {
        &self.events_rx
    }

    /// Finalized liquidity slices, `(timeframe_ms, slice)` per finalization.
    pub fn finalized_slices(&self) -> &Receiver<(u64, LiquidityTimeSlice)> {
        &self.slices_rx
    }

    // -----------------------------------------------------------------------
    // Pull queries
    // -----------------------------------------------------------------------

    pub fn recent_trades(&self, product_id: &str) -> Vec<Trade> {
        self.cache.recent_trades(product_id)
    }

    pub fn trades_since(&self, product_id: &str, last_trade_id: &str) -> Vec<Trade> {
        self.cache.trades_since(product_id, last_trade_id)
    }

    /// Sparse book copy (empty when absent).
    pub fn book(&self, product_id: &str) -> SparseBook {
        self.cache.book(product_id)
    }

    /// Up to `max_levels` best levels per side, `(bids, asks)`.
    pub fn book_depth(
        &self,
        product_id: &str,
        max_levels: usize,
    ) -> (Vec<BookLevel>, Vec<BookLevel>) {
        self.cache.book_depth(product_id, max_levels)
    }

    /// Cumulative volume delta for a product, 0 when unseen.
    pub fn cvd(&self, product_id: &str) -> f64 {
        self.trade_stats.cvd(product_id)
    }

    /// Per-product trade statistics (CVD, per-side volume, counts).
    pub fn trade_stats(&self, product_id: &str) -> Option<ProductStats> {
        self.trade_stats.stats(product_id)
    }

    /// Shared dense-book handle, when the product has received a snapshot.
    pub fn live_book(&self, product_id: &str) -> Option<LiveBookHandle> {
        self.cache.live_book(product_id)
    }

    /// Liquidity engine handle; lock it for `slice_at` / `visible_slices` /
    /// `suggest_timeframe` queries.
    pub fn engine(&self) -> Arc<Mutex<LiquidityEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    pub fn monitor_snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cx_core::error::CxError;

    #[test]
    fn missing_key_file_fails_construction() {
        let config = AppConfig {
            key_file_path: Some("/definitely/not/here/key.json".to_string()),
            ..Default::default()
        };
        let err = StreamClient::from_config(&config).unwrap_err();
        let cx = err.downcast_ref::<CxError>().expect("domain error");
        assert!(matches!(cx, CxError::KeyMissing(_)));
    }

    #[test]
    fn malformed_key_file_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, r#"{"key": "id", "secret": "not a pem"}"#).unwrap();

        let config = AppConfig {
            key_file_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let err = StreamClient::from_config(&config).unwrap_err();
        let cx = err.downcast_ref::<CxError>().expect("domain error");
        assert!(matches!(cx, CxError::KeyMalformed(_)));
    }
}
