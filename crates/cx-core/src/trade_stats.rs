//! Per-product trade statistics derived from the live trade stream.
//!
//! Tracks cumulative volume delta (CVD) — buy size adds, sell size
//! subtracts — plus per-side volume and trade counts. Unknown-side trades
//! count toward totals but leave the CVD untouched.
//!
//! Updated inline by the event-application path; queries are lock-shared
//! and never block other readers.

use std::sync::RwLock;

use ahash::AHashMap;

use crate::types::{AggressorSide, Trade};

/// Running statistics for one product.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProductStats {
    /// Cumulative volume delta: Σ buy size − Σ sell size.
    pub cvd: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trade_count: u64,
    /// Price of the most recent trade.
    pub last_price: f64,
}

/// Per-product CVD and volume accumulator.
#[derive(Default)]
pub struct TradeStatsProcessor {
    stats: RwLock<AHashMap<String, ProductStats>>,
}

impl TradeStatsProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one trade into its product's statistics.
    pub fn process_trade(&self, trade: &Trade) {
        let mut stats = self.stats.write().expect("stats lock poisoned");
        let entry = stats.entry(trade.product_id.clone()).or_default();
        match trade.side {
            AggressorSide::Buy => {
                entry.cvd += trade.size;
                entry.buy_volume += trade.size;
            }
            AggressorSide::Sell => {
                entry.cvd -= trade.size;
                entry.sell_volume += trade.size;
            }
            AggressorSide::Unknown => {}
        }
        entry.trade_count += 1;
        entry.last_price = trade.price;
    }

    /// Current CVD for a product, 0 when unseen.
    pub fn cvd(&self, product_id: &str) -> f64 {
        self.stats
            .read()
            .expect("stats lock poisoned")
            .get(product_id)
            .map_or(0.0, |s| s.cvd)
    }

    /// Full statistics for a product, `None` when unseen.
    pub fn stats(&self, product_id: &str) -> Option<ProductStats> {
        self.stats.read().expect("stats lock poisoned").get(product_id).copied()
    }

    /// Drop one product's accumulated statistics.
    pub fn reset(&self, product_id: &str) {
        self.stats.write().expect("stats lock poisoned").remove(product_id);
    }
}
