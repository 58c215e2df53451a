//! Market data structures — the core data types flowing through the system.
//!
//! # Timestamp convention
//!
//! All timestamps are in **microseconds since Unix epoch** (us). The exchange
//! sends ISO8601 strings; the decoder converts them once at the edge.

use super::enums::{AggressorSide, BookSide};

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// A single trade execution.
///
/// `trade_id` is exchange-unique per product and drives `tradesSince`-style
/// incremental reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub product_id: String,
    pub trade_id: String,
    pub side: AggressorSide,
    pub price: f64,
    pub size: f64,
    pub timestamp_us: u64,
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade({} {} {:.2}x{:.8} id={})",
            self.product_id,
            self.side.as_str(),
            self.price,
            self.size,
            self.trade_id
        )
    }
}

// ---------------------------------------------------------------------------
// Order book levels
// ---------------------------------------------------------------------------

/// One sparse price level, used in transit between decoder and book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// One decoded level-2 delta: side, price, and the new absolute size
/// (0 removes the level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevelUpdate {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
}

/// Sparse point-in-time order book copy, best levels first on both sides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseBook {
    pub product_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp_us: u64,
}

// ---------------------------------------------------------------------------
// MarketEvent — decoded wire frames
// ---------------------------------------------------------------------------

/// A decoded inbound frame, tagged by kind.
///
/// Produced by the decoder and consumed by the market-data core; never
/// crosses a thread boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Trade(Trade),
    BookSnapshot {
        product_id: String,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        exchange_ts_us: u64,
    },
    BookUpdate {
        product_id: String,
        updates: Vec<BookLevelUpdate>,
        exchange_ts_us: u64,
    },
    /// Echo of the current subscription state: `(channel, products)` pairs.
    SubscriptionAck(Vec<(String, Vec<String>)>),
    /// Server-reported error message.
    ProtocolError(String),
}

// ---------------------------------------------------------------------------
// PushEvent — consumer notifications
// ---------------------------------------------------------------------------

/// Threshold alerts raised by the monitor. Informational, not errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorAlert {
    /// A latency sample exceeded 50 ms.
    Latency { sample_ms: f64 },
    /// A render frame exceeded the 60 fps budget (16.67 ms).
    FrameDrop { frame_ms: f64 },
    /// Resident set size exceeded 1 GiB.
    MemoryPressure { rss_bytes: u64 },
}

/// Push notification delivered to downstream consumers over a bounded
/// channel. Delivery never blocks the I/O thread; on overflow the event is
/// dropped and counted.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    TradeReceived(Trade),
    OrderBookUpdated(String),
    ConnectionStatusChanged(bool),
    ErrorOccurred(String),
    Alert(MonitorAlert),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_display_is_compact() {
        let t = Trade {
            product_id: "BTC-USD".into(),
            trade_id: "42".into(),
            side: AggressorSide::Buy,
            price: 100.5,
            size: 0.25,
            timestamp_us: 1_700_000_000_000_000,
        };
        let s = t.to_string();
        assert!(s.contains("BTC-USD"));
        assert!(s.contains("BUY"));
        assert!(s.contains("id=42"));
    }
}
