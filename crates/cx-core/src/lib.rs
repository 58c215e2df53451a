//! # cx-core
//!
//! Core crate for the CX market-data system, providing:
//!
//! - **Types** (`types`) — enums, trades, book levels, event unions
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `CxError` via thiserror
//! - **Ring buffer** (`ring`) — fixed-capacity trade history ring
//! - **Dense order book** (`book`) — O(1) price-grid book with dense views
//! - **Data cache** (`cache`) — thread-safe store for trades & live books
//! - **Monitor** (`monitor`) — counters, latency windows, alert thresholds
//! - **WebSocket** (`ws`) — TLS WS client with auto-reconnect + keep-alive
//! - **Rolling stats** (`stats`) — bounded sample windows
//! - **Trade stats** (`trade_stats`) — per-product CVD and volume
//! - **Time utilities** (`time_util`) — high-precision timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod book;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod ring;
pub mod stats;
pub mod time_util;
pub mod trade_stats;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
