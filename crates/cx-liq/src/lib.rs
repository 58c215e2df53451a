//! # cx-liq
//!
//! Multi-resolution liquidity time-series engine.
//!
//! Ingests 100 ms order-book snapshots (dense views from the live books, or
//! sparse copies), buckets them into configurable timeframes, and maintains
//! per-timeframe, per-price-tick liquidity metrics with an anti-spoofing
//! persistence filter:
//!
//! - [`slice`] — time slices and per-level metrics, O(1) tick-indexed
//! - [`engine`] — bucketing, finalization, history, queries

pub mod engine;
pub mod slice;

pub use engine::{BookSnapshot, LiquidityEngine, LiquidityEngineConfig};
pub use slice::{LiquidityTimeSlice, PriceLevelMetrics, Tick};
