//! Liquidity time slices and per-price-level metrics.
//!
//! A slice covers one `[start_ms, end_ms)` bucket of one timeframe. Price
//! levels are indexed by integer tick (`tick = round(price / resolution)`)
//! into two dense metric vectors, so lookups and updates are O(1).

use cx_core::types::{BookSide, DisplayMode};

/// Integer price-tick index. `price = tick as f64 * tick_size`.
pub type Tick = i32;

// ---------------------------------------------------------------------------
// PriceLevelMetrics
// ---------------------------------------------------------------------------

/// Aggregated liquidity observed at one price tick during one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceLevelMetrics {
    /// Sum of all liquidity seen.
    pub total_liquidity: f64,
    /// Running average (`total / snapshot_count`).
    pub avg_liquidity: f64,
    /// Peak liquidity seen.
    pub max_liquidity: f64,
    /// Minimum liquidity seen while present.
    pub min_liquidity: f64,
    /// Liquidity credited only when the level persisted (anti-spoof).
    pub resting_liquidity: f64,
    /// Number of snapshots that included this level.
    pub snapshot_count: u32,
    /// Timestamp of the first snapshot containing this level.
    pub first_seen_ms: u64,
    /// Timestamp of the last observation (bumped while absent, too).
    pub last_seen_ms: u64,
    /// Sequence stamp of the last snapshot containing this level.
    pub last_seen_seq: u32,
}

impl PriceLevelMetrics {
    /// Present for at least 3 snapshots — enough history for a running
    /// resting estimate.
    pub fn was_consistent(&self) -> bool {
        self.snapshot_count > 2
    }

    /// Fraction of the slice during which this level was observed present:
    /// `snapshot_count × base_interval / slice_duration`, clamped to 1.
    ///
    /// A level that appears in every base snapshot of the slice scores 1.0;
    /// one that flickers in and out scores proportionally lower, which is
    /// what the resting-liquidity filter keys on.
    pub fn persistence_ratio(&self, slice_duration_ms: u64, base_interval_ms: u64) -> f64 {
        if slice_duration_ms == 0 || self.snapshot_count == 0 {
            return 0.0;
        }
        let covered = self.snapshot_count as f64 * base_interval_ms as f64;
        (covered / slice_duration_ms as f64).min(1.0)
    }
}

// ---------------------------------------------------------------------------
// LiquidityTimeSlice
// ---------------------------------------------------------------------------

/// Aggregated liquidity for one time bucket of one timeframe.
///
/// `start_ms == 0` marks a slice that has not been initialized yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiquidityTimeSlice {
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,

    /// Lowest price tick seen in this slice.
    pub min_tick: Tick,
    /// Highest price tick seen in this slice.
    pub max_tick: Tick,
    /// Price increment per tick (the engine's price resolution).
    pub tick_size: f64,

    /// Per-level metrics, index = `tick - min_tick`.
    pub bid_metrics: Vec<PriceLevelMetrics>,
    pub ask_metrics: Vec<PriceLevelMetrics>,
}

impl LiquidityTimeSlice {
    /// Quantize a price to this slice's tick grid.
    pub fn price_to_tick(&self, price: f64) -> Tick {
        (price / self.tick_size).round() as Tick
    }

    /// Price at the center of a tick.
    pub fn tick_to_price(&self, tick: Tick) -> f64 {
        f64::from(tick) * self.tick_size
    }

    /// Returns `true` if `ts_ms` falls inside `[start_ms, end_ms)`.
    pub fn contains(&self, ts_ms: u64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }

    /// Returns `true` if `[view_start, view_end]` intersects this slice.
    pub fn intersects(&self, view_start_ms: u64, view_end_ms: u64) -> bool {
        self.end_ms >= view_start_ms && self.start_ms <= view_end_ms
    }

    /// O(1) metrics access by tick.
    pub fn metrics_at_tick(&self, tick: Tick, side: BookSide) -> Option<&PriceLevelMetrics> {
        if tick < self.min_tick || tick > self.max_tick {
            return None;
        }
        let metrics = match side {
            BookSide::Bid => &self.bid_metrics,
            BookSide::Ask => &self.ask_metrics,
        };
        metrics.get((tick - self.min_tick) as usize)
    }

    /// O(1) metrics access by price.
    pub fn metrics_at(&self, price: f64, side: BookSide) -> Option<&PriceLevelMetrics> {
        self.metrics_at_tick(self.price_to_tick(price), side)
    }

    /// Metric value a renderer should draw for this level, 0 when absent.
    pub fn display_value(&self, price: f64, side: BookSide, mode: DisplayMode) -> f64 {
        let Some(metrics) = self.metrics_at(price, side) else {
            return 0.0;
        };
        match mode {
            DisplayMode::Average => metrics.avg_liquidity,
            DisplayMode::Maximum => metrics.max_liquidity,
            DisplayMode::Resting => metrics.resting_liquidity,
            DisplayMode::Total => metrics.total_liquidity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_with_level() -> LiquidityTimeSlice {
        LiquidityTimeSlice {
            start_ms: 1_000,
            end_ms: 2_000,
            duration_ms: 1_000,
            min_tick: 100,
            max_tick: 102,
            tick_size: 1.0,
            bid_metrics: vec![
                PriceLevelMetrics {
                    total_liquidity: 6.0,
                    avg_liquidity: 2.0,
                    max_liquidity: 3.0,
                    min_liquidity: 1.0,
                    resting_liquidity: 2.0,
                    snapshot_count: 3,
                    first_seen_ms: 1_000,
                    last_seen_ms: 1_900,
                    last_seen_seq: 3,
                },
                PriceLevelMetrics::default(),
                PriceLevelMetrics::default(),
            ],
            ask_metrics: vec![PriceLevelMetrics::default(); 3],
        }
    }

    #[test]
    fn tick_math_round_trips() {
        let slice = slice_with_level();
        assert_eq!(slice.price_to_tick(100.0), 100);
        assert_eq!(slice.price_to_tick(100.4), 100);
        assert_eq!(slice.price_to_tick(100.6), 101);
        assert_eq!(slice.tick_to_price(100), 100.0);
    }

    #[test]
    fn metrics_lookup_in_and_out_of_range() {
        let slice = slice_with_level();
        assert!(slice.metrics_at(100.0, BookSide::Bid).is_some());
        assert!(slice.metrics_at(99.0, BookSide::Bid).is_none());
        assert!(slice.metrics_at(103.0, BookSide::Bid).is_none());
    }

    #[test]
    fn display_value_selects_metric() {
        let slice = slice_with_level();
        assert_eq!(slice.display_value(100.0, BookSide::Bid, DisplayMode::Average), 2.0);
        assert_eq!(slice.display_value(100.0, BookSide::Bid, DisplayMode::Maximum), 3.0);
        assert_eq!(slice.display_value(100.0, BookSide::Bid, DisplayMode::Resting), 2.0);
        assert_eq!(slice.display_value(100.0, BookSide::Bid, DisplayMode::Total), 6.0);
        // Absent level draws as zero.
        assert_eq!(slice.display_value(101.0, BookSide::Ask, DisplayMode::Average), 0.0);
    }

    #[test]
    fn persistence_ratio_is_snapshot_coverage() {
        let mut metrics = PriceLevelMetrics { snapshot_count: 10, ..Default::default() };
        assert!((metrics.persistence_ratio(1_000, 100) - 1.0).abs() < 1e-9);

        metrics.snapshot_count = 2;
        assert!((metrics.persistence_ratio(1_000, 100) - 0.2).abs() < 1e-9);

        metrics.snapshot_count = 0;
        assert_eq!(metrics.persistence_ratio(1_000, 100), 0.0);

        // Clamped at 1 even if more snapshots than expected arrive.
        metrics.snapshot_count = 20;
        assert!((metrics.persistence_ratio(1_000, 100) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn was_consistent_needs_three_snapshots() {
        let mut metrics = PriceLevelMetrics::default();
        assert!(!metrics.was_consistent());
        metrics.snapshot_count = 3;
        assert!(metrics.was_consistent());
    }
}
