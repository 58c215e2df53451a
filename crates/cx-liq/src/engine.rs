//! Liquidity time-series aggregation engine.
//!
//! The engine receives quantized order-book snapshots at the base cadence
//! (100 ms), folds each one into the current slice of every configured
//! timeframe, and finalizes a slice whenever its bucket boundary is crossed.
//! Finalization applies the anti-spoofing filter: a level's resting
//! liquidity is its average only if the level persisted across more than
//! 80 % of the slice, else zero.
//!
//! Single-writer: all ingestion happens from one task. Readers either hold
//! the owner's lock while borrowing slices or receive finalized slices over
//! the registered channel.

use std::collections::VecDeque;

use ahash::AHashMap;
use crossbeam_channel::Sender;
use tracing::{debug, info};

use cx_core::book::DenseSnapshotView;
use cx_core::types::{BookSide, DisplayMode, SparseBook};

use crate::slice::{LiquidityTimeSlice, PriceLevelMetrics, Tick};

/// Resting-liquidity persistence threshold.
const PERSISTENCE_THRESHOLD: f64 = 0.8;

// ---------------------------------------------------------------------------
// BookSnapshot — quantized intermediate
// ---------------------------------------------------------------------------

/// One quantized order-book observation: liquidity summed per price tick.
#[derive(Debug, Clone, Default)]
pub struct BookSnapshot {
    pub timestamp_ms: u64,
    pub bids: AHashMap<Tick, f64>,
    pub asks: AHashMap<Tick, f64>,
}

impl BookSnapshot {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine settings. `Default` gives the production values.
#[derive(Debug, Clone)]
pub struct LiquidityEngineConfig {
    /// Quantization step in currency units.
    pub price_resolution: f64,
    /// Snapshot cadence; the finest timeframe always updates.
    pub base_timeframe_ms: u64,
    /// Bucket widths, finest first.
    pub timeframes_ms: Vec<u64>,
    /// Retained finalized slices per timeframe.
    pub max_history_slices: usize,
    /// Cap on processed bid/ask levels per snapshot.
    pub depth_limit: usize,
    /// Default metric for display queries.
    pub display_mode: DisplayMode,
}

impl Default for LiquidityEngineConfig {
    fn default() -> Self {
        Self {
            price_resolution: 1.0,
            base_timeframe_ms: 100,
            timeframes_ms: vec![100, 250, 500, 1000, 2000, 5000, 10000],
            max_history_slices: 5000,
            depth_limit: 2000,
            display_mode: DisplayMode::Average,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Multi-resolution liquidity time-series engine.
pub struct LiquidityEngine {
    price_resolution: f64,
    base_timeframe_ms: u64,
    timeframes: Vec<u64>,
    max_history_slices: usize,
    depth_limit: usize,
    display_mode: DisplayMode,

    /// Retained base-cadence snapshots, for timeframe rebuilds.
    snapshots: VecDeque<BookSnapshot>,
    /// Finalized slices per timeframe, oldest first.
    history: AHashMap<u64, VecDeque<LiquidityTimeSlice>>,
    /// Open slice per timeframe.
    current: AHashMap<u64, LiquidityTimeSlice>,

    /// Presence stamp, incremented per slice fold.
    global_seq: u32,

    /// Receives `(timeframe_ms, slice)` on every finalization.
    slice_tx: Option<Sender<(u64, LiquidityTimeSlice)>>,
}

impl LiquidityEngine {
    pub fn new(config: LiquidityEngineConfig) -> Self {
        let mut timeframes = config.timeframes_ms;
        if timeframes.is_empty() {
            timeframes.push(config.base_timeframe_ms);
        }
        timeframes.sort_unstable();
        timeframes.dedup();

        let mut history = AHashMap::new();
        for &tf in &timeframes {
            history.insert(tf, VecDeque::new());
        }

        info!(
            "liquidity engine initialized: {} timeframes, base {}ms, resolution {}, {} slices retained",
            timeframes.len(),
            config.base_timeframe_ms,
            config.price_resolution,
            config.max_history_slices,
        );

        Self {
            price_resolution: config.price_resolution,
            base_timeframe_ms: config.base_timeframe_ms,
            timeframes,
            max_history_slices: config.max_history_slices,
            depth_limit: config.depth_limit,
            display_mode: config.display_mode,
            snapshots: VecDeque::new(),
            history,
            current: AHashMap::new(),
            global_seq: 0,
            slice_tx: None,
        }
    }

    /// Register the channel that receives finalized slices.
    pub fn set_slice_sender(&mut self, sender: Sender<(u64, LiquidityTimeSlice)>) {
        self.slice_tx = Some(sender);
    }

    pub fn price_resolution(&self) -> f64 {
        self.price_resolution
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.display_mode = mode;
    }

    /// Configured timeframes, finest first.
    pub fn timeframes(&self) -> &[u64] {
        &self.timeframes
    }

    #[inline]
    fn price_to_tick(&self, price: f64) -> Tick {
        (price / self.price_resolution).round() as Tick
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Ingest a dense non-zero view captured from a live book.
    ///
    /// Levels are converted to quantized ticks (collisions summed) and
    /// stamped with the view's exchange timestamp.
    pub fn add_dense_snapshot(&mut self, view: &DenseSnapshotView<'_>) {
        let mut snapshot = BookSnapshot {
            timestamp_ms: view.timestamp_us / 1_000,
            ..Default::default()
        };

        for &(index, size) in view.bid_levels.iter().take(self.depth_limit) {
            let tick = self.price_to_tick(view.index_to_price(index));
            *snapshot.bids.entry(tick).or_insert(0.0) += size;
        }
        for &(index, size) in view.ask_levels.iter().take(self.depth_limit) {
            let tick = self.price_to_tick(view.index_to_price(index));
            *snapshot.asks.entry(tick).or_insert(0.0) += size;
        }

        self.ingest(snapshot);
    }

    /// Ingest a sparse book copy, stamped with the given timestamp.
    pub fn add_book_snapshot(&mut self, book: &SparseBook, timestamp_ms: u64) {
        self.add_book_snapshot_windowed(book, timestamp_ms, None);
    }

    /// Sparse ingestion restricted to a price viewport, widened by a 50 %
    /// buffer on each side so panning does not immediately miss levels.
    pub fn add_book_snapshot_windowed(
        &mut self,
        book: &SparseBook,
        timestamp_ms: u64,
        viewport: Option<(f64, f64)>,
    ) {
        let range = viewport.map(|(lo, hi)| {
            let buffer = (hi - lo).max(0.0) * 0.5;
            (lo - buffer, hi + buffer)
        });
        let in_range = |price: f64| match range {
            Some((lo, hi)) => price >= lo && price <= hi,
            None => true,
        };

        let mut snapshot = BookSnapshot { timestamp_ms, ..Default::default() };
        for level in book.bids.iter().take(self.depth_limit) {
            if in_range(level.price) {
                let tick = self.price_to_tick(level.price);
                *snapshot.bids.entry(tick).or_insert(0.0) += level.size;
            }
        }
        for level in book.asks.iter().take(self.depth_limit) {
            if in_range(level.price) {
                let tick = self.price_to_tick(level.price);
                *snapshot.asks.entry(tick).or_insert(0.0) += level.size;
            }
        }

        self.ingest(snapshot);
    }

    fn ingest(&mut self, snapshot: BookSnapshot) {
        self.update_all_timeframes(&snapshot);
        self.snapshots.push_back(snapshot);
        self.cleanup();
    }

    fn update_all_timeframes(&mut self, snapshot: &BookSnapshot) {
        // Indexed loop: update_timeframe needs &mut self.
        for i in 0..self.timeframes.len() {
            let tf = self.timeframes[i];
            self.update_timeframe(tf, snapshot);
        }
    }

    fn update_timeframe(&mut self, timeframe_ms: u64, snapshot: &BookSnapshot) {
        let bucket_start = (snapshot.timestamp_ms / timeframe_ms) * timeframe_ms;

        let needs_switch = match self.current.get(&timeframe_ms) {
            Some(slice) => slice.start_ms != bucket_start,
            None => true,
        };

        if needs_switch {
            self.roll_slice(timeframe_ms, bucket_start);
        }

        let seq = {
            self.global_seq = self.global_seq.wrapping_add(1);
            self.global_seq
        };
        let slice = self
            .current
            .get_mut(&timeframe_ms)
            .expect("current slice exists after roll");
        fold_snapshot(slice, snapshot, seq, self.price_resolution);
    }

    /// Finalize the open slice (if any) and open a new one at `bucket_start`.
    fn roll_slice(&mut self, timeframe_ms: u64, bucket_start: u64) {
        let fresh = LiquidityTimeSlice {
            start_ms: bucket_start,
            end_ms: bucket_start + timeframe_ms,
            duration_ms: timeframe_ms,
            tick_size: self.price_resolution,
            ..Default::default()
        };

        if let Some(mut prior) = self.current.insert(timeframe_ms, fresh) {
            if prior.start_ms != 0 {
                finalize_slice(&mut prior, self.base_timeframe_ms);
                debug!(
                    "slice finalized: tf={}ms [{}, {})",
                    timeframe_ms, prior.start_ms, prior.end_ms
                );
                if let Some(tx) = &self.slice_tx {
                    let _ = tx.try_send((timeframe_ms, prior.clone()));
                }
                self.history.entry(timeframe_ms).or_default().push_back(prior);
            }
        }
    }

    fn cleanup(&mut self) {
        // Retain enough raw snapshots to rebuild the coarsest timeframe.
        if let Some(&coarsest) = self.timeframes.last() {
            let per_slice = (coarsest / self.base_timeframe_ms).max(1) as usize;
            let max_snapshots = self.max_history_slices.saturating_mul(per_slice);
            while self.snapshots.len() > max_snapshots {
                self.snapshots.pop_front();
            }
        }
        for slices in self.history.values_mut() {
            while slices.len() > self.max_history_slices {
                slices.pop_front();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timeframe management
    // -----------------------------------------------------------------------

    /// Add a timeframe at runtime and rebuild its history from the retained
    /// base snapshots. No-op if already configured.
    pub fn add_timeframe(&mut self, duration_ms: u64) {
        if duration_ms == 0 || self.timeframes.contains(&duration_ms) {
            return;
        }
        self.timeframes.push(duration_ms);
        self.timeframes.sort_unstable();
        self.rebuild_timeframe(duration_ms);
        info!("added timeframe {duration_ms}ms");
    }

    /// Remove a timeframe and its slices. No-op if unknown.
    pub fn remove_timeframe(&mut self, duration_ms: u64) {
        let Some(position) = self.timeframes.iter().position(|&tf| tf == duration_ms) else {
            return;
        };
        self.timeframes.remove(position);
        self.history.remove(&duration_ms);
        self.current.remove(&duration_ms);
        info!("removed timeframe {duration_ms}ms");
    }

    /// Rebuild one timeframe's finalized history from retained snapshots.
    ///
    /// The most recent bucket stays open as the current slice.
    fn rebuild_timeframe(&mut self, timeframe_ms: u64) {
        self.history.insert(timeframe_ms, VecDeque::new());
        self.current.remove(&timeframe_ms);
        if self.snapshots.is_empty() {
            return;
        }

        let snapshots: Vec<BookSnapshot> = self.snapshots.iter().cloned().collect();
        for snapshot in &snapshots {
            self.update_timeframe(timeframe_ms, snapshot);
        }
        let rebuilt = self.history.get(&timeframe_ms).map_or(0, VecDeque::len);
        info!("rebuilt timeframe {timeframe_ms}ms: {rebuilt} finalized slices");
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The slice containing `ts_ms` for the given timeframe, searching the
    /// finalized history and the open slice.
    pub fn slice_at(&self, timeframe_ms: u64, ts_ms: u64) -> Option<&LiquidityTimeSlice> {
        if let Some(slices) = self.history.get(&timeframe_ms) {
            if let Some(slice) = slices.iter().find(|s| s.contains(ts_ms)) {
                return Some(slice);
            }
        }
        self.current
            .get(&timeframe_ms)
            .filter(|slice| slice.start_ms != 0 && slice.contains(ts_ms))
    }

    /// All slices of a timeframe whose range intersects the view, plus the
    /// open slice when it intersects. Borrowed views — hold the engine lock
    /// while consuming them.
    pub fn visible_slices(
        &self,
        timeframe_ms: u64,
        view_start_ms: u64,
        view_end_ms: u64,
    ) -> Vec<&LiquidityTimeSlice> {
        let mut visible = Vec::new();
        if let Some(slices) = self.history.get(&timeframe_ms) {
            visible.extend(slices.iter().filter(|s| s.intersects(view_start_ms, view_end_ms)));
        }
        if let Some(slice) = self.current.get(&timeframe_ms) {
            if slice.start_ms != 0 && slice.intersects(view_start_ms, view_end_ms) {
                visible.push(slice);
            }
        }
        visible
    }

    /// Smallest configured timeframe that covers the view in at most
    /// `max_slices` slices *and* already has finalized data. Falls back to
    /// the finest timeframe with data, then to the base timeframe.
    pub fn suggest_timeframe(
        &self,
        view_start_ms: u64,
        view_end_ms: u64,
        max_slices: usize,
    ) -> u64 {
        if view_start_ms >= view_end_ms || max_slices == 0 {
            return self.base_timeframe_ms;
        }
        let span = view_end_ms - view_start_ms;

        // Finest to coarsest: the first fit wins.
        for &tf in &self.timeframes {
            let expected = (span / tf) as usize;
            if expected <= max_slices && self.has_data(tf) {
                return tf;
            }
        }
        for &tf in &self.timeframes {
            if self.has_data(tf) {
                return tf;
            }
        }
        self.base_timeframe_ms
    }

    fn has_data(&self, timeframe_ms: u64) -> bool {
        self.history.get(&timeframe_ms).is_some_and(|slices| !slices.is_empty())
    }

    /// Number of finalized slices for a timeframe.
    pub fn history_len(&self, timeframe_ms: u64) -> usize {
        self.history.get(&timeframe_ms).map_or(0, VecDeque::len)
    }

    /// Default-mode display value inside the slice containing `ts_ms`.
    pub fn display_value_at(
        &self,
        timeframe_ms: u64,
        ts_ms: u64,
        price: f64,
        side: BookSide,
    ) -> f64 {
        self.slice_at(timeframe_ms, ts_ms)
            .map_or(0.0, |slice| slice.display_value(price, side, self.display_mode))
    }
}

// ---------------------------------------------------------------------------
// Slice folding
// ---------------------------------------------------------------------------

/// Fold one snapshot into a slice: expand the tick range, update per-level
/// metrics, and bump the last-seen time of levels absent this round.
fn fold_snapshot(
    slice: &mut LiquidityTimeSlice,
    snapshot: &BookSnapshot,
    seq: u32,
    resolution: f64,
) {
    // Empty snapshots carry no tick range to derive; the slice boundary has
    // already been handled by the caller.
    if snapshot.is_empty() {
        return;
    }

    let mut min_tick = Tick::MAX;
    let mut max_tick = Tick::MIN;
    for &tick in snapshot.bids.keys().chain(snapshot.asks.keys()) {
        min_tick = min_tick.min(tick);
        max_tick = max_tick.max(tick);
    }

    if slice.bid_metrics.is_empty() && slice.ask_metrics.is_empty() {
        // First snapshot in this slice.
        slice.min_tick = min_tick;
        slice.max_tick = max_tick;
        slice.tick_size = resolution;
        let range = (max_tick - min_tick + 1) as usize;
        slice.bid_metrics = vec![PriceLevelMetrics::default(); range];
        slice.ask_metrics = vec![PriceLevelMetrics::default(); range];
    } else if min_tick < slice.min_tick || max_tick > slice.max_tick {
        // Grow to the union; never shrink within a slice.
        let new_min = slice.min_tick.min(min_tick);
        let new_max = slice.max_tick.max(max_tick);
        let new_range = (new_max - new_min + 1) as usize;
        let offset = (slice.min_tick - new_min) as usize;

        let mut bid_metrics = vec![PriceLevelMetrics::default(); new_range];
        let mut ask_metrics = vec![PriceLevelMetrics::default(); new_range];
        bid_metrics[offset..offset + slice.bid_metrics.len()]
            .copy_from_slice(&slice.bid_metrics);
        ask_metrics[offset..offset + slice.ask_metrics.len()]
            .copy_from_slice(&slice.ask_metrics);

        slice.bid_metrics = bid_metrics;
        slice.ask_metrics = ask_metrics;
        slice.min_tick = new_min;
        slice.max_tick = new_max;
    }

    for (&tick, &size) in &snapshot.bids {
        let index = (tick - slice.min_tick) as usize;
        if let Some(metrics) = slice.bid_metrics.get_mut(index) {
            update_level(metrics, size, snapshot.timestamp_ms);
            metrics.last_seen_seq = seq;
        }
    }
    for (&tick, &size) in &snapshot.asks {
        let index = (tick - slice.min_tick) as usize;
        if let Some(metrics) = slice.ask_metrics.get_mut(index) {
            update_level(metrics, size, snapshot.timestamp_ms);
            metrics.last_seen_seq = seq;
        }
    }

    // Levels not stamped this round are observed absent at this instant.
    // The seq check makes this O(1) per level, no membership rescans.
    for metrics in slice.bid_metrics.iter_mut().chain(slice.ask_metrics.iter_mut()) {
        if metrics.snapshot_count > 0 && metrics.last_seen_seq != seq {
            metrics.last_seen_ms = snapshot.timestamp_ms;
        }
    }
}

fn update_level(metrics: &mut PriceLevelMetrics, liquidity: f64, timestamp_ms: u64) {
    if metrics.snapshot_count == 0 {
        metrics.first_seen_ms = timestamp_ms;
        metrics.min_liquidity = liquidity;
    }

    metrics.snapshot_count += 1;
    metrics.total_liquidity += liquidity;
    metrics.max_liquidity = metrics.max_liquidity.max(liquidity);
    metrics.min_liquidity = metrics.min_liquidity.min(liquidity);
    metrics.last_seen_ms = timestamp_ms;
    metrics.avg_liquidity = metrics.total_liquidity / f64::from(metrics.snapshot_count);

    // Running resting estimate; finalization re-evaluates with the full
    // persistence ratio.
    if metrics.was_consistent() {
        metrics.resting_liquidity = metrics.avg_liquidity;
    }
}

/// Apply the anti-spoofing filter to every populated level.
fn finalize_slice(slice: &mut LiquidityTimeSlice, base_interval_ms: u64) {
    let duration = slice.duration_ms;
    for metrics in slice.bid_metrics.iter_mut().chain(slice.ask_metrics.iter_mut()) {
        if metrics.snapshot_count == 0 {
            continue;
        }
        if metrics.persistence_ratio(duration, base_interval_ms) > PERSISTENCE_THRESHOLD {
            metrics.resting_liquidity = metrics.avg_liquidity;
        } else {
            metrics.resting_liquidity = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(timeframes: Vec<u64>) -> LiquidityEngine {
        LiquidityEngine::new(LiquidityEngineConfig {
            price_resolution: 1.0,
            timeframes_ms: timeframes,
            ..Default::default()
        })
    }

    fn snapshot_with_bid(ts_ms: u64, price: f64, size: f64) -> BookSnapshot {
        let mut snapshot = BookSnapshot { timestamp_ms: ts_ms, ..Default::default() };
        snapshot.bids.insert((price / 1.0).round() as Tick, size);
        snapshot
    }

    fn empty_snapshot(ts_ms: u64) -> BookSnapshot {
        BookSnapshot { timestamp_ms: ts_ms, ..Default::default() }
    }

    /// Ten identical snapshots at 100 ms: ten finalized base slices, one
    /// finalized 1 s slice with full persistence.
    #[test]
    fn steady_level_aggregates_across_timeframes() {
        let mut engine = engine(vec![100, 1000]);
        let t0 = 10_000u64;
        for i in 0..10 {
            engine.ingest(snapshot_with_bid(t0 + i * 100, 100.0, 1.0));
        }
        // Roll both timeframes past their open buckets.
        engine.ingest(empty_snapshot(t0 + 1000));

        assert_eq!(engine.history_len(100), 10);
        for slice in engine.visible_slices(100, t0, t0 + 999) {
            let metrics = slice.metrics_at(100.0, BookSide::Bid).unwrap();
            assert_eq!(metrics.snapshot_count, 1);
            assert_eq!(metrics.avg_liquidity, 1.0);
            assert_eq!(metrics.max_liquidity, 1.0);
            assert_eq!(metrics.min_liquidity, 1.0);
            assert_eq!(metrics.resting_liquidity, 1.0);
        }

        assert_eq!(engine.history_len(1000), 1);
        let slice = engine.slice_at(1000, t0).unwrap();
        let metrics = slice.metrics_at(100.0, BookSide::Bid).unwrap();
        assert_eq!(metrics.snapshot_count, 10);
        assert_eq!(metrics.avg_liquidity, 1.0);
        assert_eq!(metrics.resting_liquidity, 1.0);
    }

    /// A level flashing in snapshots 1 and 10 only fails the persistence
    /// filter: counted, averaged, but zero resting liquidity.
    #[test]
    fn spoofed_level_gets_no_resting_liquidity() {
        let mut engine = engine(vec![1000]);
        let t0 = 10_000u64;
        for i in 0..10 {
            if i == 0 || i == 9 {
                engine.ingest(snapshot_with_bid(t0 + i * 100, 100.0, 1.0));
            } else {
                // The book shows a different level; 100 is absent.
                engine.ingest(snapshot_with_bid(t0 + i * 100, 101.0, 2.0));
            }
        }
        engine.ingest(empty_snapshot(t0 + 1000));

        let slice = engine.slice_at(1000, t0).unwrap();
        let spoofed = slice.metrics_at(100.0, BookSide::Bid).unwrap();
        assert_eq!(spoofed.snapshot_count, 2);
        assert_eq!(spoofed.avg_liquidity, 1.0);
        assert!(spoofed.persistence_ratio(1000, 100) <= PERSISTENCE_THRESHOLD);
        assert_eq!(spoofed.resting_liquidity, 0.0);

        // Coverage of exactly 0.8 still fails the strict > 0.8 filter.
        let steady = slice.metrics_at(101.0, BookSide::Bid).unwrap();
        assert_eq!(steady.snapshot_count, 8);
        assert_eq!(steady.resting_liquidity, 0.0);
    }

    #[test]
    fn slice_boundaries_are_aligned() {
        let mut engine = engine(vec![250]);
        for i in 0..20 {
            engine.ingest(snapshot_with_bid(10_037 + i * 100, 100.0, 1.0));
        }
        for slice in engine.visible_slices(250, 0, u64::MAX) {
            assert_eq!(slice.end_ms - slice.start_ms, 250);
            assert_eq!(slice.start_ms % 250, 0);
        }
    }

    #[test]
    fn metrics_invariants_hold() {
        let mut engine = engine(vec![1000]);
        let t0 = 50_000u64;
        for (i, size) in [1.0, 3.0, 2.0, 5.0, 4.0].iter().enumerate() {
            engine.ingest(snapshot_with_bid(t0 + i as u64 * 100, 100.0, *size));
        }
        engine.ingest(empty_snapshot(t0 + 1000));

        let slice = engine.slice_at(1000, t0).unwrap();
        let metrics = slice.metrics_at(100.0, BookSide::Bid).unwrap();
        assert!(metrics.min_liquidity <= metrics.avg_liquidity);
        assert!(metrics.avg_liquidity <= metrics.max_liquidity);
        let expected_avg = metrics.total_liquidity / f64::from(metrics.snapshot_count);
        assert!((metrics.avg_liquidity - expected_avg).abs() < 1e-9);
    }

    #[test]
    fn slice_range_expands_to_union() {
        let mut engine = engine(vec![1000]);
        let t0 = 20_000u64;
        engine.ingest(snapshot_with_bid(t0, 100.0, 1.0));
        engine.ingest(snapshot_with_bid(t0 + 100, 110.0, 2.0));
        engine.ingest(snapshot_with_bid(t0 + 200, 95.0, 3.0));

        let slice = engine.slice_at(1000, t0).unwrap();
        assert_eq!(slice.min_tick, 95);
        assert_eq!(slice.max_tick, 110);
        // Earlier metrics survived both expansions.
        assert_eq!(slice.metrics_at(100.0, BookSide::Bid).unwrap().snapshot_count, 1);
        assert_eq!(slice.metrics_at(110.0, BookSide::Bid).unwrap().snapshot_count, 1);
        assert_eq!(slice.metrics_at(95.0, BookSide::Bid).unwrap().snapshot_count, 1);
    }

    #[test]
    fn quantization_sums_colliding_levels() {
        let mut engine = engine(vec![1000]);
        // Two raw prices, one tick after quantization at resolution 1.0.
        let book = SparseBook {
            product_id: "BTC-USD".into(),
            bids: vec![
                cx_core::types::BookLevel { price: 100.2, size: 1.0 },
                cx_core::types::BookLevel { price: 99.9, size: 2.0 },
            ],
            asks: vec![],
            timestamp_us: 0,
        };
        engine.add_book_snapshot(&book, 30_000);

        let slice = engine.slice_at(1000, 30_000).unwrap();
        let metrics = slice.metrics_at(100.0, BookSide::Bid).unwrap();
        assert!((metrics.total_liquidity - 3.0).abs() < 1e-9);
    }

    #[test]
    fn suggest_timeframe_prefers_finest_fit() {
        let mut engine = engine(vec![100, 1000]);
        let t0 = 10_000u64;
        for i in 0..10 {
            engine.ingest(snapshot_with_bid(t0 + i * 100, 100.0, 1.0));
        }
        engine.ingest(empty_snapshot(t0 + 1000));

        // 1 s view / 100 ms = 10 slices — fits a large budget.
        assert_eq!(engine.suggest_timeframe(t0, t0 + 1000, 4000), 100);
        // Budget of 5 forces the coarser timeframe.
        assert_eq!(engine.suggest_timeframe(t0, t0 + 1000, 5), 1000);
        // Zero budget falls back to base.
        assert_eq!(engine.suggest_timeframe(t0, t0 + 1000, 0), 100);
        // Inverted view falls back to base.
        assert_eq!(engine.suggest_timeframe(t0 + 1000, t0, 4000), 100);
    }

    #[test]
    fn suggest_timeframe_requires_data() {
        let mut engine = engine(vec![100, 1000]);
        let t0 = 10_000u64;
        // Two snapshots finalize one base slice but no 1 s slice.
        engine.ingest(snapshot_with_bid(t0, 100.0, 1.0));
        engine.ingest(snapshot_with_bid(t0 + 100, 100.0, 1.0));

        // No timeframe fits a span this wide in 10 slices, so the finest
        // timeframe with finalized data wins.
        let tf = engine.suggest_timeframe(0, 10_000_000, 10);
        assert_eq!(tf, 100);
    }

    #[test]
    fn history_is_bounded() {
        let mut engine = LiquidityEngine::new(LiquidityEngineConfig {
            price_resolution: 1.0,
            timeframes_ms: vec![100],
            max_history_slices: 5,
            ..Default::default()
        });
        for i in 0..50 {
            engine.ingest(snapshot_with_bid(10_000 + i * 100, 100.0, 1.0));
        }
        assert!(engine.history_len(100) <= 5);
        assert!(engine.snapshots.len() <= 5);
    }

    #[test]
    fn finalized_slices_are_emitted() {
        let (tx, rx) = crossbeam_channel::bounded(16);
        let mut engine = engine(vec![100]);
        engine.set_slice_sender(tx);

        engine.ingest(snapshot_with_bid(10_000, 100.0, 1.0));
        assert!(rx.try_recv().is_err()); // first slice still open
        engine.ingest(snapshot_with_bid(10_100, 100.0, 1.0));

        let (tf, slice) = rx.try_recv().unwrap();
        assert_eq!(tf, 100);
        assert_eq!(slice.start_ms, 10_000);
        assert_eq!(slice.end_ms, 10_100);
    }

    #[test]
    fn add_timeframe_rebuilds_from_snapshots() {
        let mut engine = engine(vec![100]);
        let t0 = 10_000u64;
        for i in 0..10 {
            engine.ingest(snapshot_with_bid(t0 + i * 100, 100.0, 1.0));
        }

        engine.add_timeframe(500);
        assert!(engine.timeframes().contains(&500));
        // Snapshots spanned [t0, t0+900]: buckets t0 and t0+500 exist, the
        // second still open.
        assert_eq!(engine.history_len(500), 1);
        let slice = engine.slice_at(500, t0).unwrap();
        assert_eq!(slice.metrics_at(100.0, BookSide::Bid).unwrap().snapshot_count, 5);
    }

    #[test]
    fn remove_timeframe_drops_state() {
        let mut engine = engine(vec![100, 1000]);
        engine.ingest(snapshot_with_bid(10_000, 100.0, 1.0));
        engine.remove_timeframe(1000);
        assert!(!engine.timeframes().contains(&1000));
        assert_eq!(engine.history_len(1000), 0);
        assert!(engine.slice_at(1000, 10_000).is_none());
    }

    #[test]
    fn dense_view_ingestion_quantizes_indices() {
        let mut engine = engine(vec![1000]);
        let bid_levels = [(1000u32, 1.5), (950u32, 0.5)];
        let ask_levels = [(1010u32, 2.0)];
        let view = DenseSnapshotView {
            min_price: 90.0,
            tick_size: 0.01,
            timestamp_us: 40_000_000, // 40 s
            bid_levels: &bid_levels,
            ask_levels: &ask_levels,
        };
        engine.add_dense_snapshot(&view);

        let slice = engine.slice_at(1000, 40_000).unwrap();
        // 90 + 1000*0.01 = 100.0 and 90 + 950*0.01 = 99.5 quantize to tick 100.
        let metrics = slice.metrics_at(100.0, BookSide::Bid).unwrap();
        assert!((metrics.total_liquidity - 2.0).abs() < 1e-9);
        let ask = slice.metrics_at(100.0, BookSide::Ask).unwrap();
        assert!((ask.total_liquidity - 2.0).abs() < 1e-9);
    }
}
