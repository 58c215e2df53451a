//! Dense per-product order book over a fixed price grid.
//!
//! Price levels are stored in two dense vectors indexed by
//! `i = floor((price - min_price) / tick_size)`, giving O(1) upserts for the
//! level-2 delta stream. The grid is chosen once, at the first snapshot, and
//! never resized; prices outside the grid are discarded and counted.
//!
//! Aggregate statistics (non-zero level counts, summed volume per side) are
//! maintained incrementally so readers never rescan the grid.

use crate::types::{BookLevel, BookSide, SparseBook};

/// Price grid parameters: `[min_price, max_price]` in `tick_size` steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub min_price: f64,
    pub max_price: f64,
    pub tick_size: f64,
}

/// Default tick size for grids inferred from a snapshot, in currency units.
pub const DEFAULT_TICK_SIZE: f64 = 0.01;

/// Margin added around the observed price range when inferring a grid.
const GRID_MARGIN: f64 = 0.10;

impl GridSpec {
    /// Infer a grid from the price range observed in a snapshot: observed
    /// min −10 % to observed max +10 %, rounded to the default tick.
    ///
    /// Returns `None` when the snapshot carries no usable levels.
    pub fn from_levels(bids: &[BookLevel], asks: &[BookLevel]) -> Option<Self> {
        let mut min_seen = f64::MAX;
        let mut max_seen = f64::MIN;
        for level in bids.iter().chain(asks.iter()) {
            if level.price > 0.0 {
                min_seen = min_seen.min(level.price);
                max_seen = max_seen.max(level.price);
            }
        }
        if min_seen > max_seen {
            return None;
        }

        let tick = DEFAULT_TICK_SIZE;
        let lo = (min_seen * (1.0 - GRID_MARGIN)).max(tick);
        let hi = max_seen * (1.0 + GRID_MARGIN);
        Some(Self {
            min_price: (lo / tick).floor() * tick,
            max_price: (hi / tick).ceil() * tick,
            tick_size: tick,
        })
    }
}

// ---------------------------------------------------------------------------
// DenseSnapshotView
// ---------------------------------------------------------------------------

/// Read-only point-in-time view of the non-zero levels of a dense book.
///
/// Borrows the `(index, size)` buffers filled by
/// [`DenseOrderBook::capture_dense_non_zero`] — no copy of the dense arrays
/// is made. Bid levels are ordered best-first (high to low), ask levels
/// best-first (low to high).
#[derive(Debug, Clone, Copy)]
pub struct DenseSnapshotView<'a> {
    pub min_price: f64,
    pub tick_size: f64,
    pub timestamp_us: u64,
    pub bid_levels: &'a [(u32, f64)],
    pub ask_levels: &'a [(u32, f64)],
}

impl DenseSnapshotView<'_> {
    /// Price of a dense index under this view's grid.
    #[inline]
    pub fn index_to_price(&self, index: u32) -> f64 {
        self.min_price + f64::from(index) * self.tick_size
    }
}

// ---------------------------------------------------------------------------
// DenseOrderBook
// ---------------------------------------------------------------------------

/// Per-product stateful book over a fixed price grid.
///
/// Created on the first snapshot for a product and mutated by deltas for the
/// lifetime of the subscription. Not internally synchronized — the cache
/// wraps each book in its own lock.
#[derive(Debug, Clone)]
pub struct DenseOrderBook {
    product_id: String,
    grid: GridSpec,
    bids: Vec<f64>,
    asks: Vec<f64>,
    last_update_us: u64,

    // Incremental per-side statistics.
    bid_count: usize,
    ask_count: usize,
    bid_volume: f64,
    ask_volume: f64,

    // Best-level hints, kept exact by `apply`.
    best_bid_idx: Option<usize>,
    best_ask_idx: Option<usize>,

    dropped_out_of_grid: u64,
}

impl DenseOrderBook {
    /// Create an empty book over the given grid.
    pub fn new(product_id: impl Into<String>, grid: GridSpec) -> Self {
        let slots = if grid.tick_size > 0.0 {
            ((grid.max_price - grid.min_price) / grid.tick_size).round() as usize + 1
        } else {
            0
        };
        Self {
            product_id: product_id.into(),
            grid,
            bids: vec![0.0; slots],
            asks: vec![0.0; slots],
            last_update_us: 0,
            bid_count: 0,
            ask_count: 0,
            bid_volume: 0.0,
            ask_volume: 0.0,
            best_bid_idx: None,
            best_ask_idx: None,
            dropped_out_of_grid: 0,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn grid(&self) -> GridSpec {
        self.grid
    }

    pub fn last_update_us(&self) -> u64 {
        self.last_update_us
    }

    /// Number of price slots in the grid.
    pub fn slots(&self) -> usize {
        self.bids.len()
    }

    pub fn bid_count(&self) -> usize {
        self.bid_count
    }

    pub fn ask_count(&self) -> usize {
        self.ask_count
    }

    /// Summed size across non-zero bid levels.
    pub fn bid_volume(&self) -> f64 {
        self.bid_volume
    }

    /// Summed size across non-zero ask levels.
    pub fn ask_volume(&self) -> f64 {
        self.ask_volume
    }

    pub fn is_empty(&self) -> bool {
        self.bid_count == 0 && self.ask_count == 0
    }

    /// Updates discarded because their price fell outside the grid.
    pub fn dropped_out_of_grid(&self) -> u64 {
        self.dropped_out_of_grid
    }

    // Rounding keeps on-grid prices exact under floating-point division, so
    // reconstructed prices stay within half a tick of the original.
    #[inline]
    fn price_to_index(&self, price: f64) -> usize {
        ((price - self.grid.min_price) / self.grid.tick_size).round() as usize
    }

    #[inline]
    pub fn index_to_price(&self, index: usize) -> f64 {
        self.grid.min_price + index as f64 * self.grid.tick_size
    }

    /// Write the new absolute size for one price level. O(1).
    ///
    /// A size of 0 removes the level (stored as 0). Prices outside
    /// `[min_price, max_price]` are discarded and counted. Grid-boundary
    /// prices are accepted.
    pub fn apply(&mut self, side: BookSide, price: f64, new_size: f64, exchange_ts_us: u64) {
        if self.grid.tick_size <= 0.0
            || price < self.grid.min_price
            || price > self.grid.max_price
        {
            self.dropped_out_of_grid += 1;
            return;
        }

        self.last_update_us = exchange_ts_us;

        let index = self.price_to_index(price);
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        if index >= levels.len() {
            self.dropped_out_of_grid += 1;
            return;
        }

        let previous = levels[index];
        let new_size = new_size.max(0.0);
        if previous == new_size {
            return;
        }
        levels[index] = new_size;

        let (count, volume) = match side {
            BookSide::Bid => (&mut self.bid_count, &mut self.bid_volume),
            BookSide::Ask => (&mut self.ask_count, &mut self.ask_volume),
        };
        *volume += new_size - previous;
        if *volume < 0.0 {
            *volume = 0.0;
        }

        let was_non_zero = previous > 0.0;
        let is_non_zero = new_size > 0.0;
        if was_non_zero != is_non_zero {
            if is_non_zero {
                *count += 1;
            } else if *count > 0 {
                *count -= 1;
            }
        }

        self.refresh_hint(side, index, is_non_zero);
    }

    /// Keep the best-level hint exact after a write at `index`.
    fn refresh_hint(&mut self, side: BookSide, index: usize, is_non_zero: bool) {
        match side {
            BookSide::Bid => {
                if is_non_zero {
                    if self.best_bid_idx.is_none_or(|best| index > best) {
                        self.best_bid_idx = Some(index);
                    }
                } else if self.best_bid_idx == Some(index) {
                    // Best bid removed; scan downward for the next one.
                    self.best_bid_idx =
                        self.bids[..index].iter().rposition(|&size| size > 0.0);
                }
            }
            BookSide::Ask => {
                if is_non_zero {
                    if self.best_ask_idx.is_none_or(|best| index < best) {
                        self.best_ask_idx = Some(index);
                    }
                } else if self.best_ask_idx == Some(index) {
                    self.best_ask_idx = self.asks[index + 1..]
                        .iter()
                        .position(|&size| size > 0.0)
                        .map(|offset| index + 1 + offset);
                }
            }
        }
    }

    /// Highest-priced non-zero bid level.
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.best_bid_idx.map(|i| BookLevel {
            price: self.index_to_price(i),
            size: self.bids[i],
        })
    }

    /// Lowest-priced non-zero ask level.
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.best_ask_idx.map(|i| BookLevel {
            price: self.index_to_price(i),
            size: self.asks[i],
        })
    }

    /// Best-ask minus best-bid, when both sides are populated.
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Size at an exact grid price, 0 when the level is empty or off-grid.
    pub fn size_at(&self, side: BookSide, price: f64) -> f64 {
        if price < self.grid.min_price || price > self.grid.max_price {
            return 0.0;
        }
        let index = self.price_to_index(price);
        let levels = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };
        levels.get(index).copied().unwrap_or(0.0)
    }

    /// Fill `bid_out` / `ask_out` with `(index, size)` for every non-zero
    /// level and return a view over them.
    ///
    /// Bids are emitted best-first (high index to low), asks best-first
    /// (low index to high). `stride > 1` downsamples the grid: each stride
    /// window is aggregated by max and reported at the window's base index.
    pub fn capture_dense_non_zero<'a>(
        &self,
        bid_out: &'a mut Vec<(u32, f64)>,
        ask_out: &'a mut Vec<(u32, f64)>,
        stride: usize,
    ) -> DenseSnapshotView<'a> {
        let stride = stride.max(1);
        bid_out.clear();
        ask_out.clear();

        if stride == 1 {
            for i in (0..self.bids.len()).rev() {
                let size = self.bids[i];
                if size > 0.0 {
                    bid_out.push((i as u32, size));
                }
            }
            for (i, &size) in self.asks.iter().enumerate() {
                if size > 0.0 {
                    ask_out.push((i as u32, size));
                }
            }
        } else {
            collect_strided_rev(&self.bids, stride, bid_out);
            collect_strided(&self.asks, stride, ask_out);
        }

        DenseSnapshotView {
            min_price: self.grid.min_price,
            tick_size: self.grid.tick_size,
            timestamp_us: self.last_update_us,
            bid_levels: bid_out,
            ask_levels: ask_out,
        }
    }

    /// Up to `max_levels` bid levels, best (highest price) first.
    pub fn top_bids(&self, max_levels: usize) -> Vec<BookLevel> {
        let mut out = Vec::with_capacity(max_levels.min(self.bid_count));
        let Some(best) = self.best_bid_idx else {
            return out;
        };
        for i in (0..=best).rev() {
            if out.len() == max_levels {
                break;
            }
            if self.bids[i] > 0.0 {
                out.push(BookLevel { price: self.index_to_price(i), size: self.bids[i] });
            }
        }
        out
    }

    /// Up to `max_levels` ask levels, best (lowest price) first.
    pub fn top_asks(&self, max_levels: usize) -> Vec<BookLevel> {
        let mut out = Vec::with_capacity(max_levels.min(self.ask_count));
        let Some(best) = self.best_ask_idx else {
            return out;
        };
        for i in best..self.asks.len() {
            if out.len() == max_levels {
                break;
            }
            if self.asks[i] > 0.0 {
                out.push(BookLevel { price: self.index_to_price(i), size: self.asks[i] });
            }
        }
        out
    }

    /// Convert to a sparse copy, best levels first on both sides.
    pub fn to_sparse(&self) -> SparseBook {
        let mut book = SparseBook {
            product_id: self.product_id.clone(),
            bids: Vec::with_capacity(self.bid_count),
            asks: Vec::with_capacity(self.ask_count),
            timestamp_us: self.last_update_us,
        };
        for i in (0..self.bids.len()).rev() {
            if self.bids[i] > 0.0 {
                book.bids.push(BookLevel { price: self.index_to_price(i), size: self.bids[i] });
            }
        }
        for (i, &size) in self.asks.iter().enumerate() {
            if size > 0.0 {
                book.asks.push(BookLevel { price: self.index_to_price(i), size });
            }
        }
        book
    }
}

/// Max-aggregate each stride window of `levels`, low to high, reporting
/// non-zero windows at their base index.
fn collect_strided(levels: &[f64], stride: usize, out: &mut Vec<(u32, f64)>) {
    let mut base = 0;
    while base < levels.len() {
        let end = (base + stride).min(levels.len());
        let max = levels[base..end].iter().copied().fold(0.0f64, f64::max);
        if max > 0.0 {
            out.push((base as u32, max));
        }
        base = end;
    }
}

/// Same as [`collect_strided`] but emitting windows high to low.
fn collect_strided_rev(levels: &[f64], stride: usize, out: &mut Vec<(u32, f64)>) {
    let mut bases: Vec<usize> = (0..levels.len()).step_by(stride).collect();
    bases.reverse();
    for base in bases {
        let end = (base + stride).min(levels.len());
        let max = levels[base..end].iter().copied().fold(0.0f64, f64::max);
        if max > 0.0 {
            out.push((base as u32, max));
        }
    }
}
