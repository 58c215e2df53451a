//! Thread-safe in-memory store for trades and live order books.
//!
//! Two category locks (trades, books) in shared/exclusive mode — readers
//! never block readers. Books are held behind per-product handles so the
//! periodic snapshot loop locks one product at a time, not the whole map.
//!
//! Misses return empties, never errors: queries during a disconnect keep
//! working on whatever state is cached.

use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::book::{DenseOrderBook, GridSpec};
use crate::ring::RingBuffer;
use crate::types::{BookLevel, BookSide, SparseBook, Trade};

/// Trades retained per product.
const TRADE_RING_CAPACITY: usize = 1000;

type TradeRing = RingBuffer<Trade, TRADE_RING_CAPACITY>;

/// Shared read/write handle to one product's dense book.
pub type LiveBookHandle = Arc<RwLock<DenseOrderBook>>;

/// Per-product map of trade rings and live books.
#[derive(Default)]
pub struct DataCache {
    trades: RwLock<AHashMap<String, TradeRing>>,
    books: RwLock<AHashMap<String, LiveBookHandle>>,
}

impl DataCache {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Trades
    // -----------------------------------------------------------------------

    /// Append a trade to (or create) the product's ring.
    pub fn add_trade(&self, trade: Trade) {
        let mut trades = self.trades.write().expect("trades lock poisoned");
        trades.entry(trade.product_id.clone()).or_default().push(trade);
    }

    /// Copy of the product's trade history, oldest first. Empty on miss.
    pub fn recent_trades(&self, product_id: &str) -> Vec<Trade> {
        let trades = self.trades.read().expect("trades lock poisoned");
        trades.get(product_id).map(|ring| ring.snapshot()).unwrap_or_default()
    }

    /// Trades strictly after the first element whose id equals `last_id`.
    ///
    /// An empty id returns the full snapshot. An unknown id on a non-empty
    /// ring also returns the full snapshot — the caller restarted and its
    /// marker has been evicted.
    pub fn trades_since(&self, product_id: &str, last_id: &str) -> Vec<Trade> {
        let all = self.recent_trades(product_id);
        if last_id.is_empty() {
            return all;
        }
        match all.iter().position(|trade| trade.trade_id == last_id) {
            Some(index) => all[index + 1..].to_vec(),
            None => all,
        }
    }

    // -----------------------------------------------------------------------
    // Books
    // -----------------------------------------------------------------------

    /// Create the product's dense book from a full snapshot, replacing any
    /// prior book (resubscribe replays arrive as fresh snapshots).
    ///
    /// The grid is inferred from the snapshot's observed price range; a
    /// snapshot with no usable levels leaves the cache unchanged.
    pub fn initialize_book(
        &self,
        product_id: &str,
        bids: &[BookLevel],
        asks: &[BookLevel],
        exchange_ts_us: u64,
    ) {
        let Some(grid) = GridSpec::from_levels(bids, asks) else {
            return;
        };
        let mut book = DenseOrderBook::new(product_id, grid);
        for level in bids {
            book.apply(BookSide::Bid, level.price, level.size, exchange_ts_us);
        }
        for level in asks {
            book.apply(BookSide::Ask, level.price, level.size, exchange_ts_us);
        }

        let mut books = self.books.write().expect("books lock poisoned");
        books.insert(product_id.to_string(), Arc::new(RwLock::new(book)));
    }

    /// Apply one delta to the product's book.
    ///
    /// An update arriving before any snapshot (resubscribe race) creates a
    /// book with a grid inferred from that single level, so the delta is
    /// not lost; the next snapshot replaces it.
    pub fn update_book(
        &self,
        product_id: &str,
        side: BookSide,
        price: f64,
        size: f64,
        exchange_ts_us: u64,
    ) {
        if let Some(handle) = self.live_book(product_id) {
            let mut book = handle.write().expect("book lock poisoned");
            book.apply(side, price, size, exchange_ts_us);
            return;
        }

        let level = [BookLevel { price, size }];
        let Some(grid) = GridSpec::from_levels(&level, &[]) else {
            return;
        };
        let mut book = DenseOrderBook::new(product_id, grid);
        book.apply(side, price, size, exchange_ts_us);

        let mut books = self.books.write().expect("books lock poisoned");
        books
            .entry(product_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(book)));
    }

    /// Cloned sparse view of the product's book. Empty on miss.
    pub fn book(&self, product_id: &str) -> SparseBook {
        match self.live_book(product_id) {
            Some(handle) => handle.read().expect("book lock poisoned").to_sparse(),
            None => SparseBook { product_id: product_id.to_string(), ..Default::default() },
        }
    }

    /// Up to `max_levels` best levels per side, `(bids, asks)`. Empty on
    /// miss.
    pub fn book_depth(
        &self,
        product_id: &str,
        max_levels: usize,
    ) -> (Vec<BookLevel>, Vec<BookLevel>) {
        match self.live_book(product_id) {
            Some(handle) => {
                let book = handle.read().expect("book lock poisoned");
                (book.top_bids(max_levels), book.top_asks(max_levels))
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Shared handle to the product's dense book, if one exists.
    pub fn live_book(&self, product_id: &str) -> Option<LiveBookHandle> {
        let books = self.books.read().expect("books lock poisoned");
        books.get(product_id).cloned()
    }

    /// Products currently holding a live book.
    pub fn book_products(&self) -> Vec<String> {
        let books = self.books.read().expect("books lock poisoned");
        books.keys().cloned().collect()
    }
}
