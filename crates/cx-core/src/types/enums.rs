//! Enumerated domain types.

use serde::Deserialize;

/// Which side initiated a trade (the taker side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggressorSide {
    Buy,
    Sell,
    Unknown,
}

impl AggressorSide {
    /// Case-insensitive parse: `"BUY"` → Buy, `"SELL"` → Sell, else Unknown.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("buy") {
            Self::Buy
        } else if s.eq_ignore_ascii_case("sell") {
            Self::Sell
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    /// Wire-format parse: `"bid"` → Bid, `"offer"` / `"ask"` → Ask.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("bid") {
            Some(Self::Bid)
        } else if s.eq_ignore_ascii_case("offer") || s.eq_ignore_ascii_case("ask") {
            Some(Self::Ask)
        } else {
            None
        }
    }
}

/// Subscription channels of the Advanced Trade WebSocket feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Level2,
    MarketTrades,
}

impl Channel {
    /// Wire name of the channel in subscribe/unsubscribe frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level2 => "level2",
            Self::MarketTrades => "market_trades",
        }
    }

    /// Both channels, in frame-emission order.
    pub const ALL: [Channel; 2] = [Channel::Level2, Channel::MarketTrades];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which per-level metric queries read from a finalized liquidity slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Average liquidity during the interval.
    #[default]
    Average,
    /// Peak liquidity seen.
    Maximum,
    /// Only liquidity that persisted across the interval (anti-spoof).
    Resting,
    /// Sum of all liquidity seen.
    Total,
}
