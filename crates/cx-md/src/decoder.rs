//! Wire-frame decoding: top-level JSON → typed [`MarketEvent`]s.
//!
//! Recognized shapes:
//!
//! - `channel == "market_trades"` — `events[].trades[]` → [`Trade`]
//! - `channel == "l2_data"` — root `timestamp` plus `events[]` of
//!   snapshot/update level batches
//! - `channel == "subscriptions"` — subscription-state echo
//! - top-level `type == "error"` — server-reported error message
//!
//! Failure semantics: a malformed frame increments `decode_errors`, is
//! logged at most once per burst, and is dropped — the connection is never
//! torn down over bad data. Field-level failures substitute defaults
//! (`0.0`, arrival time) and increment their own counters.

use std::sync::Arc;

use chrono::DateTime;
use tracing::{debug, warn};

use cx_core::monitor::Monitor;
use cx_core::time_util;
use cx_core::types::{AggressorSide, BookLevel, BookLevelUpdate, BookSide, MarketEvent, Trade};

use crate::json_util::{parse_f64_field, str_field};

/// Burst suppression: warn on the 1st, 101st, 201st… decode error.
const DECODE_ERROR_LOG_EVERY: u64 = 100;

/// Stateless decoder; counters go to the shared monitor.
pub struct Decoder {
    monitor: Arc<Monitor>,
}

impl Decoder {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }

    /// Decode one text frame into zero or more events.
    ///
    /// Deterministic for well-formed frames: the same input always yields
    /// the same event stream.
    pub fn decode(&self, text: &str) -> Vec<MarketEvent> {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                self.count_decode_error(&format!("invalid JSON: {e}"));
                return Vec::new();
            }
        };

        if str_field(&value, "type") == Some("error") {
            let message = str_field(&value, "message").unwrap_or("unknown error").to_string();
            return vec![MarketEvent::ProtocolError(message)];
        }

        match str_field(&value, "channel") {
            Some("market_trades") => self.decode_market_trades(&value),
            Some("l2_data") => self.decode_l2_data(&value),
            Some("subscriptions") => self.decode_subscriptions(&value),
            Some("heartbeats") => Vec::new(), // keep-alive chatter, nothing to do
            Some(other) => {
                self.count_decode_error(&format!("unknown channel '{other}'"));
                Vec::new()
            }
            None => {
                self.count_decode_error("frame without channel or type");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Channel decoders
    // -----------------------------------------------------------------------

    fn decode_market_trades(&self, value: &serde_json::Value) -> Vec<MarketEvent> {
        let mut events = Vec::new();
        let Some(frame_events) = value.get("events").and_then(|v| v.as_array()) else {
            self.count_decode_error("market_trades frame without events[]");
            return events;
        };

        for event in frame_events {
            let Some(trades) = event.get("trades").and_then(|v| v.as_array()) else {
                continue;
            };
            for t in trades {
                events.push(MarketEvent::Trade(self.decode_trade(t)));
            }
        }
        events
    }

    fn decode_trade(&self, t: &serde_json::Value) -> Trade {
        let timestamp_us = match str_field(t, "time").and_then(parse_iso8601_us) {
            Some(ts) => ts,
            None => {
                self.monitor.record_timestamp_parse_error();
                time_util::now_us()
            }
        };

        Trade {
            product_id: str_field(t, "product_id").unwrap_or_default().to_string(),
            trade_id: str_field(t, "trade_id").unwrap_or_default().to_string(),
            side: AggressorSide::parse(str_field(t, "side").unwrap_or_default()),
            price: self.parse_decimal(t, "price"),
            size: self.parse_decimal(t, "size"),
            timestamp_us,
        }
    }

    fn decode_l2_data(&self, value: &serde_json::Value) -> Vec<MarketEvent> {
        let exchange_ts_us = match str_field(value, "timestamp").and_then(parse_iso8601_us) {
            Some(ts) => ts,
            None => {
                self.monitor.record_timestamp_parse_error();
                time_util::now_us()
            }
        };

        let mut events = Vec::new();
        let Some(frame_events) = value.get("events").and_then(|v| v.as_array()) else {
            self.count_decode_error("l2_data frame without events[]");
            return events;
        };

        for event in frame_events {
            let product_id = str_field(event, "product_id").unwrap_or_default().to_string();
            let updates = self.decode_level_updates(event);

            match str_field(event, "type") {
                Some("snapshot") => {
                    let mut bids = Vec::new();
                    let mut asks = Vec::new();
                    for update in updates {
                        let level = BookLevel { price: update.price, size: update.size };
                        match update.side {
                            BookSide::Bid => bids.push(level),
                            BookSide::Ask => asks.push(level),
                        }
                    }
                    events.push(MarketEvent::BookSnapshot { product_id, bids, asks, exchange_ts_us });
                }
                Some("update") => {
                    events.push(MarketEvent::BookUpdate { product_id, updates, exchange_ts_us });
                }
                other => {
                    self.count_decode_error(&format!("l2_data event type {other:?}"));
                }
            }
        }
        events
    }

    fn decode_level_updates(&self, event: &serde_json::Value) -> Vec<BookLevelUpdate> {
        let mut out = Vec::new();
        let Some(updates) = event.get("updates").and_then(|v| v.as_array()) else {
            return out;
        };
        for update in updates {
            let Some(side) = str_field(update, "side").and_then(BookSide::parse) else {
                self.monitor.record_field_parse_error();
                continue;
            };
            let price = self.parse_decimal(update, "price_level");
            if price < 0.0 {
                // Negative prices are undefined for the books downstream.
                self.monitor.record_field_parse_error();
                continue;
            }
            out.push(BookLevelUpdate {
                side,
                price,
                size: self.parse_decimal(update, "new_quantity"),
            });
        }
        out
    }

    fn decode_subscriptions(&self, value: &serde_json::Value) -> Vec<MarketEvent> {
        let mut acks = Vec::new();
        if let Some(frame_events) = value.get("events").and_then(|v| v.as_array()) {
            for event in frame_events {
                let Some(subs) = event.get("subscriptions").and_then(|v| v.as_object()) else {
                    continue;
                };
                for (channel, products) in subs {
                    let products = products
                        .as_array()
                        .map(|list| {
                            list.iter()
                                .filter_map(|p| p.as_str())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    acks.push((channel.clone(), products));
                }
            }
        }
        vec![MarketEvent::SubscriptionAck(acks)]
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Fast non-throwing decimal parse; failure yields 0 and a counter.
    fn parse_decimal(&self, v: &serde_json::Value, key: &str) -> f64 {
        match parse_f64_field(v, key) {
            Some(value) => value,
            None => {
                self.monitor.record_field_parse_error();
                0.0
            }
        }
    }

    fn count_decode_error(&self, reason: &str) {
        self.monitor.record_decode_error();
        let count = self.monitor.decode_errors();
        if count % DECODE_ERROR_LOG_EVERY == 1 {
            warn!("decode error (#{count}): {reason}");
        } else {
            debug!("decode error (#{count}): {reason}");
        }
    }
}

/// Parse `YYYY-MM-DDThh:mm:ss[.fraction][Z|±HH[:MM]]` to microseconds since
/// epoch. Sub-microsecond digits are truncated.
pub fn parse_iso8601_us(s: &str) -> Option<u64> {
    let micros = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%#z"))
        .ok()?
        .timestamp_micros();
    u64::try_from(micros).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> (Decoder, Arc<Monitor>) {
        let monitor = Arc::new(Monitor::new());
        (Decoder::new(Arc::clone(&monitor)), monitor)
    }

    const TRADE_FRAME: &str = r#"{
        "channel": "market_trades",
        "timestamp": "2024-01-01T00:00:00.000000Z",
        "events": [{
            "type": "update",
            "trades": [{
                "product_id": "BTC-USD",
                "trade_id": "12345",
                "price": "42001.50",
                "size": "0.25",
                "side": "BUY",
                "time": "2024-01-01T00:00:00.123456Z"
            }]
        }]
    }"#;

    const SNAPSHOT_FRAME: &str = r#"{
        "channel": "l2_data",
        "timestamp": "2024-01-01T00:00:00.000000Z",
        "events": [{
            "type": "snapshot",
            "product_id": "BTC-USD",
            "updates": [
                {"side": "bid", "price_level": "100.00", "new_quantity": "1.0"},
                {"side": "bid", "price_level": "99.99", "new_quantity": "2.0"},
                {"side": "offer", "price_level": "100.01", "new_quantity": "0.5"}
            ]
        }]
    }"#;

    #[test]
    fn trade_frame_decodes_fully() {
        let (decoder, monitor) = decoder();
        let events = decoder.decode(TRADE_FRAME);
        assert_eq!(events.len(), 1);
        let MarketEvent::Trade(trade) = &events[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.product_id, "BTC-USD");
        assert_eq!(trade.trade_id, "12345");
        assert_eq!(trade.side, AggressorSide::Buy);
        assert!((trade.price - 42001.50).abs() < 1e-9);
        assert!((trade.size - 0.25).abs() < 1e-9);
        // 2024-01-01T00:00:00.123456Z
        assert_eq!(trade.timestamp_us, 1_704_067_200_123_456);
        assert_eq!(monitor.decode_errors(), 0);
        assert_eq!(monitor.timestamp_parse_errors(), 0);
    }

    #[test]
    fn snapshot_frame_splits_sides() {
        let (decoder, _) = decoder();
        let events = decoder.decode(SNAPSHOT_FRAME);
        assert_eq!(events.len(), 1);
        let MarketEvent::BookSnapshot { product_id, bids, asks, exchange_ts_us } = &events[0]
        else {
            panic!("expected snapshot");
        };
        assert_eq!(product_id, "BTC-USD");
        assert_eq!(bids.len(), 2);
        assert_eq!(asks.len(), 1);
        assert!((bids[0].price - 100.00).abs() < 1e-9);
        assert!((asks[0].size - 0.5).abs() < 1e-9);
        assert_eq!(*exchange_ts_us, 1_704_067_200_000_000);
    }

    #[test]
    fn update_frame_keeps_delta_order() {
        let (decoder, _) = decoder();
        let frame = r#"{
            "channel": "l2_data",
            "timestamp": "2024-01-01T00:00:00.100000Z",
            "events": [{
                "type": "update",
                "product_id": "BTC-USD",
                "updates": [
                    {"side": "bid", "price_level": "99.99", "new_quantity": "0.0"},
                    {"side": "ask", "price_level": "100.02", "new_quantity": "1.5"}
                ]
            }]
        }"#;
        let events = decoder.decode(frame);
        let MarketEvent::BookUpdate { updates, .. } = &events[0] else {
            panic!("expected update");
        };
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].side, BookSide::Bid);
        assert_eq!(updates[0].size, 0.0);
        assert_eq!(updates[1].side, BookSide::Ask);
    }

    #[test]
    fn subscription_ack_echoes_state() {
        let (decoder, _) = decoder();
        let frame = r#"{
            "channel": "subscriptions",
            "events": [{"subscriptions": {"level2": ["BTC-USD", "ETH-USD"]}}]
        }"#;
        let events = decoder.decode(frame);
        let MarketEvent::SubscriptionAck(acks) = &events[0] else {
            panic!("expected ack");
        };
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].0, "level2");
        assert_eq!(acks[0].1, vec!["BTC-USD".to_string(), "ETH-USD".to_string()]);
    }

    #[test]
    fn server_error_surfaces_as_protocol_error() {
        let (decoder, _) = decoder();
        let events = decoder.decode(r#"{"type": "error", "message": "authentication failure"}"#);
        assert_eq!(events, vec![MarketEvent::ProtocolError("authentication failure".into())]);
    }

    #[test]
    fn malformed_frames_are_counted_and_dropped() {
        let (decoder, monitor) = decoder();
        assert!(decoder.decode("{ not json").is_empty());
        assert!(decoder.decode(r#"{"channel": "l3_data"}"#).is_empty());
        assert!(decoder.decode(r#"{"foo": 1}"#).is_empty());
        assert_eq!(monitor.decode_errors(), 3);
    }

    #[test]
    fn bad_numeric_fields_default_to_zero() {
        let (decoder, monitor) = decoder();
        let frame = r#"{
            "channel": "market_trades",
            "events": [{"trades": [{
                "product_id": "BTC-USD",
                "trade_id": "1",
                "price": "not-a-number",
                "size": "1.0",
                "side": "SELL",
                "time": "2024-01-01T00:00:00Z"
            }]}]
        }"#;
        let events = decoder.decode(frame);
        let MarketEvent::Trade(trade) = &events[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.price, 0.0);
        assert_eq!(trade.size, 1.0);
        assert_eq!(monitor.snapshot().field_parse_errors, 1);
        assert_eq!(monitor.decode_errors(), 0);
    }

    #[test]
    fn negative_priced_levels_are_dropped() {
        let (decoder, monitor) = decoder();
        let frame = r#"{
            "channel": "l2_data",
            "timestamp": "2024-01-01T00:00:00Z",
            "events": [{
                "type": "update",
                "product_id": "BTC-USD",
                "updates": [
                    {"side": "bid", "price_level": "-1.0", "new_quantity": "5.0"},
                    {"side": "bid", "price_level": "100.0", "new_quantity": "1.0"}
                ]
            }]
        }"#;
        let events = decoder.decode(frame);
        let MarketEvent::BookUpdate { updates, .. } = &events[0] else {
            panic!("expected update");
        };
        assert_eq!(updates.len(), 1);
        assert!((updates[0].price - 100.0).abs() < 1e-9);
        assert_eq!(monitor.snapshot().field_parse_errors, 1);
    }

    #[test]
    fn bad_trade_timestamp_counts_and_substitutes_now() {
        let (decoder, monitor) = decoder();
        let frame = r#"{
            "channel": "market_trades",
            "events": [{"trades": [{
                "product_id": "BTC-USD",
                "trade_id": "1",
                "price": "1.0",
                "size": "1.0",
                "side": "SELL",
                "time": "yesterday"
            }]}]
        }"#;
        let before = time_util::now_us();
        let events = decoder.decode(frame);
        let MarketEvent::Trade(trade) = &events[0] else {
            panic!("expected trade");
        };
        assert!(trade.timestamp_us >= before);
        assert_eq!(monitor.timestamp_parse_errors(), 1);
    }

    #[test]
    fn decoding_twice_is_deterministic() {
        let (decoder, _) = decoder();
        assert_eq!(decoder.decode(TRADE_FRAME), decoder.decode(TRADE_FRAME));
        assert_eq!(decoder.decode(SNAPSHOT_FRAME), decoder.decode(SNAPSHOT_FRAME));
    }

    #[test]
    fn iso8601_accepts_offset_variants() {
        let base = parse_iso8601_us("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(parse_iso8601_us("2024-01-01T01:00:00+01:00").unwrap(), base);
        assert_eq!(parse_iso8601_us("2024-01-01T01:00:00+0100").unwrap(), base);
        assert_eq!(parse_iso8601_us("2024-01-01T01:00:00+01").unwrap(), base);
        // Nanosecond input truncates to microseconds.
        assert_eq!(
            parse_iso8601_us("2023-02-09T20:32:50.714964855Z").unwrap() % 1_000_000,
            714_964
        );
        assert!(parse_iso8601_us("not a timestamp").is_none());
        assert!(parse_iso8601_us("").is_none());
    }

    #[test]
    fn heartbeats_are_ignored_silently() {
        let (decoder, monitor) = decoder();
        assert!(decoder.decode(r#"{"channel": "heartbeats", "events": []}"#).is_empty());
        assert_eq!(monitor.decode_errors(), 0);
    }
}
