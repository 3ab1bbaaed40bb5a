//! Stream Events
//!
//! Typed payloads for every event the feeds deliver, plus the [`Event`]
//! tagged union and the [`StreamEvent`] wrapper handed to consumers.
//!
//! # Wire Format (JSON)
//!
//! Every payload carries its discriminant in `e` and its event time (epoch
//! milliseconds) in `E`:
//!
//! ```json
//! {"e":"trade","E":1700000000000,"s":"ETHUSDC","t":42,"p":"2011.50","q":"0.25","T":1700000000000,"m":true}
//! ```
//!
//! Prices and quantities are accepted as JSON strings or numbers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::stream::{Scope, StreamKey, StreamKind, StreamType};

// =============================================================================
// Market Events
// =============================================================================

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Discriminant (`trade`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Market symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade ID.
    #[serde(rename = "t", default)]
    pub trade_id: u64,

    /// Execution price.
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Executed quantity.
    #[serde(rename = "q")]
    pub quantity: Decimal,

    /// Trade time.
    #[serde(
        rename = "T",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub trade_time: Option<DateTime<Utc>>,

    /// Whether the buyer was the maker.
    #[serde(rename = "m", default)]
    pub buyer_is_maker: bool,
}

/// One `[price, quantity]` book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel(pub Decimal, pub Decimal);

impl PriceLevel {
    /// Level price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.0
    }

    /// Level quantity (zero removes the level).
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.1
    }
}

/// Incremental order book update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// Discriminant (`depthUpdate`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Market symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in this event.
    #[serde(rename = "U", default)]
    pub first_update_id: u64,

    /// Final update ID in this event.
    #[serde(rename = "u", default)]
    pub final_update_id: u64,

    /// Bid levels to update.
    #[serde(rename = "b", default)]
    pub bids: Vec<PriceLevel>,

    /// Ask levels to update.
    #[serde(rename = "a", default)]
    pub asks: Vec<PriceLevel>,
}

/// Candlestick body of a kline event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time.
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub open_time: DateTime<Utc>,

    /// Candle close time.
    #[serde(rename = "T", with = "chrono::serde::ts_milliseconds")]
    pub close_time: DateTime<Utc>,

    /// Interval, e.g. `1m`.
    #[serde(rename = "i")]
    pub interval: String,

    /// Open price.
    #[serde(rename = "o")]
    pub open: Decimal,

    /// High price.
    #[serde(rename = "h")]
    pub high: Decimal,

    /// Low price.
    #[serde(rename = "l")]
    pub low: Decimal,

    /// Close price.
    #[serde(rename = "c")]
    pub close: Decimal,

    /// Base asset volume.
    #[serde(rename = "v", default)]
    pub volume: Decimal,

    /// Number of trades.
    #[serde(rename = "n", default)]
    pub trade_count: u64,

    /// Whether the candle is final.
    #[serde(rename = "x", default)]
    pub is_closed: bool,
}

/// Candlestick update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    /// Discriminant (`kline`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Market symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Candle data.
    #[serde(rename = "k")]
    pub candle: Candle,
}

/// Rolling 24h mini ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniTicker {
    /// Discriminant (`miniTicker` or `24hrMiniTicker`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Market symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Last price.
    #[serde(rename = "c")]
    pub close: Decimal,

    /// Open price 24h ago.
    #[serde(rename = "o")]
    pub open: Decimal,

    /// 24h high.
    #[serde(rename = "h")]
    pub high: Decimal,

    /// 24h low.
    #[serde(rename = "l")]
    pub low: Decimal,

    /// 24h base asset volume.
    #[serde(rename = "v", default)]
    pub base_volume: Decimal,

    /// 24h quote asset volume.
    #[serde(rename = "q", default)]
    pub quote_volume: Decimal,
}

// =============================================================================
// User Events
// =============================================================================

/// Order lifecycle report for the wallet's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Discriminant (`executionReport`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Market symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Client order ID.
    #[serde(rename = "c", default)]
    pub client_order_id: String,

    /// Order side (`BUY`/`SELL`).
    #[serde(rename = "S")]
    pub side: String,

    /// Order type (`LIMIT`, `MARKET`, ...).
    #[serde(rename = "o", default)]
    pub order_type: String,

    /// Execution type of this report (`NEW`, `TRADE`, `CANCELED`, ...).
    #[serde(rename = "x", default)]
    pub execution_type: String,

    /// Current order status.
    #[serde(rename = "X")]
    pub order_status: String,

    /// Exchange order ID.
    #[serde(rename = "i", default)]
    pub order_id: u64,

    /// Order price.
    #[serde(rename = "p", default)]
    pub price: Decimal,

    /// Order quantity.
    #[serde(rename = "q", default)]
    pub quantity: Decimal,

    /// Quantity filled by the last execution.
    #[serde(rename = "l", default)]
    pub last_filled_quantity: Decimal,

    /// Price of the last execution.
    #[serde(rename = "L", default)]
    pub last_filled_price: Decimal,

    /// Cumulative filled quantity.
    #[serde(rename = "z", default)]
    pub cumulative_filled_quantity: Decimal,
}

/// Balance delta for one asset of the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Discriminant (`balanceUpdate`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time.
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Asset.
    #[serde(rename = "a")]
    pub asset: String,

    /// Balance delta.
    #[serde(rename = "d")]
    pub delta: Decimal,

    /// Clear time.
    #[serde(
        rename = "T",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub clear_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Event Union
// =============================================================================

/// Closed set of events a feed can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Market trade.
    Trade(Trade),
    /// Order book diff.
    Depth(DepthUpdate),
    /// Candlestick update.
    Kline(Kline),
    /// 24h mini ticker.
    MiniTicker(MiniTicker),
    /// Wallet order report.
    ExecutionReport(ExecutionReport),
    /// Wallet balance delta.
    BalanceUpdate(BalanceUpdate),
}

impl Event {
    /// Stream kind of this event.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Trade(_) => StreamKind::Trade,
            Self::Depth(_) => StreamKind::Depth,
            Self::Kline(_) => StreamKind::Kline,
            Self::MiniTicker(_) => StreamKind::MiniTicker,
            Self::ExecutionReport(_) => StreamKind::ExecutionReport,
            Self::BalanceUpdate(_) => StreamKind::BalanceUpdate,
        }
    }

    /// Scope this event belongs to.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.kind().scope()
    }

    /// Wire discriminant as received.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Trade(e) => &e.event_type,
            Self::Depth(e) => &e.event_type,
            Self::Kline(e) => &e.event_type,
            Self::MiniTicker(e) => &e.event_type,
            Self::ExecutionReport(e) => &e.event_type,
            Self::BalanceUpdate(e) => &e.event_type,
        }
    }

    /// Event time.
    #[must_use]
    pub const fn event_time(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(e) => e.event_time,
            Self::Depth(e) => e.event_time,
            Self::Kline(e) => e.event_time,
            Self::MiniTicker(e) => e.event_time,
            Self::ExecutionReport(e) => e.event_time,
            Self::BalanceUpdate(e) => e.event_time,
        }
    }

    /// Symbol carried in the payload, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(e) => Some(&e.symbol),
            Self::Depth(e) => Some(&e.symbol),
            Self::Kline(e) => Some(&e.symbol),
            Self::MiniTicker(e) => Some(&e.symbol),
            Self::ExecutionReport(e) => Some(&e.symbol),
            Self::BalanceUpdate(_) => None,
        }
    }

    /// Stream type derived from the payload alone.
    ///
    /// Klines take their interval from the candle body.
    #[must_use]
    pub fn stream_type(&self) -> StreamType {
        match self {
            Self::Trade(_) => StreamType::Trade,
            Self::Depth(_) => StreamType::Depth,
            Self::Kline(e) => StreamType::Kline(e.candle.interval.clone()),
            Self::MiniTicker(_) => StreamType::MiniTicker,
            Self::ExecutionReport(_) => StreamType::ExecutionReport,
            Self::BalanceUpdate(_) => StreamType::BalanceUpdate,
        }
    }
}

// =============================================================================
// Stream Event
// =============================================================================

/// A decoded event together with the stream it was routed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Stream key from the `{stream, data}` envelope, if the frame had one.
    pub stream: Option<StreamKey>,
    /// Stream type used for routing.
    pub stream_type: StreamType,
    /// The decoded payload.
    pub event: Event,
}

impl StreamEvent {
    /// Wrap a raw event; the stream type is derived from the payload.
    #[must_use]
    pub fn raw(event: Event) -> Self {
        Self {
            stream: None,
            stream_type: event.stream_type(),
            event,
        }
    }

    /// Wrap an enveloped event; the stream type comes from the envelope.
    #[must_use]
    pub fn enveloped(stream: StreamKey, event: Event) -> Self {
        Self {
            stream_type: stream.stream_type().clone(),
            stream: Some(stream),
            event,
        }
    }

    /// Symbol for routing: the envelope symbol, else the payload symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.stream
            .as_ref()
            .map(StreamKey::symbol)
            .or_else(|| self.event.symbol())
    }

    /// Whether a consumer attached to `key` should receive this event.
    ///
    /// The stream type must match. Market events must also match the key's
    /// symbol (case-insensitively) when they carry one; user events are
    /// matched on stream type alone.
    #[must_use]
    pub fn matches(&self, key: &StreamKey) -> bool {
        if &self.stream_type != key.stream_type() {
            return false;
        }
        if self.event.scope() == Scope::User {
            return true;
        }
        self.symbol()
            .is_none_or(|symbol| symbol.eq_ignore_ascii_case(key.symbol()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mini_ticker(event_type: &str, symbol: &str) -> Event {
        let json = format!(
            r#"{{"e":"{event_type}","E":1700000000000,"s":"{symbol}","c":"2011.5","o":"1990","h":"2030","l":"1985.25","v":"1200.5","q":"2410000"}}"#
        );
        Event::MiniTicker(serde_json::from_str(&json).unwrap())
    }

    #[test]
    fn trade_decodes_string_and_numeric_decimals() {
        let trade: Trade = serde_json::from_str(
            r#"{"e":"trade","E":1700000000000,"s":"ETHUSDC","t":7,"p":"2011.50","q":0.25,"T":1700000000001,"m":true}"#,
        )
        .unwrap();

        assert_eq!(trade.price, Decimal::new(201_150, 2));
        assert_eq!(trade.quantity, Decimal::new(25, 2));
        assert_eq!(trade.event_time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(trade.trade_time.unwrap().timestamp_millis(), 1_700_000_000_001);
        assert!(trade.buyer_is_maker);
    }

    #[test]
    fn depth_levels_decode_from_pairs() {
        let depth: DepthUpdate = serde_json::from_str(
            r#"{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDC","U":10,"u":12,"b":[["42000.1","0.5"]],"a":[["42001","0"]]}"#,
        )
        .unwrap();

        assert_eq!(depth.bids.len(), 1);
        assert_eq!(depth.bids[0].price(), Decimal::new(420_001, 1));
        assert_eq!(depth.asks[0].quantity(), Decimal::ZERO);
        assert_eq!(depth.final_update_id, 12);
    }

    #[test]
    fn kline_stream_type_uses_interval() {
        let kline: Kline = serde_json::from_str(
            r#"{"e":"kline","E":1700000000000,"s":"BTCUSDC","k":{"t":1700000000000,"T":1700000059999,"i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","n":3,"x":false}}"#,
        )
        .unwrap();
        let event = Event::Kline(kline);

        assert_eq!(event.stream_type(), StreamType::Kline("1m".to_string()));
        assert_eq!(event.kind(), StreamKind::Kline);
        assert_eq!(event.scope(), Scope::Market);
    }

    #[test]
    fn balance_update_has_no_symbol() {
        let update: BalanceUpdate = serde_json::from_str(
            r#"{"e":"balanceUpdate","E":1700000000000,"a":"USDC","d":"-12.5"}"#,
        )
        .unwrap();
        let event = Event::BalanceUpdate(update);

        assert_eq!(event.symbol(), None);
        assert_eq!(event.scope(), Scope::User);
        assert_eq!(event.event_type(), "balanceUpdate");
    }

    #[test]
    fn envelope_stream_type_wins() {
        let key: StreamKey = "ethusdc@miniTicker".parse().unwrap();
        let event = StreamEvent::enveloped(key.clone(), mini_ticker("24hrMiniTicker", "ETHUSDC"));

        assert_eq!(event.stream_type, StreamType::MiniTicker);
        assert!(event.matches(&key));
        assert!(!event.matches(&"ethusdc@trade".parse().unwrap()));
    }

    #[test]
    fn raw_event_matches_on_symbol_case_insensitively() {
        let event = StreamEvent::raw(mini_ticker("24hrMiniTicker", "ETHUSDC"));

        assert!(event.matches(&"ethusdc@miniTicker".parse().unwrap()));
        assert!(!event.matches(&"btcusdc@miniTicker".parse().unwrap()));
    }

    #[test]
    fn user_events_match_on_type_only() {
        let report: ExecutionReport = serde_json::from_str(
            r#"{"e":"executionReport","E":1700000000000,"s":"ETHUSDC","S":"BUY","X":"NEW"}"#,
        )
        .unwrap();
        let event = StreamEvent::raw(Event::ExecutionReport(report));

        assert!(event.matches(&"btcusdc@executionReport".parse().unwrap()));
        assert!(!event.matches(&"btcusdc@balanceUpdate".parse().unwrap()));
    }
}
