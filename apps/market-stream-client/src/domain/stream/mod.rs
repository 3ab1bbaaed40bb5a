//! Stream Keys
//!
//! A stream key identifies one logical subscription multiplexed over a feed.
//! Its canonical string form is `lower(symbol) + "@" + streamType`, e.g.
//! `ethusdc@trade` or `btcusdc@kline_1m`.
//!
//! # Wire Discriminants
//!
//! Upstream events carry an `e` field that does not always equal the
//! subscribed stream type (`24hrMiniTicker` for `miniTicker`, `depthUpdate`
//! for `depth`). [`DISCRIMINANTS`] is the single table mapping every accepted
//! discriminant to its [`StreamKind`]; anything absent from it is rejected.

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Scope
// =============================================================================

/// Endpoint family a stream or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared, identity-less market data endpoint.
    Market,
    /// Per-wallet user data endpoint.
    User,
}

impl Scope {
    /// Get the scope name (used as a log field and metric label).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stream Kind
// =============================================================================

/// Stream family without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    /// Individual trades.
    Trade,
    /// Order book diff updates.
    Depth,
    /// Candlesticks for one interval.
    Kline,
    /// Rolling 24h mini ticker.
    MiniTicker,
    /// Order lifecycle reports for a wallet.
    ExecutionReport,
    /// Balance deltas for a wallet.
    BalanceUpdate,
}

/// Every accepted wire discriminant and the stream kind it decodes to.
pub const DISCRIMINANTS: &[(&str, StreamKind)] = &[
    ("trade", StreamKind::Trade),
    ("depthUpdate", StreamKind::Depth),
    ("kline", StreamKind::Kline),
    ("miniTicker", StreamKind::MiniTicker),
    ("24hrMiniTicker", StreamKind::MiniTicker),
    ("executionReport", StreamKind::ExecutionReport),
    ("balanceUpdate", StreamKind::BalanceUpdate),
];

impl StreamKind {
    /// Look up the stream kind for a wire discriminant.
    #[must_use]
    pub fn from_discriminant(discriminant: &str) -> Option<Self> {
        DISCRIMINANTS
            .iter()
            .find(|(wire, _)| *wire == discriminant)
            .map(|(_, kind)| *kind)
    }

    /// Scope the kind is delivered on.
    #[must_use]
    pub const fn scope(self) -> Scope {
        match self {
            Self::Trade | Self::Depth | Self::Kline | Self::MiniTicker => Scope::Market,
            Self::ExecutionReport | Self::BalanceUpdate => Scope::User,
        }
    }

    /// Whether the server pushes this kind without a SUBSCRIBE frame.
    #[must_use]
    pub const fn is_implicit(self) -> bool {
        matches!(self, Self::ExecutionReport | Self::BalanceUpdate)
    }
}

// =============================================================================
// Stream Type
// =============================================================================

/// Stream type half of a stream key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    /// `trade`
    Trade,
    /// `depth`
    Depth,
    /// `kline_<interval>`
    Kline(String),
    /// `miniTicker`
    MiniTicker,
    /// `executionReport`
    ExecutionReport,
    /// `balanceUpdate`
    BalanceUpdate,
}

impl StreamType {
    /// Create a kline stream type for an interval such as `1m` or `4h`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is empty or not alphanumeric.
    pub fn kline(interval: impl Into<String>) -> Result<Self, StreamKeyError> {
        let interval = interval.into();
        if interval.is_empty() || !interval.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StreamKeyError::InvalidInterval(interval));
        }
        Ok(Self::Kline(interval))
    }

    /// Parameterless kind of this stream type.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Trade => StreamKind::Trade,
            Self::Depth => StreamKind::Depth,
            Self::Kline(_) => StreamKind::Kline,
            Self::MiniTicker => StreamKind::MiniTicker,
            Self::ExecutionReport => StreamKind::ExecutionReport,
            Self::BalanceUpdate => StreamKind::BalanceUpdate,
        }
    }

    /// Scope this stream type is delivered on.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.kind().scope()
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trade => f.write_str("trade"),
            Self::Depth => f.write_str("depth"),
            Self::Kline(interval) => write!(f, "kline_{interval}"),
            Self::MiniTicker => f.write_str("miniTicker"),
            Self::ExecutionReport => f.write_str("executionReport"),
            Self::BalanceUpdate => f.write_str("balanceUpdate"),
        }
    }
}

impl FromStr for StreamType {
    type Err = StreamKeyError;

    /// Parses canonical names and the discriminant synonyms from
    /// [`DISCRIMINANTS`]. A bare `kline` has no interval and is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(interval) = s.strip_prefix("kline_") {
            return Self::kline(interval);
        }
        match s {
            "depth" => Ok(Self::Depth),
            other => match StreamKind::from_discriminant(other) {
                Some(StreamKind::Trade) => Ok(Self::Trade),
                Some(StreamKind::Depth) => Ok(Self::Depth),
                Some(StreamKind::MiniTicker) => Ok(Self::MiniTicker),
                Some(StreamKind::ExecutionReport) => Ok(Self::ExecutionReport),
                Some(StreamKind::BalanceUpdate) => Ok(Self::BalanceUpdate),
                Some(StreamKind::Kline) | None => {
                    Err(StreamKeyError::UnknownStreamType(other.to_string()))
                }
            },
        }
    }
}

// =============================================================================
// Stream Key
// =============================================================================

/// Canonical `symbol@streamType` identifier for one logical subscription.
///
/// The symbol is lower-cased on construction, so `ETHUSDC` and `ethusdc`
/// name the same key.
///
/// ```rust
/// use market_stream_client::domain::stream::{StreamKey, StreamType};
///
/// let key = StreamKey::new("ETHUSDC", StreamType::MiniTicker).unwrap();
/// assert_eq!(key.to_string(), "ethusdc@miniTicker");
/// assert_eq!("ethusdc@miniTicker".parse::<StreamKey>().unwrap(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    symbol: String,
    stream_type: StreamType,
}

impl StreamKey {
    /// Create a stream key, canonicalising the symbol to lower case.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty or contains `@` or whitespace.
    pub fn new(symbol: impl AsRef<str>, stream_type: StreamType) -> Result<Self, StreamKeyError> {
        let symbol = symbol.as_ref().trim();
        if symbol.is_empty() {
            return Err(StreamKeyError::EmptySymbol);
        }
        if symbol.contains('@') || symbol.chars().any(char::is_whitespace) {
            return Err(StreamKeyError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self {
            symbol: symbol.to_lowercase(),
            stream_type,
        })
    }

    /// Lower-cased symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Stream type.
    #[must_use]
    pub const fn stream_type(&self) -> &StreamType {
        &self.stream_type
    }

    /// Scope the key can be subscribed on.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.stream_type.scope()
    }

    /// Whether the key is delivered without an explicit SUBSCRIBE frame.
    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        self.stream_type.kind().is_implicit()
    }

    /// Check that the key can be subscribed on a feed of `expected` scope.
    ///
    /// # Errors
    ///
    /// Returns [`WrongScope`] if the key belongs to the other scope.
    pub fn ensure_scope(&self, expected: Scope) -> Result<(), WrongScope> {
        if self.scope() == expected {
            Ok(())
        } else {
            Err(WrongScope {
                key: self.clone(),
                expected,
            })
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.stream_type)
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, stream_type) = s
            .split_once('@')
            .ok_or_else(|| StreamKeyError::MissingSeparator(s.to_string()))?;
        Self::new(symbol, stream_type.parse()?)
    }
}

/// Errors raised while building or parsing a stream key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamKeyError {
    /// No `@` between symbol and stream type.
    #[error("stream key '{0}' is missing the '@' separator")]
    MissingSeparator(String),

    /// Symbol is empty.
    #[error("stream key symbol cannot be empty")]
    EmptySymbol,

    /// Symbol contains a reserved character.
    #[error("invalid stream key symbol: {0}")]
    InvalidSymbol(String),

    /// Stream type is not in the supported set.
    #[error("unknown stream type: {0}")]
    UnknownStreamType(String),

    /// Kline interval is malformed.
    #[error("invalid kline interval: '{0}'")]
    InvalidInterval(String),
}

/// A stream key used on a feed of the other scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream key {key} is a {} stream, not {expected}", .key.scope())]
pub struct WrongScope {
    /// Rejected key.
    pub key: StreamKey,
    /// Scope of the feed it was used on.
    pub expected: Scope,
}

// =============================================================================
// Tests
// =============================================================================
