//! Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables.
//!
//! Base URLs are resolved per chain: `STREAM_ENDPOINTS` lists
//! `chainId=baseUrl` pairs, and every feed endpoint is derived from the base
//! URL of its chain (`<base>/ws` for market data, `<base>/ws/<wallet>` for
//! a wallet's user data).

use std::collections::BTreeMap;
use std::time::Duration;

use crate::infrastructure::stream::reconnect::ReconnectConfig;
use crate::infrastructure::transport::ws::DEFAULT_CONNECT_TIMEOUT;

/// Chain identifier (EVM chain id).
pub type ChainId = u64;

// =============================================================================
// Chain Endpoints
// =============================================================================

/// Base URL per chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainEndpoints {
    bases: BTreeMap<ChainId, String>,
}

impl ChainEndpoints {
    /// Create an empty endpoint table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bases: BTreeMap::new(),
        }
    }

    /// Add or replace the base URL of a chain. A trailing `/` is dropped.
    #[must_use]
    pub fn with_chain(mut self, chain_id: ChainId, base_url: impl AsRef<str>) -> Self {
        self.bases
            .insert(chain_id, base_url.as_ref().trim_end_matches('/').to_owned());
        self
    }

    /// Parse `chainId=baseUrl` pairs separated by commas.
    ///
    /// # Errors
    ///
    /// Returns an error if a pair is malformed, a chain id is not a number,
    /// a URL is not `ws://` or `wss://`, or the list is empty.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut endpoints = Self::new();

        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (chain, url) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidEndpoint(pair.to_owned()))?;
            let chain_id: ChainId = chain
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEndpoint(pair.to_owned()))?;
            let url = url.trim();
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::InvalidEndpoint(pair.to_owned()));
            }
            endpoints = endpoints.with_chain(chain_id, url);
        }

        if endpoints.is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_ENDPOINTS".to_owned()));
        }
        Ok(endpoints)
    }

    /// Base URL of a chain.
    #[must_use]
    pub fn base_url(&self, chain_id: ChainId) -> Option<&str> {
        self.bases.get(&chain_id).map(String::as_str)
    }

    /// Market data endpoint of a chain: `<base>/ws`.
    #[must_use]
    pub fn market_url(&self, chain_id: ChainId) -> Option<String> {
        self.base_url(chain_id).map(|base| format!("{base}/ws"))
    }

    /// User data endpoint of a wallet on a chain: `<base>/ws/<wallet>`.
    #[must_use]
    pub fn user_url(&self, chain_id: ChainId, wallet: &str) -> Option<String> {
        self.base_url(chain_id)
            .map(|base| format!("{base}/ws/{wallet}"))
    }

    /// Configured chains in ascending order.
    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.bases.keys().copied()
    }

    /// Whether no chain is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

// =============================================================================
// Connection Settings
// =============================================================================

/// Socket and reconnection settings shared by every feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Handshake timeout per connection attempt.
    pub connect_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL per chain.
    pub endpoints: ChainEndpoints,
    /// Chain whose market endpoint the market feed uses.
    pub market_chain_id: ChainId,
    /// Socket and reconnection settings.
    pub connection: ConnectionSettings,
}

impl ClientConfig {
    /// Create a configuration with default connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `market_chain_id` has no endpoint.
    pub fn new(endpoints: ChainEndpoints, market_chain_id: ChainId) -> Result<Self, ConfigError> {
        if endpoints.base_url(market_chain_id).is_none() {
            return Err(ConfigError::UnknownChain(market_chain_id));
        }
        Ok(Self {
            endpoints,
            market_chain_id,
            connection: ConnectionSettings::default(),
        })
    }

    /// Replace the connection settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing,
    /// empty or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoints_spec = lookup("STREAM_ENDPOINTS")
            .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_ENDPOINTS".to_owned()))?;
        let endpoints = ChainEndpoints::parse(&endpoints_spec)?;

        let market_chain_id = match parse_var::<ChainId>(&lookup, "STREAM_MARKET_CHAIN_ID")? {
            Some(chain_id) => chain_id,
            None => endpoints
                .chains()
                .next()
                .ok_or_else(|| ConfigError::EmptyValue("STREAM_ENDPOINTS".to_owned()))?,
        };

        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            initial_delay: parse_var(&lookup, "STREAM_RECONNECT_BASE_MS")?
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: parse_var(&lookup, "STREAM_RECONNECT_MAX_DELAY_MS")?
                .map(Duration::from_millis),
            multiplier: parse_var(&lookup, "STREAM_RECONNECT_FACTOR")?
                .unwrap_or(defaults.multiplier),
            jitter_factor: parse_var(&lookup, "STREAM_RECONNECT_JITTER")?
                .unwrap_or(defaults.jitter_factor),
            max_attempts: parse_var(&lookup, "STREAM_RECONNECT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
        };
        validate_reconnect(&reconnect)?;

        let connection = ConnectionSettings {
            connect_timeout: parse_var(&lookup, "STREAM_CONNECT_TIMEOUT_MS")?
                .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_millis),
            reconnect,
        };

        Ok(Self::new(endpoints, market_chain_id)?.with_connection(connection))
    }

    /// Market data endpoint.
    #[must_use]
    pub fn market_url(&self) -> Option<String> {
        self.endpoints.market_url(self.market_chain_id)
    }
}

// =============================================================================
// Watch Settings (binary)
// =============================================================================

/// What the `market-stream-client` binary watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    /// Market symbols.
    pub symbols: Vec<String>,
    /// Stream types attached for every symbol.
    pub stream_types: Vec<String>,
    /// Wallet whose user streams are watched.
    pub wallet: Option<String>,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusdc".to_owned()],
            stream_types: vec!["trade".to_owned(), "miniTicker".to_owned()],
            wallet: None,
            metrics_port: 9090,
        }
    }
}

impl WatchSettings {
    /// Create watch settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics port is not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create watch settings from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`WatchSettings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            symbols: lookup("STREAM_SYMBOLS")
                .map(|v| split_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.symbols),
            stream_types: lookup("STREAM_TYPES")
                .map(|v| split_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.stream_types),
            wallet: lookup("STREAM_WALLET")
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty()),
            metrics_port: parse_var(&lookup, "STREAM_CLIENT_METRICS_PORT")?
                .unwrap_or(defaults.metrics_port),
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable does not parse.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Malformed `chainId=baseUrl` pair.
    #[error("invalid endpoint {0:?}, expected chainId=ws(s)://host")]
    InvalidEndpoint(String),
    /// Chain without a configured endpoint.
    #[error("no endpoint configured for chain {0}")]
    UnknownChain(ChainId),
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: raw.clone(),
    })
}

fn validate_reconnect(config: &ReconnectConfig) -> Result<(), ConfigError> {
    if !(config.multiplier.is_finite() && config.multiplier >= 1.0) {
        return Err(ConfigError::InvalidValue {
            key: "STREAM_RECONNECT_FACTOR".to_owned(),
            value: config.multiplier.to_string(),
        });
    }
    if !(0.0..=1.0).contains(&config.jitter_factor) {
        return Err(ConfigError::InvalidValue {
            key: "STREAM_RECONNECT_JITTER".to_owned(),
            value: config.jitter_factor.to_string(),
        });
    }
    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
