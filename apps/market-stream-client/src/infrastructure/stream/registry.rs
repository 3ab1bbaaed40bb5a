//! Feed Registry
//!
//! Composition-root owner of every feed in the process: the market feed,
//! created on first use, and at most one user feed per wallet.
//!
//! Wallets are matched case-insensitively, so `0xABC` and `0xabc` share one
//! feed; the address is used verbatim in the endpoint path of the feed that
//! first registers it.
//!
//! A user feed is bound to `(wallet, chain)`. Asking for the same wallet on
//! another chain disconnects and discards the old feed before creating its
//! replacement, so a feed never serves data for the wrong chain.
//!
//! Idle user feeds are not evicted; call
//! [`release_user_feed`](FeedRegistry::release_user_feed) when a wallet goes
//! away, or [`shutdown`](FeedRegistry::shutdown) at exit.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::application::ports::SharedTransport;
use crate::infrastructure::config::{ChainId, ClientConfig};
use crate::infrastructure::stream::feeds::{MarketFeed, UserFeed};

/// Misuse errors, reported synchronously. No connection is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Empty or whitespace-only wallet address.
    #[error("wallet address cannot be empty")]
    EmptyWallet,

    /// Wallet address that cannot be embedded in an endpoint path.
    #[error("invalid wallet address: {0:?}")]
    InvalidWallet(String),

    /// Chain without a configured endpoint.
    #[error("no endpoint configured for chain {0}")]
    UnknownChain(ChainId),
}

/// Owner of the market feed and the per-wallet user feeds.
pub struct FeedRegistry {
    config: ClientConfig,
    transport: SharedTransport,
    market: Mutex<Option<MarketFeed>>,
    /// Keyed by the ASCII-lowercased wallet.
    users: Mutex<HashMap<String, UserFeed>>,
}

impl FeedRegistry {
    /// Create an empty registry. No feed is spawned until first requested.
    #[must_use]
    pub fn new(config: ClientConfig, transport: SharedTransport) -> Self {
        Self {
            config,
            transport,
            market: Mutex::new(None),
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration feeds are built from.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The market feed, spawned on first call.
    ///
    /// Must be called from within a tokio runtime.
    pub fn market_feed(&self) -> MarketFeed {
        let mut market = self.market.lock();
        market
            .get_or_insert_with(|| {
                let endpoint = self.config.market_url().unwrap_or_default();
                tracing::info!(%endpoint, chain_id = self.config.market_chain_id, "Creating market feed");
                MarketFeed::spawn(
                    endpoint,
                    self.transport.clone(),
                    self.config.connection.reconnect.clone(),
                )
            })
            .clone()
    }

    /// The user feed for `wallet` on `chain_id`.
    ///
    /// Reuses the registered feed when it is bound to the same chain;
    /// otherwise disconnects it and spawns a replacement.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the wallet is empty or malformed, or the chain
    /// has no configured endpoint.
    pub fn user_feed(&self, wallet: &str, chain_id: ChainId) -> Result<UserFeed, RegistryError> {
        let wallet = validate_wallet(wallet)?;
        let endpoint = self
            .config
            .endpoints
            .user_url(chain_id, wallet)
            .ok_or(RegistryError::UnknownChain(chain_id))?;

        let wallet_key = wallet.to_ascii_lowercase();
        let mut users = self.users.lock();
        if let Some(existing) = users.get(&wallet_key) {
            if existing.chain_id() == chain_id {
                return Ok(existing.clone());
            }
            tracing::info!(
                wallet,
                old_chain_id = existing.chain_id(),
                new_chain_id = chain_id,
                "Chain changed, replacing user feed"
            );
            existing.disconnect();
        }

        tracing::info!(wallet, chain_id, %endpoint, "Creating user feed");
        let feed = UserFeed::spawn(
            wallet,
            chain_id,
            endpoint,
            self.transport.clone(),
            self.config.connection.reconnect.clone(),
        );
        users.insert(wallet_key, feed.clone());
        Ok(feed)
    }

    /// Disconnect and forget the user feed of `wallet` (any letter case).
    ///
    /// Returns `false` if no feed was registered.
    pub fn release_user_feed(&self, wallet: &str) -> bool {
        let wallet_key = wallet.trim().to_ascii_lowercase();
        let Some(feed) = self.users.lock().remove(&wallet_key) else {
            return false;
        };
        feed.disconnect();
        tracing::info!(wallet = feed.wallet(), "User feed released");
        true
    }

    /// Number of registered user feeds.
    #[must_use]
    pub fn user_feed_count(&self) -> usize {
        self.users.lock().len()
    }

    /// Disconnect every feed and forget the user feeds.
    ///
    /// The market feed handle stays registered, so a later
    /// [`market_feed`](Self::market_feed) returns the same instance.
    pub fn shutdown(&self) {
        let users: Vec<UserFeed> = self.users.lock().drain().map(|(_, feed)| feed).collect();
        for feed in &users {
            feed.disconnect();
        }
        if let Some(market) = self.market.lock().as_ref() {
            market.disconnect();
        }
        tracing::info!(user_feeds = users.len(), "Feed registry shut down");
    }
}

impl std::fmt::Debug for FeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistry")
            .field("market_chain_id", &self.config.market_chain_id)
            .field("market_feed", &self.market.lock().is_some())
            .field("user_feeds", &self.user_feed_count())
            .finish_non_exhaustive()
    }
}

fn validate_wallet(wallet: &str) -> Result<&str, RegistryError> {
    let wallet = wallet.trim();
    if wallet.is_empty() {
        return Err(RegistryError::EmptyWallet);
    }
    if !wallet.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RegistryError::InvalidWallet(wallet.to_owned()));
    }
    Ok(wallet)
}
