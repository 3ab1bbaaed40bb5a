//! Market and User Feeds
//!
//! A feed is a [`Connection`] bound to one endpoint, together with the
//! dispatcher that delivers its events and the ledger of consumers reading
//! from it.
//!
//! - [`MarketFeed`]: the shared, identity-less market endpoint (`<base>/ws`)
//! - [`UserFeed`]: one wallet's endpoint (`<base>/ws/<wallet>`)
//!
//! Feeds are cheap handles; clones share the same connection. They are
//! created by the [`FeedRegistry`](super::registry::FeedRegistry).

use std::sync::Arc;

use crate::application::ports::{Feed, SharedTransport};
use crate::application::services::dispatcher::Dispatcher;
use crate::domain::connection::ConnectionState;
use crate::domain::stream::{Scope, StreamKey, WrongScope};
use crate::domain::subscription::ConsumerLedger;
use crate::infrastructure::config::ChainId;
use crate::infrastructure::stream::connection::Connection;
use crate::infrastructure::stream::reconnect::ReconnectConfig;

/// Parts every feed shares.
#[derive(Debug, Clone)]
struct FeedCore {
    connection: Connection,
    endpoint: String,
    dispatcher: Arc<Dispatcher>,
    consumers: Arc<ConsumerLedger>,
}

impl FeedCore {
    fn spawn(
        scope: Scope,
        endpoint: String,
        transport: SharedTransport,
        reconnect: ReconnectConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(scope));
        let connection = Connection::spawn(scope, transport, Arc::clone(&dispatcher), reconnect);
        Self {
            connection,
            endpoint,
            dispatcher,
            consumers: Arc::new(ConsumerLedger::new()),
        }
    }

    fn connect(&self) {
        self.connection.connect(self.endpoint.clone());
    }
}

// =============================================================================
// Market Feed
// =============================================================================

/// Shared market data feed.
#[derive(Debug, Clone)]
pub struct MarketFeed {
    core: FeedCore,
}

impl MarketFeed {
    /// Spawn an idle market feed for `endpoint`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        endpoint: impl Into<String>,
        transport: SharedTransport,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            core: FeedCore::spawn(Scope::Market, endpoint.into(), transport, reconnect),
        }
    }

    /// Endpoint this feed connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.core.endpoint
    }

    /// Underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.core.connection
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    /// Close the socket and forget every subscription.
    pub fn disconnect(&self) {
        self.core.connection.disconnect();
    }

    /// Current subscription set.
    pub async fn subscriptions(&self) -> Vec<StreamKey> {
        self.core.connection.subscriptions().await
    }

    /// Whether both handles refer to the same feed instance.
    #[must_use]
    pub fn same_feed(&self, other: &Self) -> bool {
        self.core.connection.same_connection(&other.core.connection)
    }
}

impl Feed for MarketFeed {
    fn scope(&self) -> Scope {
        Scope::Market
    }

    fn connect(&self) {
        self.core.connect();
    }

    fn subscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        self.core.connection.subscribe(key)
    }

    fn unsubscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        self.core.connection.unsubscribe(key)
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.core.dispatcher
    }

    fn consumers(&self) -> &Arc<ConsumerLedger> {
        &self.core.consumers
    }
}

// =============================================================================
// User Feed
// =============================================================================

/// One wallet's user data feed.
///
/// Execution reports and balance updates are pushed by the server without a
/// SUBSCRIBE frame; subscribing to them only records the interest locally.
#[derive(Debug, Clone)]
pub struct UserFeed {
    core: FeedCore,
    wallet: String,
    chain_id: ChainId,
}

impl UserFeed {
    /// Spawn an idle user feed for `wallet` on `chain_id`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        wallet: impl Into<String>,
        chain_id: ChainId,
        endpoint: impl Into<String>,
        transport: SharedTransport,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            core: FeedCore::spawn(Scope::User, endpoint.into(), transport, reconnect),
            wallet: wallet.into(),
            chain_id,
        }
    }

    /// Wallet this feed serves.
    #[must_use]
    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    /// Chain the endpoint belongs to.
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Endpoint this feed connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.core.endpoint
    }

    /// Underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.core.connection
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    /// Close the socket and forget every subscription.
    pub fn disconnect(&self) {
        self.core.connection.disconnect();
    }

    /// Current subscription set.
    pub async fn subscriptions(&self) -> Vec<StreamKey> {
        self.core.connection.subscriptions().await
    }

    /// Whether both handles refer to the same feed instance.
    #[must_use]
    pub fn same_feed(&self, other: &Self) -> bool {
        self.core.connection.same_connection(&other.core.connection)
    }
}

impl Feed for UserFeed {
    fn scope(&self) -> Scope {
        Scope::User
    }

    fn connect(&self) {
        self.core.connect();
    }

    fn subscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        self.core.connection.subscribe(key)
    }

    fn unsubscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        self.core.connection.unsubscribe(key)
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.core.dispatcher
    }

    fn consumers(&self) -> &Arc<ConsumerLedger> {
        &self.core.consumers
    }
}
