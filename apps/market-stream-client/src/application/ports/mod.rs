//! Port Interfaces
//!
//! Defines the interfaces (ports) between the client core and the outside
//! world following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: opens one physical socket to an endpoint
//!
//! ## Driver Ports (Inbound)
//!
//! - [`Feed`]: what a consumer adapter needs from a market or user feed

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::application::services::dispatcher::Dispatcher;
use crate::domain::stream::{Scope, StreamKey, WrongScope};
use crate::domain::subscription::ConsumerLedger;

// =============================================================================
// Transport
// =============================================================================

/// Outbound half of a socket: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a socket: yields text frames until the socket closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open physical socket.
pub struct Socket {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server. Ends when the socket closes.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens physical sockets.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a socket to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened.
    async fn open(&self, endpoint: &str) -> Result<Socket, TransportError>;
}

/// Shared transport reference.
pub type SharedTransport = Arc<dyn Transport>;

/// Socket-level failures. Never fatal: always routed to reconnection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer closed the socket.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Feed
// =============================================================================

/// A connection specialised to a market or user scope.
///
/// Every method is non-blocking; effects are applied in call order by the
/// feed's owning loop.
pub trait Feed: Send + Sync {
    /// Scope this feed serves.
    fn scope(&self) -> Scope;

    /// Connect to the feed's endpoint (no-op while connecting or open).
    fn connect(&self);

    /// Add a stream key to the feed's subscription set.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` belongs to the other scope.
    fn subscribe(&self, key: StreamKey) -> Result<(), WrongScope>;

    /// Remove a stream key from the feed's subscription set.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` belongs to the other scope.
    fn unsubscribe(&self, key: StreamKey) -> Result<(), WrongScope>;

    /// Dispatcher delivering this feed's events.
    fn dispatcher(&self) -> &Arc<Dispatcher>;

    /// Consumer reference counts for this feed.
    fn consumers(&self) -> &Arc<ConsumerLedger>;
}
