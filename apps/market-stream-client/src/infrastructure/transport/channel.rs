//! In-Process Transport
//!
//! A loopback [`Transport`] backed by `futures` channels. Every successful
//! `open` hands a [`ServerConnection`] to the paired [`ChannelServer`],
//! which plays the upstream side: it reads the client's control frames and
//! pushes data frames back. Dropping the server connection closes the
//! client's socket.
//!
//! Useful for embedding a feed behind another in-process source and for
//! exercising reconnect behavior deterministically.
//!
//! ```rust
//! use market_stream_client::infrastructure::transport::ChannelTransport;
//!
//! let (transport, _server) = ChannelTransport::pair();
//! transport.set_available(false); // every open fails until re-enabled
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;

use crate::application::ports::{Socket, Transport, TransportError};

#[derive(Debug)]
struct Shared {
    available: AtomicBool,
    opened: Mutex<Vec<String>>,
    accept: mpsc::UnboundedSender<ServerConnection>,
}

/// Client half of the loopback.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    shared: Arc<Shared>,
}

/// Server half of the loopback: yields one [`ServerConnection`] per
/// successful `open`.
#[derive(Debug)]
pub struct ChannelServer {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
}

/// Upstream side of one open socket.
#[derive(Debug)]
pub struct ServerConnection {
    endpoint: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Create a connected transport/server pair.
    #[must_use]
    pub fn pair() -> (Self, ChannelServer) {
        let (accept, incoming) = mpsc::unbounded();
        let transport = Self {
            shared: Arc::new(Shared {
                available: AtomicBool::new(true),
                opened: Mutex::new(Vec::new()),
                accept,
            }),
        };
        (transport, ChannelServer { incoming })
    }

    /// Make subsequent `open` calls succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Endpoints of every `open` call so far, failed ones included.
    #[must_use]
    pub fn opened_endpoints(&self) -> Vec<String> {
        self.shared.opened.lock().clone()
    }

    /// Number of `open` calls so far, failed ones included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.shared.opened.lock().len()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, endpoint: &str) -> Result<Socket, TransportError> {
        self.shared.opened.lock().push(endpoint.to_owned());

        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "{endpoint} is unavailable"
            )));
        }

        let (client_tx, from_client) = mpsc::unbounded();
        let (to_client, client_rx) = mpsc::unbounded();

        self.shared
            .accept
            .unbounded_send(ServerConnection {
                endpoint: endpoint.to_owned(),
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::ConnectionFailed("server side dropped".to_owned()))?;

        Ok(Socket {
            sink: Box::pin(client_tx.sink_map_err(|_| TransportError::ConnectionClosed)),
            stream: Box::pin(client_rx.map(Ok::<String, TransportError>)),
        })
    }
}

impl ChannelServer {
    /// Wait for the next socket. Returns `None` once every transport clone
    /// is gone.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.incoming.next().await
    }
}

impl ServerConnection {
    /// Endpoint the client opened.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Next frame sent by the client. `None` once the client closed.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Push a frame to the client. Returns `false` if the client is gone.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(frame.into()).is_ok()
    }

    /// Close the socket from the server side.
    pub fn close(self) {
        drop(self);
    }
}
