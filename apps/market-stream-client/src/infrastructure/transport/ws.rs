//! WebSocket Transport
//!
//! Opens feed sockets with `tokio-tungstenite`. Text frames pass through
//! unchanged, binary frames are accepted when they hold UTF-8, and a close
//! frame ends the socket with [`TransportError::ConnectionClosed`]. Pings are
//! answered by tungstenite itself.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{Socket, Transport, TransportError};

/// Default time allowed for the TCP/TLS/WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket transport.
#[derive(Debug, Clone, Copy)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsTransport {
    /// Create a transport with a handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str) -> Result<Socket, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(endpoint))
                .await
                .map_err(|_| {
                    TransportError::ConnectionFailed(format!(
                        "handshake with {endpoint} timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })??;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => binary_text(&bytes).map(Ok),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Close frame received");
                    Some(Err(TransportError::ConnectionClosed))
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Text carried by a binary frame; frames that are not UTF-8 are dropped.
fn binary_text(bytes: &[u8]) -> Option<String> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text.to_owned()),
        Err(e) => {
            tracing::warn!(error = %e, len = bytes.len(), "Dropping binary frame that is not UTF-8");
            None
        }
    }
}
