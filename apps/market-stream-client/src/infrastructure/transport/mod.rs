//! Transport Adapters
//!
//! Implementations of the [`Transport`](crate::application::ports::Transport)
//! port:
//!
//! - [`WsTransport`]: WebSocket over TCP/TLS (tokio-tungstenite)
//! - [`ChannelTransport`]: in-process loopback, paired with a
//!   [`ChannelServer`] that plays the upstream side

pub mod channel;
pub mod ws;

pub use channel::{ChannelServer, ChannelTransport, ServerConnection};
pub use ws::WsTransport;
