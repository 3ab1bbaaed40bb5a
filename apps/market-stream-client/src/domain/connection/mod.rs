//! Connection States
//!
//! States of a feed connection's lifecycle:
//!
//! ```text
//! Idle ──► Connecting ──► Open ──► Closed ──► Reconnecting ──► Connecting
//!               │                    ▲              │
//!               └────────────────────┘              └──► Failed (budget exhausted)
//! ```
//!
//! `disconnect()` reaches `Closed` from any state; an explicit `connect()`
//! is the only way out of `Failed`.

use std::fmt;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Opening a socket.
    Connecting,
    /// Socket open; frames flow.
    Open,
    /// No socket, either after `disconnect()` or a transport failure.
    Closed,
    /// Waiting on the reconnect timer.
    Reconnecting,
    /// Reconnect budget exhausted; requires an explicit `connect()`.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Whether a socket is open or being opened (`connect()` is a no-op).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Whether the connection has given up reconnecting.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
