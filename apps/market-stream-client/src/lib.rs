#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Client - Realtime Market/User Data Multiplexer
//!
//! Keeps one physical WebSocket connection per feed, multiplexes many
//! `symbol@streamType` subscriptions over it, survives disconnects with a
//! bounded backoff, and fans decoded events out to independent consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure data model
//!   - `stream`: Stream keys, stream types, wire discriminants
//!   - `event`: Decoded market and user events
//!   - `subscription`: Subscription set and consumer reference counting
//!   - `connection`: Connection lifecycle states
//!
//! - **Application**: Services and port definitions
//!   - `ports`: Socket transport and feed interfaces
//!   - `services`: Event dispatcher and consumer adapter
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Connection actor, codec, feeds, feed registry
//!   - `transport`: WebSocket and in-process transports
//!   - `config`: Environment configuration
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                       ┌────────────┐     ┌────────────┐
//! <base>/ws ──────────► │ Connection │ ──► │ Dispatcher │ ──► ConsumerAdapter 1
//!  (MarketFeed)         │   actor    │     │            │ ──► ConsumerAdapter N
//!                       └────────────┘     └────────────┘
//! <base>/ws/<wallet> ─► one Connection + Dispatcher per wallet (UserFeed)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core stream types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::event::{Event, StreamEvent};
pub use domain::stream::{Scope, StreamKey, StreamKeyError, StreamKind, StreamType, WrongScope};
pub use domain::subscription::{ConsumerId, ConsumerLedger, SubscriptionSet};

// Application services and ports
pub use application::ports::{Feed, SharedTransport, Socket, Transport, TransportError};
pub use application::services::{ConsumerAdapter, DispatchReport, Dispatcher, HandlerId};

// Stream client
pub use infrastructure::stream::{
    Connection, FeedRegistry, MarketFeed, ReconnectConfig, ReconnectPolicy, RegistryError,
    UserFeed,
};

// Transports
pub use infrastructure::transport::{ChannelServer, ChannelTransport, ServerConnection, WsTransport};

// Configuration
pub use infrastructure::config::{
    ChainEndpoints, ChainId, ClientConfig, ConfigError, ConnectionSettings, WatchSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
