//! Feed Connections
//!
//! Realtime feed plumbing over a [`Transport`](crate::application::ports::Transport):
//!
//! - **codec / messages**: inbound event decoding, outbound control frames
//! - **reconnect**: exponential backoff policy and the single-shot timer
//! - **connection**: the per-socket state machine (owning loop + handle)
//! - **feeds**: market and user specialisations of a connection
//! - **registry**: composition-root owner of every feed

pub mod codec;
pub mod connection;
pub mod feeds;
pub mod messages;
pub mod reconnect;
pub mod registry;

pub use codec::{CodecError, Inbound, JsonCodec};
pub use connection::Connection;
pub use feeds::{MarketFeed, UserFeed};
pub use messages::{ControlError, ControlRequest, ControlResponse, Method};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectTimer};
pub use registry::{FeedRegistry, RegistryError};
