//! Domain Layer - Core stream types with no I/O.
//!
//! This layer contains the pure data model of the realtime client:
//! stream keys, decoded events, subscription bookkeeping and the
//! connection state machine's states.

/// Stream keys, stream types and the wire discriminant table.
pub mod stream;

/// Decoded market and user events.
pub mod event;

/// Subscription sets and consumer reference counting.
pub mod subscription;

/// Connection lifecycle states.
pub mod connection;
