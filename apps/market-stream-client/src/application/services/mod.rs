//! Application Services
//!
//! Services that sit between the connections and their consumers.
//!
//! - `Dispatcher`: delivers decoded events to every registered handler
//! - `ConsumerAdapter`: attach/detach lifecycle for one consumer of a feed

pub mod consumer;
pub mod dispatcher;

pub use consumer::ConsumerAdapter;
pub use dispatcher::{DispatchReport, Dispatcher, HandlerId};
