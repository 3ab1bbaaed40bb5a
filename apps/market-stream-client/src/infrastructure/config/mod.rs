//! Configuration Module
//!
//! Configuration loading for the stream client.

mod settings;

pub use settings::{
    ChainEndpoints, ChainId, ClientConfig, ConfigError, ConnectionSettings, WatchSettings,
};
