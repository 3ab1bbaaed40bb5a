//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the services consumers interact with and the port
//! interfaces that connect them to the infrastructure.

/// Port interfaces for external systems (sockets, feeds).
pub mod ports;

/// Application services for event fan-out and consumer lifecycles.
pub mod services;
