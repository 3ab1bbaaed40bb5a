//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of frames received and decode failures by scope
//! - **Connections**: Open feed connections and reconnect activity
//! - **Subscriptions**: Stream keys held across all connections
//! - **Dispatch**: Handler failures and dispatch latency
//!
//! # Integration
//!
//! The binary serves `/metrics` on `STREAM_CLIENT_METRICS_PORT`. Library
//! users install their own recorder; without one every call is a no-op.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::stream::Scope;

// =============================================================================
// Exporter
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called from within a tokio runtime. Subsequent calls are no-ops
/// that return the first listener address.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = INSTALLED.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(*INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_client_frames_received_total",
        "Total text frames received from feed sockets"
    );
    describe_counter!(
        "stream_client_decode_errors_total",
        "Total frames dropped because they could not be decoded"
    );
    describe_counter!(
        "stream_client_handler_errors_total",
        "Total consumer handler failures (errors and panics)"
    );

    describe_gauge!(
        "stream_client_connections_open",
        "Number of open feed connections"
    );
    describe_gauge!(
        "stream_client_subscriptions",
        "Number of stream keys held across feed connections"
    );

    describe_counter!(
        "stream_client_reconnects_total",
        "Total reconnect attempts scheduled"
    );
    describe_counter!(
        "stream_client_connection_failures_total",
        "Total connections that exhausted their reconnect budget"
    );

    describe_histogram!(
        "stream_client_dispatch_seconds",
        "Time to decode and dispatch one frame to all handlers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received on a feed.
pub fn record_frame_received(scope: Scope) {
    counter!(
        "stream_client_frames_received_total",
        "scope" => scope.as_str()
    )
    .increment(1);
}

/// Record a dropped frame.
pub fn record_decode_error(scope: Scope, error_type: &'static str) {
    counter!(
        "stream_client_decode_errors_total",
        "scope" => scope.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record failed handler invocations.
pub fn record_handler_errors(scope: Scope, count: u64) {
    counter!(
        "stream_client_handler_errors_total",
        "scope" => scope.as_str()
    )
    .increment(count);
}

/// Record a connection reaching Open.
pub fn record_connection_opened(scope: Scope) {
    gauge!(
        "stream_client_connections_open",
        "scope" => scope.as_str()
    )
    .increment(1.0);
}

/// Record a connection leaving Open.
pub fn record_connection_closed(scope: Scope) {
    gauge!(
        "stream_client_connections_open",
        "scope" => scope.as_str()
    )
    .decrement(1.0);
}

/// Adjust the subscription gauge by `delta` keys.
#[allow(clippy::cast_precision_loss)]
pub fn record_subscriptions_changed(scope: Scope, delta: i64) {
    gauge!(
        "stream_client_subscriptions",
        "scope" => scope.as_str()
    )
    .increment(delta as f64);
}

/// Record a scheduled reconnect attempt.
pub fn record_reconnect(scope: Scope) {
    counter!(
        "stream_client_reconnects_total",
        "scope" => scope.as_str()
    )
    .increment(1);
}

/// Record a connection entering the terminal Failed state.
pub fn record_connection_failed(scope: Scope) {
    counter!(
        "stream_client_connection_failures_total",
        "scope" => scope.as_str()
    )
    .increment(1);
}

/// Record frame dispatch duration.
pub fn record_dispatch_duration(scope: Scope, duration: Duration) {
    histogram!(
        "stream_client_dispatch_seconds",
        "scope" => scope.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
