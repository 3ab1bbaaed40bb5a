//! Shared harness for the integration tests.
//!
//! Feeds run against the in-process [`ChannelTransport`], with the test
//! playing the upstream server through [`ServerConnection`].

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use market_stream_client::{
    ChainEndpoints, ChannelServer, ChannelTransport, ClientConfig, Connection, ConnectionSettings,
    ConnectionState, FeedRegistry, MarketFeed, ReconnectConfig, ServerConnection, StreamEvent,
    StreamKey, UserFeed,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long a socket must stay quiet to count as silent.
pub const QUIET: Duration = Duration::from_millis(100);

pub const MARKET_ENDPOINT: &str = "mem://bsc/ws";
pub const USER_ENDPOINT: &str = "mem://bsc/ws/0xabc";

/// Constant 10ms backoff with `max_attempts` attempts.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig::new(Duration::from_millis(10), None, 1.0, 0.0, max_attempts)
}

pub fn key(raw: &str) -> StreamKey {
    raw.parse().unwrap()
}

pub fn market_feed(max_attempts: u32) -> (MarketFeed, ChannelTransport, ChannelServer) {
    let (transport, server) = ChannelTransport::pair();
    let feed = MarketFeed::spawn(
        MARKET_ENDPOINT,
        Arc::new(transport.clone()),
        fast_reconnect(max_attempts),
    );
    (feed, transport, server)
}

pub fn user_feed(max_attempts: u32) -> (UserFeed, ChannelTransport, ChannelServer) {
    let (transport, server) = ChannelTransport::pair();
    let feed = UserFeed::spawn(
        "0xabc",
        56,
        USER_ENDPOINT,
        Arc::new(transport.clone()),
        fast_reconnect(max_attempts),
    );
    (feed, transport, server)
}

/// Registry over chains 56 (`mem://bsc`) and 97 (`mem://testnet`).
pub fn registry() -> (FeedRegistry, ChannelTransport, ChannelServer) {
    let endpoints = ChainEndpoints::new()
        .with_chain(56, "mem://bsc")
        .with_chain(97, "mem://testnet");
    let config = ClientConfig::new(endpoints, 56)
        .unwrap()
        .with_connection(ConnectionSettings {
            connect_timeout: WAIT,
            reconnect: fast_reconnect(5),
        });
    let (transport, server) = ChannelTransport::pair();
    let registry = FeedRegistry::new(config, Arc::new(transport.clone()));
    (registry, transport, server)
}

pub async fn accept(server: &mut ChannelServer) -> ServerConnection {
    timeout(WAIT, server.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Next control request the client sent, parsed.
pub async fn next_request(connection: &mut ServerConnection) -> Value {
    let frame = timeout(WAIT, connection.recv_frame())
        .await
        .expect("timed out waiting for a frame")
        .expect("client closed the socket");
    serde_json::from_str(&frame).unwrap()
}

/// Method and params of the next control request.
pub async fn next_control(connection: &mut ServerConnection) -> (String, Vec<String>) {
    let request = next_request(connection).await;
    let method = request["method"].as_str().unwrap().to_owned();
    let params = request["params"]
        .as_array()
        .map(|params| {
            params
                .iter()
                .map(|p| p.as_str().unwrap().to_owned())
                .collect()
        })
        .unwrap_or_default();
    (method, params)
}

/// Assert the client sends nothing for a short while.
pub async fn assert_silent(connection: &mut ServerConnection) {
    if let Ok(frame) = timeout(QUIET, connection.recv_frame()).await {
        panic!("expected no frame, got {frame:?}");
    }
}

/// Wait until the client closes the socket.
pub async fn assert_closed_by_client(connection: &mut ServerConnection) {
    let frame = timeout(WAIT, connection.recv_frame())
        .await
        .expect("timed out waiting for the client to close");
    assert_eq!(frame, None, "expected the socket to be closed");
}

pub async fn wait_for_state(connection: &Connection, expected: ConnectionState) {
    let mut states = connection.state_changes();
    let reached = timeout(WAIT, states.wait_for(|state| *state == expected)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "connection never reached {expected}, last state {}",
        connection.state()
    );
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

pub fn trade_frame(symbol: &str, trade_id: u64) -> String {
    format!(
        r#"{{"e":"trade","E":1700000000000,"s":"{symbol}","t":{trade_id},"p":"2011.50","q":"0.25","m":true}}"#
    )
}

pub fn mini_ticker_frame(symbol: &str) -> String {
    format!(
        r#"{{"e":"24hrMiniTicker","E":1700000000000,"s":"{symbol}","c":"2011.5","o":"1990","h":"2030","l":"1985.25","v":"812.4","q":"1630000"}}"#
    )
}

pub fn envelope(stream: &str, data: &str) -> String {
    format!(r#"{{"stream":"{stream}","data":{data}}}"#)
}

pub fn execution_report_frame(symbol: &str) -> String {
    format!(
        r#"{{"e":"executionReport","E":1700000000000,"s":"{symbol}","c":"abc","S":"BUY","o":"LIMIT","x":"TRADE","X":"FILLED","i":9,"p":"2000","q":"1","l":"1","L":"2000","z":"1"}}"#
    )
}

/// Read SUBSCRIBE frames until `count` streams were requested, in any
/// batching. Returns them sorted.
pub async fn subscribed_streams(connection: &mut ServerConnection, count: usize) -> Vec<String> {
    let mut streams = Vec::new();
    while streams.len() < count {
        let (method, params) = next_control(connection).await;
        assert_eq!(method, "SUBSCRIBE");
        streams.extend(params);
    }
    streams.sort();
    streams
}
