//! Connection Lifecycle Integration Tests
//!
//! Tests subscription frames, replay after reconnect, the reconnect budget
//! and explicit disconnects against an in-process upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    accept, assert_closed_by_client, assert_silent, key, market_feed, next_control, next_event,
    user_feed, wait_for_state,
};
use market_stream_client::{ConnectionState, ConsumerAdapter, Feed, Scope, StreamType};

#[tokio::test]
async fn subscribe_and_unsubscribe_are_idempotent() {
    let (feed, _transport, mut server) = market_feed(5);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    feed.subscribe(key("ethusdc@trade")).unwrap();
    feed.subscribe(key("ETHUSDC@trade")).unwrap();
    feed.unsubscribe(key("btcusdc@trade")).unwrap();
    feed.unsubscribe(key("ethusdc@trade")).unwrap();
    feed.unsubscribe(key("ethusdc@trade")).unwrap();

    assert_eq!(
        next_control(&mut upstream).await,
        ("SUBSCRIBE".to_owned(), vec!["ethusdc@trade".to_owned()])
    );
    assert_eq!(
        next_control(&mut upstream).await,
        ("UNSUBSCRIBE".to_owned(), vec!["ethusdc@trade".to_owned()])
    );
    assert_silent(&mut upstream).await;
    assert!(feed.subscriptions().await.is_empty());
}

#[tokio::test]
async fn subscriptions_made_before_open_are_sent_on_open() {
    let (feed, _transport, mut server) = market_feed(5);
    feed.subscribe(key("ethusdc@depth")).unwrap();
    feed.subscribe(key("btcusdc@kline_1m")).unwrap();

    feed.connect();
    let mut upstream = accept(&mut server).await;

    let (method, params) = next_control(&mut upstream).await;
    assert_eq!(method, "SUBSCRIBE");
    assert_eq!(params, vec!["btcusdc@kline_1m", "ethusdc@depth"]);
    assert_silent(&mut upstream).await;
}

#[tokio::test]
async fn subscriptions_are_replayed_in_one_batch_after_reconnect() {
    let (feed, transport, mut server) = market_feed(5);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    feed.subscribe(key("ethusdc@trade")).unwrap();
    feed.subscribe(key("btcusdc@miniTicker")).unwrap();
    next_control(&mut upstream).await;
    next_control(&mut upstream).await;

    upstream.close();

    let mut upstream = accept(&mut server).await;
    let (method, params) = next_control(&mut upstream).await;
    assert_eq!(method, "SUBSCRIBE");
    assert_eq!(params, vec!["btcusdc@miniTicker", "ethusdc@trade"]);
    assert_silent(&mut upstream).await;

    assert_eq!(feed.subscriptions().await.len(), 2);
    assert_eq!(transport.open_count(), 2);
    assert_eq!(feed.state(), ConnectionState::Open);
}

#[tokio::test]
async fn keys_removed_while_down_are_not_replayed() {
    let (feed, transport, mut server) = market_feed(0);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    for stream in ["ethusdc@trade", "ethusdc@depth", "btcusdc@trade"] {
        feed.subscribe(key(stream)).unwrap();
        next_control(&mut upstream).await;
    }

    transport.set_available(false);
    upstream.close();
    wait_for_state(feed.connection(), ConnectionState::Reconnecting).await;

    feed.unsubscribe(key("ethusdc@depth")).unwrap();
    transport.set_available(true);

    let mut upstream = accept(&mut server).await;
    let (method, params) = next_control(&mut upstream).await;
    assert_eq!(method, "SUBSCRIBE");
    assert_eq!(params, vec!["btcusdc@trade", "ethusdc@trade"]);
    assert_silent(&mut upstream).await;
}

#[tokio::test]
async fn gives_up_after_max_attempts_until_explicit_connect() {
    let (feed, transport, mut server) = market_feed(5);
    transport.set_available(false);

    feed.connect();
    wait_for_state(feed.connection(), ConnectionState::Failed).await;

    // Initial attempt plus five reconnects.
    assert_eq!(transport.open_count(), 6);

    transport.set_available(true);
    feed.connect();
    accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;
    assert_eq!(transport.open_count(), 7);
}

#[tokio::test]
async fn budget_is_reset_by_a_successful_open() {
    let (feed, transport, mut server) = market_feed(1);
    feed.connect();
    let upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    // One reconnect allowed per outage.
    upstream.close();
    let upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    upstream.close();
    accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test]
async fn disconnect_clears_subscriptions() {
    let (feed, _transport, mut server) = market_feed(5);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    feed.subscribe(key("ethusdc@trade")).unwrap();
    next_control(&mut upstream).await;

    feed.disconnect();
    wait_for_state(feed.connection(), ConnectionState::Closed).await;
    assert_closed_by_client(&mut upstream).await;
    assert!(feed.subscriptions().await.is_empty());

    // Reconnecting after a disconnect starts from an empty set.
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;
    assert_silent(&mut upstream).await;

    feed.subscribe(key("btcusdc@depth")).unwrap();
    assert_eq!(
        next_control(&mut upstream).await,
        ("SUBSCRIBE".to_owned(), vec!["btcusdc@depth".to_owned()])
    );
    assert_eq!(feed.subscriptions().await, vec![key("btcusdc@depth")]);
}

#[tokio::test]
async fn disconnect_stops_pending_reconnects() {
    let (feed, transport, _server) = market_feed(0);
    transport.set_available(false);

    feed.connect();
    wait_for_state(feed.connection(), ConnectionState::Reconnecting).await;
    feed.disconnect();
    wait_for_state(feed.connection(), ConnectionState::Closed).await;

    let attempts = transport.open_count();
    tokio::time::sleep(common::QUIET).await;
    assert_eq!(transport.open_count(), attempts);
    assert_eq!(feed.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn connect_while_open_is_a_no_op() {
    let (feed, transport, mut server) = market_feed(5);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    feed.connect();
    feed.connection().request_subscription_list();

    let (method, _) = next_control(&mut upstream).await;
    assert_eq!(method, "LIST_SUBSCRIPTIONS");
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn user_streams_are_tracked_without_frames() {
    let (feed, _transport, mut server) = user_feed(5);
    let mut consumer = ConsumerAdapter::new(feed.clone());
    let mut events = consumer.attach_channel(key("0xabc@executionReport")).unwrap();

    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;
    assert_silent(&mut upstream).await;
    assert_eq!(feed.subscriptions().await, vec![key("0xabc@executionReport")]);

    assert!(upstream.send_frame(common::execution_report_frame("ETHUSDC")));
    let event = next_event(&mut events).await;
    assert_eq!(event.stream_type, StreamType::ExecutionReport);
    assert_eq!(event.symbol(), Some("ETHUSDC"));

    consumer.detach();
    assert_silent(&mut upstream).await;
}

#[tokio::test]
async fn keys_of_the_other_scope_are_rejected() {
    let (feed, _transport, mut server) = market_feed(5);
    feed.connect();
    let mut upstream = accept(&mut server).await;
    wait_for_state(feed.connection(), ConnectionState::Open).await;

    let err = feed.subscribe(key("0xabc@balanceUpdate")).unwrap_err();
    assert_eq!(err.expected, Scope::Market);
    feed.subscribe(key("ethusdc@trade")).unwrap();

    assert_eq!(
        next_control(&mut upstream).await,
        ("SUBSCRIBE".to_owned(), vec!["ethusdc@trade".to_owned()])
    );
    assert_silent(&mut upstream).await;
    assert_eq!(feed.subscriptions().await, vec![key("ethusdc@trade")]);
}

#[tokio::test]
async fn market_keys_on_a_user_feed_never_connect() {
    let (feed, transport, _server) = user_feed(5);
    let mut consumer = ConsumerAdapter::new(feed.clone());

    let err = consumer.attach_channel(key("ethusdc@trade")).unwrap_err();
    assert_eq!(err.expected, Scope::User);
    assert!(feed.subscribe(key("ethusdc@depth")).is_err());

    assert!(!consumer.is_attached());
    assert!(feed.subscriptions().await.is_empty());
    assert_eq!(feed.state(), ConnectionState::Idle);
    assert_eq!(transport.open_count(), 0);
}
