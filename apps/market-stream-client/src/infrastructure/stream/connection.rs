//! Feed Connection
//!
//! Owns at most one physical socket and drives the connection state machine.
//!
//! All state lives in a single tokio task (the owning loop). [`Connection`]
//! is a cheap handle: every method enqueues a command on the loop's
//! single-consumer queue and returns immediately, so calls from any thread
//! are applied one at a time, in call order.
//!
//! # Lifecycle
//!
//! - `connect` opens a socket unless one is open or being opened. On Open the
//!   whole subscription set is replayed as one batched SUBSCRIBE.
//! - A transport error or peer close moves to `Closed`, then either arms the
//!   reconnect timer (`Reconnecting`) or, once the attempt budget is spent,
//!   stops in `Failed`.
//! - `disconnect` cancels the timer, closes the socket and clears the
//!   subscription set. A transient close keeps the set for replay.
//!
//! The loop exits once every handle has been dropped.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, OptionFuture};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::application::ports::{FrameSink, FrameStream, SharedTransport, Socket, TransportError};
use crate::application::services::dispatcher::Dispatcher;
use crate::domain::connection::ConnectionState;
use crate::domain::stream::{Scope, StreamKey, WrongScope};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::codec::{Inbound, JsonCodec};
use crate::infrastructure::stream::messages::ControlRequest;
use crate::infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectTimer};

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    Subscribe(StreamKey),
    Unsubscribe(StreamKey),
    ListSubscriptions,
    Snapshot(oneshot::Sender<Vec<StreamKey>>),
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Handle to one feed connection.
///
/// Clones share the same owning loop.
#[derive(Debug, Clone)]
pub struct Connection {
    scope: Scope,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Spawn the owning loop for a new connection in state `Idle`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        scope: Scope,
        transport: SharedTransport,
        dispatcher: Arc<Dispatcher>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let owning_loop = ConnectionLoop {
            scope,
            transport,
            dispatcher,
            codec: JsonCodec::new(scope),
            policy: ReconnectPolicy::new(reconnect),
            timer: ReconnectTimer::new(),
            subscriptions: SubscriptionSet::new(),
            endpoint: None,
            connecting: None,
            sink: None,
            stream: None,
            state: state_tx,
            commands: command_rx,
        };
        let span = tracing::info_span!("connection", scope = %scope);
        tokio::spawn(owning_loop.run().instrument(span));

        Self {
            scope,
            commands: command_tx,
            state: state_rx,
        }
    }

    /// Open a socket to `endpoint` (no-op while `Connecting` or `Open`).
    ///
    /// Leaving `Failed` this way restores the full reconnect budget.
    pub fn connect(&self, endpoint: impl Into<String>) {
        self.send(Command::Connect(endpoint.into()));
    }

    /// Cancel any pending reconnect, close the socket and forget every
    /// subscription. Safe to call from any state, any number of times.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Add `key` to the subscription set, sending SUBSCRIBE if open.
    ///
    /// # Errors
    ///
    /// Returns an error, without touching the set, if `key` belongs to the
    /// other scope.
    pub fn subscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        key.ensure_scope(self.scope)?;
        self.send(Command::Subscribe(key));
        Ok(())
    }

    /// Remove `key` from the subscription set, sending UNSUBSCRIBE if open.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` belongs to the other scope.
    pub fn unsubscribe(&self, key: StreamKey) -> Result<(), WrongScope> {
        key.ensure_scope(self.scope)?;
        self.send(Command::Unsubscribe(key));
        Ok(())
    }

    /// Ask the server for its view of the subscriptions (if open).
    ///
    /// The reply is logged by the owning loop.
    pub fn request_subscription_list(&self) {
        self.send(Command::ListSubscriptions);
    }

    /// Current subscription set, in canonical key order.
    ///
    /// Reflects every call made on any handle before this one.
    pub async fn subscriptions(&self) -> Vec<StreamKey> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Scope this connection serves.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Whether two handles drive the same owning loop.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.commands.same_channel(&other.commands)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(scope = %self.scope, "Connection loop has stopped");
        }
    }
}

// =============================================================================
// Owning Loop
// =============================================================================

struct ConnectionLoop {
    scope: Scope,
    transport: SharedTransport,
    dispatcher: Arc<Dispatcher>,
    codec: JsonCodec,
    policy: ReconnectPolicy,
    timer: ReconnectTimer,
    subscriptions: SubscriptionSet,
    endpoint: Option<String>,
    connecting: Option<BoxFuture<'static, Result<Socket, TransportError>>>,
    sink: Option<FrameSink>,
    stream: Option<FrameStream>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(result) = OptionFuture::from(self.connecting.as_mut()) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                Some(frame) = OptionFuture::from(self.stream.as_mut().map(|s| s.next())) => {
                    self.on_frame(frame).await;
                }
                () = &mut self.timer => self.on_timer(),
            }
        }

        tracing::debug!("All handles dropped, stopping connection loop");
        self.close_socket().await;
        self.subscriptions_changed(-count(self.subscriptions.len()));
        self.set_state(ConnectionState::Closed);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(endpoint) => self.connect(endpoint),
            Command::Disconnect => self.disconnect().await,
            Command::Subscribe(key) => self.subscribe(key).await,
            Command::Unsubscribe(key) => self.unsubscribe(key).await,
            Command::ListSubscriptions => {
                if self.is_open() {
                    self.send_request(ControlRequest::list_subscriptions()).await;
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.subscriptions.to_vec());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn connect(&mut self, endpoint: String) {
        let state = *self.state.borrow();
        if state.is_active() {
            tracing::debug!(%state, "Connect ignored");
            return;
        }
        if state.is_failed() {
            self.policy.reset();
        }

        self.timer.cancel();
        self.start_connecting(endpoint);
    }

    async fn disconnect(&mut self) {
        self.timer.cancel();
        self.connecting = None;
        self.close_socket().await;
        self.policy.reset();

        let cleared = self.subscriptions.len();
        self.subscriptions.clear();
        self.subscriptions_changed(-count(cleared));

        self.set_state(ConnectionState::Closed);
        tracing::info!(cleared, "Disconnected");
    }

    async fn subscribe(&mut self, key: StreamKey) {
        if !self.subscriptions.insert(key.clone()) {
            tracing::debug!(stream = %key, "Already subscribed");
            return;
        }
        self.subscriptions_changed(1);

        if self.is_open() && !key.is_implicit() {
            self.send_request(ControlRequest::subscribe(vec![key.to_string()]))
                .await;
        }
    }

    async fn unsubscribe(&mut self, key: StreamKey) {
        if !self.subscriptions.remove(&key) {
            tracing::debug!(stream = %key, "Not subscribed");
            return;
        }
        self.subscriptions_changed(-1);

        if self.is_open() && !key.is_implicit() {
            self.send_request(ControlRequest::unsubscribe(vec![key.to_string()]))
                .await;
        }
    }

    // -------------------------------------------------------------------------
    // Socket Events
    // -------------------------------------------------------------------------

    fn start_connecting(&mut self, endpoint: String) {
        tracing::info!(%endpoint, "Connecting");

        let transport = Arc::clone(&self.transport);
        let target = endpoint.clone();
        self.connecting = Some(Box::pin(async move { transport.open(&target).await }));
        self.endpoint = Some(endpoint);
        self.set_state(ConnectionState::Connecting);
    }

    async fn on_connect_result(&mut self, result: Result<Socket, TransportError>) {
        match result {
            Ok(Socket { sink, stream }) => {
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.policy.reset();
                self.set_state(ConnectionState::Open);

                let params = self.subscriptions.replay_params();
                if !params.is_empty() {
                    tracing::info!(streams = params.len(), "Replaying subscriptions");
                    self.send_request(ControlRequest::subscribe(params)).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connection attempt failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<String, TransportError>>) {
        match frame {
            Some(Ok(text)) => self.handle_text(&text),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Socket error");
                self.on_socket_lost().await;
            }
            None => {
                tracing::info!("Socket closed by peer");
                self.on_socket_lost().await;
            }
        }
    }

    fn on_timer(&mut self) {
        match self.endpoint.clone() {
            Some(endpoint) => self.start_connecting(endpoint),
            None => self.set_state(ConnectionState::Idle),
        }
    }

    fn handle_text(&self, text: &str) {
        let started = Instant::now();
        metrics::record_frame_received(self.scope);

        match self.codec.decode(text) {
            Ok(Inbound::Event(event)) => {
                let report = self.dispatcher.dispatch(&event);
                if report.failed > 0 {
                    metrics::record_handler_errors(self.scope, count_u64(report.failed));
                }
                tracing::trace!(
                    stream_type = %event.stream_type,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Event dispatched"
                );
            }
            Ok(Inbound::Control(response)) => match &response.error {
                Some(error) => tracing::warn!(
                    id = response.id,
                    code = error.code,
                    msg = %error.msg,
                    "Control request rejected"
                ),
                None => tracing::debug!(
                    id = response.id,
                    streams = ?response.listed_streams(),
                    "Control request acknowledged"
                ),
            },
            Err(e) => {
                metrics::record_decode_error(self.scope, e.label());
                tracing::warn!(error = %e, frame = %preview(text), "Dropping undecodable frame");
            }
        }

        metrics::record_dispatch_duration(self.scope, started.elapsed());
    }

    async fn on_socket_lost(&mut self) {
        self.close_socket().await;
        self.schedule_reconnect();
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn schedule_reconnect(&mut self) {
        self.set_state(ConnectionState::Closed);

        if let Some(delay) = self.policy.next_delay() {
            metrics::record_reconnect(self.scope);
            tracing::info!(
                attempt = self.policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Scheduling reconnect"
            );
            self.timer.schedule(delay);
            self.set_state(ConnectionState::Reconnecting);
        } else {
            metrics::record_connection_failed(self.scope);
            tracing::error!(
                attempts = self.policy.attempt_count(),
                "Reconnect attempts exhausted, connection failed"
            );
            self.set_state(ConnectionState::Failed);
        }
    }

    async fn send_request(&mut self, request: ControlRequest) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let text = match self.codec.encode(&request) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode control request");
                return;
            }
        };

        tracing::debug!(
            id = request.id,
            method = request.method.as_str(),
            params = ?request.params,
            "Sending control request"
        );

        let sent = sink.send(text).await;
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Failed to send control request");
            self.on_socket_lost().await;
        }
    }

    async fn close_socket(&mut self) {
        self.stream = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing socket");
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }

        if next == ConnectionState::Open {
            metrics::record_connection_opened(self.scope);
        } else if previous == ConnectionState::Open {
            metrics::record_connection_closed(self.scope);
        }

        tracing::info!(from = %previous, to = %next, "Connection state changed");
    }

    fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open
    }

    fn subscriptions_changed(&self, delta: i64) {
        if delta != 0 {
            metrics::record_subscriptions_changed(self.scope, delta);
        }
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn count_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

// =============================================================================
// Tests
// =============================================================================
