//! Market Stream Client Binary
//!
//! Connects to the configured market feed (and optionally one wallet's user
//! feed) and logs every event it receives.
//!
//! # Usage
//!
//! ```bash
//! STREAM_ENDPOINTS="56=wss://stream.example.com" cargo run --bin market-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_ENDPOINTS`: `chainId=baseUrl` pairs, comma separated
//!
//! ## Optional
//! - `STREAM_MARKET_CHAIN_ID`: Chain of the market feed (default: first chain)
//! - `STREAM_SYMBOLS`: Market symbols (default: btcusdc)
//! - `STREAM_TYPES`: Stream types per symbol (default: trade,miniTicker)
//! - `STREAM_WALLET`: Wallet whose user streams are logged
//! - `STREAM_CONNECT_TIMEOUT_MS`: Handshake timeout (default: 10000)
//! - `STREAM_RECONNECT_BASE_MS`: First reconnect delay (default: 3000)
//! - `STREAM_RECONNECT_FACTOR`: Backoff multiplier (default: 1.5)
//! - `STREAM_RECONNECT_MAX_DELAY_MS`: Delay cap (default: none)
//! - `STREAM_RECONNECT_JITTER`: Jitter factor 0.0-1.0 (default: 0.0)
//! - `STREAM_RECONNECT_MAX_ATTEMPTS`: Attempts before failing, 0 = unlimited (default: 5)
//! - `STREAM_CLIENT_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_stream_client::{
    ClientConfig, ConnectionState, ConsumerAdapter, Feed, FeedRegistry, MarketFeed, StreamEvent,
    StreamKey, StreamType, UserFeed, WatchSettings, WrongScope, WsTransport, init_metrics,
    init_telemetry,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Symbol used for wallet streams, which carry no market symbol of their own.
const USER_STREAM_SYMBOL: &str = "wallet";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fails only if another provider was installed first, which is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = init_telemetry()?;

    tracing::info!("Starting Market Stream Client");

    let config = ClientConfig::from_env()?;
    let watch_settings = WatchSettings::from_env()?;
    log_config(&config, &watch_settings);

    if watch_settings.metrics_port > 0 {
        let addr = init_metrics(watch_settings.metrics_port)?;
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let shutdown_token = CancellationToken::new();

    let transport = Arc::new(WsTransport::new(config.connection.connect_timeout));
    let registry = FeedRegistry::new(config.clone(), transport);

    // Market consumers
    let market = registry.market_feed();
    spawn_state_logger("market", market.connection().state_changes(), shutdown_token.clone());
    let market_keys = market_keys(&watch_settings)?;
    let market_consumers: Vec<ConsumerAdapter<MarketFeed>> = market_keys
        .into_iter()
        .map(|key| attach_logger(market.clone(), key))
        .collect::<Result<_, _>>()?;

    // User consumers
    let mut user_consumers: Vec<ConsumerAdapter<UserFeed>> = Vec::new();
    if let Some(wallet) = &watch_settings.wallet {
        let user = registry.user_feed(wallet, config.market_chain_id)?;
        spawn_state_logger("user", user.connection().state_changes(), shutdown_token.clone());
        for stream_type in [StreamType::ExecutionReport, StreamType::BalanceUpdate] {
            let key = StreamKey::new(USER_STREAM_SYMBOL, stream_type)?;
            user_consumers.push(attach_logger(user.clone(), key)?);
        }
    }

    tracing::info!("Market stream client ready");

    await_shutdown(shutdown_token).await;

    drop(market_consumers);
    drop(user_consumers);
    registry.shutdown();

    tracing::info!("Market stream client stopped");
    Ok(())
}

/// Build the `symbol@type` keys the market feed is watched with.
fn market_keys(settings: &WatchSettings) -> Result<Vec<StreamKey>, Box<dyn std::error::Error>> {
    let mut keys = Vec::with_capacity(settings.symbols.len() * settings.stream_types.len());
    for symbol in &settings.symbols {
        for stream_type in &settings.stream_types {
            keys.push(StreamKey::new(symbol, stream_type.parse()?)?);
        }
    }
    Ok(keys)
}

/// Attach a consumer that logs every event of `key`.
fn attach_logger<F: Feed>(feed: F, key: StreamKey) -> Result<ConsumerAdapter<F>, WrongScope> {
    let mut consumer = ConsumerAdapter::new(feed);
    let stream = key.to_string();
    consumer.attach(key, move |event: &StreamEvent| {
        tracing::info!(
            stream = %stream,
            event_type = event.event.event_type(),
            symbol = event.symbol().unwrap_or_default(),
            "Event"
        );
        Ok(())
    })?;
    Ok(consumer)
}

/// Log every connection state transition until shutdown.
fn spawn_state_logger(
    feed: &'static str,
    mut states: watch::Receiver<ConnectionState>,
    shutdown_token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown_token.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    match state {
                        ConnectionState::Failed => {
                            tracing::error!(feed, "Feed failed, reconnect attempts exhausted");
                        }
                        state => tracing::info!(feed, state = state.as_str(), "Feed state changed"),
                    }
                }
            }
        }
    });
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig, watch_settings: &WatchSettings) {
    tracing::info!(
        market_chain_id = config.market_chain_id,
        symbols = ?watch_settings.symbols,
        stream_types = ?watch_settings.stream_types,
        wallet = watch_settings.wallet.as_deref().unwrap_or("-"),
        metrics_port = watch_settings.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        market_url = %config.market_url().unwrap_or_default(),
        connect_timeout = ?config.connection.connect_timeout,
        reconnect = ?config.connection.reconnect,
        "Stream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
