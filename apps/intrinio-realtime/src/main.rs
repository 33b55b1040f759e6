//! Intrinio Realtime Binary
//!
//! Connects to the Intrinio realtime feed, joins the configured channels and
//! logs every quote until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin intrinio-realtime
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `INTRINIO_USERNAME`: Feed API username
//! - `INTRINIO_PASSWORD`: Feed API password
//!
//! ## Optional
//! - `INTRINIO_CHANNELS`: Comma-separated channels joined at startup (e.g. `AAPL,MSFT`)
//! - `INTRINIO_HOST`: Feed host (default: realtime.intrinio.com)
//! - `INTRINIO_PORT`: Feed port (default: 443)
//! - `INTRINIO_TLS`: Use https/wss (default: true)
//! - `INTRINIO_HEARTBEAT_INTERVAL_SECS`: Heartbeat period (default: 20)
//! - `INTRINIO_TOKEN_RENEWAL_INTERVAL_SECS`: Token renewal period (default: 604800)
//! - `INTRINIO_SELF_HEAL_BACKOFF_MS`: Retry delays, last one non-zero (default: 0,100,500,1000,2000,5000)
//! - `INTRINIO_CONNECT_TIMEOUT_SECS`: WebSocket handshake timeout (default: 30)
//! - `INTRINIO_METRICS_PORT`: Prometheus exporter port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;

use intrinio_realtime::infrastructure::telemetry;
use intrinio_realtime::{
    AppConfig, ClientError, ConnectionManager, HttpTokenProvider, QuoteSubscription,
    TungsteniteTransport, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Intrinio realtime client");

    let config = AppConfig::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        init_metrics(config.metrics_port)?;
    }

    let auth = HttpTokenProvider::from_config(&config.client)?;
    let manager = ConnectionManager::start(config.client, auth, TungsteniteTransport::new()).await?;

    tokio::spawn(log_quotes(manager.subscribe_all()));
    tokio::spawn(log_errors(manager.errors()));

    if config.channels.is_empty() {
        tracing::warn!("No channels configured; set INTRINIO_CHANNELS to receive quotes");
    } else {
        manager.join(&config.channels).await?;
    }

    tracing::info!(state = %manager.state(), "Client ready");

    await_shutdown().await;

    manager.shutdown().await;

    tracing::info!("Client stopped");
    Ok(())
}

/// Log every routed quote.
async fn log_quotes(mut quotes: QuoteSubscription) {
    while let Some(quote) = quotes.recv().await {
        tracing::info!(
            ticker = %quote.ticker,
            quote_type = %quote.quote_type,
            price = %quote.price,
            size = %quote.size,
            timestamp = quote.timestamp,
            "Quote"
        );
    }
}

/// Log errors reported by the connection manager.
async fn log_errors(mut errors: broadcast::Receiver<Arc<ClientError>>) {
    loop {
        match errors.recv().await {
            Ok(error) => tracing::error!(kind = error.kind(), error = %error, "Feed error"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Error listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
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
fn log_config(config: &AppConfig) {
    tracing::info!(
        host = %config.client.endpoint.host,
        port = config.client.endpoint.port,
        tls = config.client.endpoint.tls,
        channels = config.channels.len(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_secs = config.client.heartbeat_interval.as_secs(),
        token_renewal_secs = config.client.token_renewal_interval.as_secs(),
        backoff = ?config.client.self_heal_backoff,
        max_chunk_size = config.client.max_chunk_size,
        "Client settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
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
}
