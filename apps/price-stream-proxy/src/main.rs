//! Price Stream Proxy Binary
//!
//! Starts the price update fan-out gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_SERVICE_HOST`: Price service host (default: localhost)
//! - `PRICE_SERVICE_PORT`: Price service port (default: 4000)
//! - `PORT`: Gateway WebSocket/HTTP port (default: 6000)
//! - `PRICE_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `PRICE_PROXY_OUTBOX_CAPACITY`: Per-subscriber outbox capacity (default: 1000)
//! - `PRICE_PROXY_INTEREST_QUEUE_CAPACITY`: Outbound interest queue depth (default: 64)
//! - `PRICE_PROXY_RESYNC_INTERVAL_SECS`: Interest resync period (default: 5)
//! - `PRICE_PROXY_CONNECT_TIMEOUT_SECS`: Upstream connect timeout (default: 10)
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream-proxy)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream_proxy::infrastructure::telemetry;
use price_stream_proxy::{
    GatewayServer, GatewayState, GrpcPriceLink, HealthServer, HealthServerState, ProxyConfig,
    SubscriptionService, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Stream Proxy");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Open the shared upstream price stream
    let link = GrpcPriceLink::connect(&config.upstream)
        .await
        .context("failed to connect to price service")?;

    let service = SubscriptionService::start(
        Arc::new(link),
        (&config.subscriptions).into(),
        &shutdown_token,
    )
    .context("invalid subscription settings")?;

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Gateway
    let gateway_addr = SocketAddr::from(([0, 0, 0, 0], config.server.gateway_port));
    let gateway_state = Arc::new(GatewayState::new(
        Arc::clone(&service),
        shutdown_token.clone(),
    ));
    let gateway = GatewayServer::bind(gateway_addr, gateway_state)
        .await
        .context("failed to start gateway")?;
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "Gateway error");
        }
    });

    tracing::info!("Price stream proxy ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        service.shutdown().await;
        let _ = tokio::join!(gateway_task, health_task);
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Price stream proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        upstream = %config.upstream.endpoint(),
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        outbox_capacity = config.subscriptions.outbox_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        connect_timeout_secs = config.upstream.connect_timeout.as_secs(),
        interest_queue_capacity = config.upstream.interest_queue_capacity,
        resync_interval_secs = config.subscriptions.resync_interval.as_secs(),
        "Upstream tuning"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
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

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
