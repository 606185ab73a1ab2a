//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (fails once the service faulted)
//! - `GET /readyz` - Kubernetes readiness probe (checks the upstream link)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{SubscriptionService, UpstreamStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream price link status.
    pub upstream: UpstreamStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Connected subscribers.
    pub subscribers: usize,
    /// Subscribers watching at least one symbol.
    pub active_subscribers: usize,
    /// Symbols requested from upstream.
    pub watched_symbols: usize,
    /// Deferred deliveries in flight.
    pub pending_deferred: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    service: Arc<SubscriptionService>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, service: Arc<SubscriptionService>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.service.upstream().is_faulted() {
        (StatusCode::SERVICE_UNAVAILABLE, "FAULTED")
    } else {
        (StatusCode::OK, "OK")
    }
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let upstream = state.service.upstream();

    if upstream.is_connected() && !upstream.is_faulted() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stats = state.service.stats();
    let status = determine_health_status(&stats.upstream);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: stats.upstream,
        subscriptions: SubscriptionStatus {
            subscribers: stats.subscribers,
            active_subscribers: stats.active_subscribers,
            watched_symbols: stats.watched_symbols,
            pending_deferred: stats.pending_deferred,
        },
    }
}

fn determine_health_status(upstream: &UpstreamStatus) -> HealthStatus {
    if upstream.faulted.is_some() {
        HealthStatus::Unhealthy
    } else if !upstream.connected || upstream.resync_pending {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::SubscriptionServiceConfig;
    use crate::infrastructure::price_service::{InMemoryPriceLink, PriceFeedHandle};

    fn test_state() -> (Arc<HealthServerState>, PriceFeedHandle, Arc<SubscriptionService>) {
        let (link, handle) = InMemoryPriceLink::channel();
        let service = SubscriptionService::start(
            Arc::new(link),
            SubscriptionServiceConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        let state = Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            Arc::clone(&service),
        ));
        (state, handle, service)
    }

    async fn get_status(state: Arc<HealthServerState>, uri: &str) -> StatusCode {
        router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    async fn wait_for_fault(service: &SubscriptionService) {
        tokio::time::timeout(Duration::from_secs(1), service.stopped())
            .await
            .expect("service never faulted");
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_connected() {
        let status = UpstreamStatus {
            connected: true,
            ..UpstreamStatus::default()
        };
        assert_eq!(determine_health_status(&status), HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_resync_pending() {
        let status = UpstreamStatus {
            connected: true,
            resync_pending: true,
            ..UpstreamStatus::default()
        };
        assert_eq!(determine_health_status(&status), HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_not_connected() {
        assert_eq!(
            determine_health_status(&UpstreamStatus::default()),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn determine_status_faulted() {
        let status = UpstreamStatus {
            faulted: Some("stream reset".to_string()),
            ..UpstreamStatus::default()
        };
        assert_eq!(determine_health_status(&status), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn probes_ok_while_connected() {
        let (state, _handle, _service) = test_state();

        assert_eq!(get_status(Arc::clone(&state), "/health").await, StatusCode::OK);
        assert_eq!(get_status(Arc::clone(&state), "/healthz").await, StatusCode::OK);
        assert_eq!(get_status(state, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn probes_fail_after_fault() {
        let (state, handle, service) = test_state();
        handle.fail("stream reset");
        wait_for_fault(&service).await;

        assert_eq!(
            get_status(Arc::clone(&state), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(Arc::clone(&state), "/healthz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(state, "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn health_body_reports_subscriptions() {
        let (state, _handle, service) = test_state();
        let (_id, _rx) = service.subscribe().unwrap();

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.version, "0.1.0");
        assert_eq!(response.subscriptions.subscribers, 1);
        assert_eq!(response.subscriptions.watched_symbols, 0);
    }
}
