//! WebSocket Gateway
//!
//! Thin transport over the subscription service.
//!
//! # Endpoints
//!
//! - `GET /subscribe` - WebSocket; client frames are `{"names": [...]}`
//!   interest sets, server frames are one JSON `PriceUpdate` each
//! - `POST /prices/current` - Point-in-time snapshot for `{"names": [...]}`
//! - `POST /getCurrentPrices` - Same snapshot under the legacy gateway path

mod request;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use request::{InterestRequest, InterestRequestError, MAX_NAME_LEN, MIN_NAME_LEN};

use crate::application::services::SubscriptionService;
use crate::domain::streaming::{PriceUpdate, SubscriberId, Symbol};

/// How long a closing connection may spend flushing its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Gateway State
// =============================================================================

/// Shared state for the gateway handlers.
pub struct GatewayState {
    service: Arc<SubscriptionService>,
    shutdown: CancellationToken,
}

impl GatewayState {
    /// Create new gateway state.
    #[must_use]
    pub const fn new(service: Arc<SubscriptionService>, shutdown: CancellationToken) -> Self {
        Self { service, shutdown }
    }
}

// =============================================================================
// Gateway Server
// =============================================================================

/// WebSocket/HTTP gateway server.
pub struct GatewayServer {
    listener: TcpListener,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Bind the gateway to an address.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BindFailed` if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, state: Arc<GatewayState>) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(addr, e.to_string()))?;
        Ok(Self { listener, state })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServerFailed` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        self.listener
            .local_addr()
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))
    }

    /// Serve until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServerFailed` if the HTTP server fails.
    pub async fn run(self) -> Result<(), GatewayError> {
        let shutdown = self.state.shutdown.clone();
        let addr = self.local_addr()?;
        let app = router(self.state);

        tracing::info!(%addr, "Gateway listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/subscribe", get(subscribe_handler))
        .route("/prices/current", post(current_prices_handler))
        .route("/getCurrentPrices", post(current_prices_handler))
        .with_state(state)
}

// =============================================================================
// Snapshot Endpoint
// =============================================================================

/// Snapshot response body.
#[derive(Debug, Serialize)]
pub struct CurrentPricesResponse {
    /// Latest price per requested symbol the upstream knows about.
    pub prices: HashMap<Symbol, PriceUpdate>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn current_prices_handler(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let names = match InterestRequest::parse(&body) {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected snapshot request");
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };

    match state.service.current_prices(&names).await {
        Ok(prices) => (StatusCode::OK, Json(CurrentPricesResponse { prices })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Snapshot request failed");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

// =============================================================================
// WebSocket Endpoint
// =============================================================================

async fn subscribe_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayState>) {
    let (id, outbox) = match state.service.subscribe() {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Refusing WebSocket subscriber");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let stop_writer = state.shutdown.child_token();
    let mut writer = tokio::spawn(write_updates(sink, outbox, stop_writer.clone()));

    let writer_done = tokio::select! {
        () = read_requests(stream, id, &state) => false,
        _ = &mut writer => true,
    };

    state.service.unsubscribe(id).await;

    if !writer_done {
        stop_writer.cancel();
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }

    tracing::debug!(subscriber_id = %id, "WebSocket closed");
}

/// Apply client interest requests until the client goes away, sends an
/// invalid request, or the gateway shuts down.
async fn read_requests(
    mut stream: SplitStream<WebSocket>,
    id: SubscriberId,
    state: &GatewayState,
) {
    loop {
        let message = tokio::select! {
            () = state.shutdown.cancelled() => return,
            message = stream.next() => message,
        };

        let parsed = match message {
            Some(Ok(Message::Text(text))) => InterestRequest::parse(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => InterestRequest::parse(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                tracing::debug!(subscriber_id = %id, error = %e, "WebSocket read failed");
                return;
            }
        };

        let names = match parsed {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(subscriber_id = %id, error = %e, "Invalid interest request");
                return;
            }
        };

        if let Err(e) = state
            .service
            .update_interest(id, names.into_iter().collect())
            .await
        {
            tracing::warn!(subscriber_id = %id, error = %e, "Interest update rejected");
            return;
        }
    }
}

/// Forward outbox updates to the client as JSON text frames.
async fn write_updates(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<PriceUpdate>,
    stop: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            update = outbox.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        let json = match serde_json::to_string(&update) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize price update");
                continue;
            }
        };

        if sink.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
