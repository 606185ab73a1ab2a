#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Proxy - Price Update Fan-out Gateway
//!
//! Holds a single bidirectional stream to the upstream price service and
//! fans price updates out to many WebSocket subscribers. Each subscriber
//! replaces its set of watched symbols at will; the proxy keeps the
//! upstream interest set equal to the union of all of them.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data types and the subscription registry
//!   - `streaming`: Symbols, price updates, subscriber identity
//!   - `subscription`: Symbol → outbox registry with non-blocking delivery
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The upstream price link
//!   - `services`: Fan-out loop, subscription service, upstream state
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `price_service`: gRPC and in-memory price links
//!   - `gateway`: WebSocket subscribe endpoint and snapshot endpoint
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                     ┌──────────────┐   deliver   ┌──────────┐
//! Price service ─────►│ Fan-out loop │────────────►│ Registry │──► outbox 1 ──► WS client 1
//!   (GetPrices)       └──────────────┘             └──────────┘──► outbox N ──► WS client N
//!        ▲                                              │
//!        └─────────── interest set (union) ◄────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price types and the subscription registry.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{PriceUpdate, SubscriberId, Symbol};
pub use domain::subscription::{DeliveryReport, Outbox, RegistryStats, SubscriptionRegistry};

// Application
pub use application::ports::{PriceLink, PriceLinkError};
pub use application::services::{
    ServiceStats, SubscriptionError, SubscriptionService, SubscriptionServiceConfig,
    UpstreamState, UpstreamStatus,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ProxyConfig, ServerSettings, SubscriptionSettings, UpstreamSettings,
};

// Price links
pub use infrastructure::price_service::{GrpcPriceLink, InMemoryPriceLink, PriceFeedHandle};

// Gateway
pub use infrastructure::gateway::{
    GatewayError, GatewayServer, GatewayState, InterestRequest, InterestRequestError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
