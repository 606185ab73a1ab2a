//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Batches and updates received from the price service
//! - **Delivery**: Fast-path and deferred deliveries into subscriber outboxes
//! - **Subscriptions**: Connected subscribers and watched symbols
//! - **Interest**: Interest-set pushes to the price service
//! - **Latency**: Per-batch fan-out duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until a recorder is installed.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::DeliveryReport;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; later calls return the first handle.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream counters
    describe_counter!(
        "price_proxy_batches_received_total",
        "Total batches received from the price service"
    );
    describe_counter!(
        "price_proxy_updates_received_total",
        "Total price updates received from the price service"
    );

    // Delivery counters
    describe_counter!(
        "price_proxy_updates_delivered_total",
        "Total updates placed directly into subscriber outboxes"
    );
    describe_counter!(
        "price_proxy_deliveries_deferred_total",
        "Total updates handed to a deferred send because the outbox was full"
    );
    describe_gauge!(
        "price_proxy_pending_deferred_deliveries",
        "Deferred sends still waiting on a full outbox"
    );

    // Subscription gauges
    describe_gauge!(
        "price_proxy_subscribers",
        "Number of connected subscribers"
    );
    describe_gauge!(
        "price_proxy_watched_symbols",
        "Number of symbols with at least one subscriber"
    );

    // Interest pushes
    describe_counter!(
        "price_proxy_interest_pushes_total",
        "Total interest-set pushes to the price service by result"
    );

    // Latency histograms
    describe_histogram!(
        "price_proxy_fanout_batch_seconds",
        "Time to fan out one upstream batch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for interest pushes.
#[derive(Debug, Clone, Copy)]
pub enum PushResult {
    /// Push accepted by the link.
    Ok,
    /// Push failed; a resync is pending.
    Error,
}

impl PushResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Record a batch received from the price service.
pub fn record_batch_received(updates: usize) {
    counter!("price_proxy_batches_received_total").increment(1);
    counter!("price_proxy_updates_received_total").increment(updates as u64);
}

/// Record the delivery outcome of one batch.
pub fn record_delivery(report: DeliveryReport) {
    counter!("price_proxy_updates_delivered_total").increment(report.delivered as u64);
    counter!("price_proxy_deliveries_deferred_total").increment(report.deferred as u64);
}

/// Update the in-flight deferred delivery gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_deferred(count: usize) {
    gauge!("price_proxy_pending_deferred_deliveries").set(count as f64);
}

/// Update the connected subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("price_proxy_subscribers").set(count as f64);
}

/// Update the watched symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_watched_symbols(count: usize) {
    gauge!("price_proxy_watched_symbols").set(count as f64);
}

/// Record an interest-set push.
pub fn record_interest_push(result: PushResult) {
    counter!(
        "price_proxy_interest_pushes_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record the time taken to fan out one batch.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("price_proxy_fanout_batch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
