//! Fan-out Loop
//!
//! Reads batches from the upstream link and hands every update to the
//! registry in batch order. Receiving is the loop's only suspension point;
//! delivery for a batch completes before the next batch is requested, so
//! updates for one symbol reach each subscriber in upstream order.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceLink, PriceLinkError};
use crate::application::services::upstream::UpstreamState;
use crate::domain::streaming::PriceUpdate;
use crate::domain::subscription::{DeliveryReport, SubscriptionRegistry};
use crate::infrastructure::metrics;

/// Deliver every update of a batch, in order.
pub fn fan_out_batch(registry: &SubscriptionRegistry, batch: &[PriceUpdate]) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for update in batch {
        report.merge(registry.deliver(update));
    }
    report
}

/// Run the fan-out loop until cancelled or the link fails.
///
/// # Errors
///
/// Returns the link error that ended the loop. Cancellation returns `Ok`.
pub async fn run_fanout(
    link: &dyn PriceLink,
    registry: &SubscriptionRegistry,
    upstream: &UpstreamState,
    cancel: &CancellationToken,
) -> Result<(), PriceLinkError> {
    tracing::info!("Fan-out loop started");

    loop {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("Fan-out loop stopped");
                return Ok(());
            }
            result = link.receive_batch() => result?,
        };

        let started = Instant::now();
        let report = fan_out_batch(registry, &batch);

        upstream.record_batch(batch.len(), report);
        metrics::record_batch_received(batch.len());
        metrics::record_delivery(report);
        metrics::set_pending_deferred(registry.pending_deferred());
        metrics::record_fanout_duration(started.elapsed());

        tracing::trace!(
            updates = batch.len(),
            delivered = report.delivered,
            deferred = report.deferred,
            "Batch fanned out"
        );
    }
}
