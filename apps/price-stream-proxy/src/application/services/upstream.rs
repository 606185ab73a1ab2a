//! Upstream Link State
//!
//! Counters and flags describing the shared price link, updated by the
//! fan-out loop and the subscription service and read by the health server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::subscription::DeliveryReport;

/// Tracks the state of the upstream price link.
#[derive(Debug, Default)]
pub struct UpstreamState {
    connected: AtomicBool,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    fault: RwLock<Option<String>>,
    resync_pending: AtomicBool,
    batches_received: AtomicU64,
    updates_received: AtomicU64,
    updates_delivered: AtomicU64,
    deliveries_deferred: AtomicU64,
    interest_pushes: AtomicU64,
    interest_push_failures: AtomicU64,
}

impl UpstreamState {
    /// Create a disconnected state with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the link as connected.
    pub fn set_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        *self.connected_at.write() = Some(Utc::now());
    }

    /// Record a fatal link failure. Only the first reason is kept.
    ///
    /// Returns `false` if the link was already faulted.
    pub fn set_faulted(&self, reason: impl Into<String>) -> bool {
        let mut fault = self.fault.write();
        if fault.is_some() {
            return false;
        }
        *fault = Some(reason.into());
        self.connected.store(false, Ordering::Relaxed);
        true
    }

    /// Whether the link is connected and healthy.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// The recorded fault reason, if any.
    #[must_use]
    pub fn fault_reason(&self) -> Option<String> {
        self.fault.read().clone()
    }

    /// Whether a fatal failure has been recorded.
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.fault.read().is_some()
    }

    /// Whether the last interest push failed and a resync is due.
    #[must_use]
    pub fn resync_pending(&self) -> bool {
        self.resync_pending.load(Ordering::Relaxed)
    }

    /// Record one received batch and its delivery outcome.
    pub fn record_batch(&self, updates: usize, report: DeliveryReport) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.updates_received.fetch_add(updates as u64, Ordering::Relaxed);
        self.updates_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.deliveries_deferred
            .fetch_add(report.deferred as u64, Ordering::Relaxed);
    }

    /// Record a successful interest push; clears any pending resync.
    pub fn record_push_ok(&self) {
        self.interest_pushes.fetch_add(1, Ordering::Relaxed);
        self.resync_pending.store(false, Ordering::Relaxed);
    }

    /// Record a failed interest push; a resync becomes pending.
    pub fn record_push_failure(&self) {
        self.interest_pushes.fetch_add(1, Ordering::Relaxed);
        self.interest_push_failures.fetch_add(1, Ordering::Relaxed);
        self.resync_pending.store(true, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> UpstreamStatus {
        UpstreamStatus {
            connected: self.is_connected(),
            connected_at: self.connected_at.read().map(|t| t.to_rfc3339()),
            faulted: self.fault_reason(),
            resync_pending: self.resync_pending(),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_delivered: self.updates_delivered.load(Ordering::Relaxed),
            deliveries_deferred: self.deliveries_deferred.load(Ordering::Relaxed),
            interest_pushes: self.interest_pushes.load(Ordering::Relaxed),
            interest_push_failures: self.interest_push_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`UpstreamState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpstreamStatus {
    /// Link connected and not faulted.
    pub connected: bool,
    /// When the link was connected (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    /// Fault reason, once faulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faulted: Option<String>,
    /// Last interest push failed.
    pub resync_pending: bool,
    /// Batches received.
    pub batches_received: u64,
    /// Updates received.
    pub updates_received: u64,
    /// Updates placed directly into outboxes.
    pub updates_delivered: u64,
    /// Updates handed to deferred sends.
    pub deliveries_deferred: u64,
    /// Interest pushes attempted.
    pub interest_pushes: u64,
    /// Interest pushes that failed.
    pub interest_push_failures: u64,
}
