//! Subscription Service
//!
//! The transport-facing API: `subscribe`, `update_interest`, `unsubscribe`.
//! Owns the registry, the upstream link, the fan-out loop and the interest
//! resync task.
//!
//! Lock order is sessions, then registry. Every registry mutation happens
//! while the session table is locked, so a subscriber can never be
//! re-registered after it was unsubscribed or the service faulted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::{PriceLink, PriceLinkError};
use crate::application::services::fanout::run_fanout;
use crate::application::services::upstream::{UpstreamState, UpstreamStatus};
use crate::domain::streaming::{PriceUpdate, SubscriberId, Symbol};
use crate::domain::subscription::{Outbox, SubscriptionRegistry};
use crate::infrastructure::metrics::{self, PushResult};

// =============================================================================
// Errors
// =============================================================================

/// Subscription service error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The id was never issued or is already unsubscribed.
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(SubscriberId),

    /// The upstream link failed; the service accepts no more work.
    #[error("Subscription service faulted: {0}")]
    ServiceFaulted(String),

    /// The service is shutting down.
    #[error("Subscription service is shutting down")]
    ShuttingDown,

    /// The configuration cannot run a service.
    #[error("Invalid subscription service config: {0}")]
    InvalidConfig(&'static str),
}

// =============================================================================
// Configuration
// =============================================================================

/// Subscription service configuration.
#[derive(Debug, Clone)]
pub struct SubscriptionServiceConfig {
    /// Capacity of every subscriber outbox.
    pub outbox_capacity: usize,
    /// Period of the interest resync task.
    pub resync_interval: Duration,
}

impl Default for SubscriptionServiceConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 1000,
            resync_interval: Duration::from_secs(5),
        }
    }
}

impl SubscriptionServiceConfig {
    /// Check that outboxes can hold an update and the resync ticker can tick.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero outbox capacity or resync interval.
    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.outbox_capacity == 0 {
            return Err(SubscriptionError::InvalidConfig("outbox capacity must be non-zero"));
        }
        if self.resync_interval.is_zero() {
            return Err(SubscriptionError::InvalidConfig("resync interval must be non-zero"));
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Service statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    /// Connected subscribers, with or without interest.
    pub subscribers: usize,
    /// Subscribers watching at least one symbol.
    pub active_subscribers: usize,
    /// Symbols with at least one subscriber.
    pub watched_symbols: usize,
    /// Deferred deliveries still in flight.
    pub pending_deferred: usize,
    /// Upstream link status.
    pub upstream: UpstreamStatus,
}

// =============================================================================
// Subscription Service
// =============================================================================

/// Fans one upstream price stream out to many subscribers.
pub struct SubscriptionService {
    registry: Arc<SubscriptionRegistry>,
    link: Arc<dyn PriceLink>,
    sessions: Mutex<HashMap<SubscriberId, Outbox>>,
    push_lock: tokio::sync::Mutex<()>,
    upstream: Arc<UpstreamState>,
    config: SubscriptionServiceConfig,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("registry", &self.registry)
            .field("upstream", &self.upstream)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubscriptionService {
    /// Start the service over a connected link.
    ///
    /// Spawns the fan-out loop and the resync task. Both stop when `shutdown`
    /// is cancelled or the service faults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation; nothing is
    /// spawned in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(
        link: Arc<dyn PriceLink>,
        config: SubscriptionServiceConfig,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>, SubscriptionError> {
        config.validate()?;

        let upstream = Arc::new(UpstreamState::new());
        upstream.set_connected();

        let service = Arc::new(Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            link,
            sessions: Mutex::new(HashMap::new()),
            push_lock: tokio::sync::Mutex::new(()),
            upstream,
            config,
            cancel: shutdown.child_token(),
            tasks: TaskTracker::new(),
        });

        let fanout = Arc::clone(&service);
        service.tasks.spawn(async move {
            let result = run_fanout(
                fanout.link.as_ref(),
                &fanout.registry,
                &fanout.upstream,
                &fanout.cancel,
            )
            .await;

            if let Err(e) = result {
                fanout.fault(&e);
            }
        });

        let resync = Arc::clone(&service);
        service.tasks.spawn(async move { resync.run_resync().await });

        tracing::info!(
            outbox_capacity = service.config.outbox_capacity,
            resync_interval_secs = service.config.resync_interval.as_secs(),
            "Subscription service started"
        );

        Ok(service)
    }

    /// Register a new subscriber with an empty interest set.
    ///
    /// # Errors
    ///
    /// Fails when the service has faulted or is shutting down.
    pub fn subscribe(
        &self,
    ) -> Result<(SubscriberId, mpsc::Receiver<PriceUpdate>), SubscriptionError> {
        let mut sessions = self.sessions.lock();
        self.ensure_accepting()?;

        let id = SubscriberId::generate();
        let (outbox, rx) = Outbox::channel(self.config.outbox_capacity, self.cancel.child_token());
        sessions.insert(id, outbox);

        metrics::set_subscribers(sessions.len());
        tracing::info!(subscriber_id = %id, subscribers = sessions.len(), "Subscriber registered");

        Ok((id, rx))
    }

    /// Replace a subscriber's interest set and push the new union upstream.
    ///
    /// An upstream push failure does not fail the call; the registry already
    /// reflects the request and the resync task retries the push.
    ///
    /// # Errors
    ///
    /// Fails with `UnknownSubscriber` if the id is not registered, or when
    /// the service has faulted.
    pub async fn update_interest(
        &self,
        id: SubscriberId,
        symbols: HashSet<Symbol>,
    ) -> Result<(), SubscriptionError> {
        {
            let sessions = self.sessions.lock();
            self.ensure_accepting()?;
            let outbox = sessions
                .get(&id)
                .ok_or(SubscriptionError::UnknownSubscriber(id))?;
            self.registry.set_interest(id, outbox, &symbols);
        }

        tracing::debug!(subscriber_id = %id, symbols = symbols.len(), "Interest updated");

        self.push_interest().await;
        Ok(())
    }

    /// Unregister a subscriber and close its outbox.
    ///
    /// Unknown or already removed ids are a no-op.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let removed = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(&id);
            if removed.is_some() {
                self.registry.remove(id);
                metrics::set_subscribers(sessions.len());
            }
            removed
        };

        let Some(outbox) = removed else {
            return;
        };
        outbox.close();
        drop(outbox);

        tracing::info!(subscriber_id = %id, "Subscriber unregistered");

        if !self.upstream.is_faulted() && !self.cancel.is_cancelled() {
            self.push_interest().await;
        }
    }

    /// Fetch a point-in-time snapshot from the upstream service.
    ///
    /// # Errors
    ///
    /// Returns the link error if the snapshot call fails.
    pub async fn current_prices(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, PriceUpdate>, PriceLinkError> {
        self.link.current_prices(symbols).await
    }

    /// Current service statistics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let subscribers = self.sessions.lock().len();
        let registry = self.registry.stats();
        ServiceStats {
            subscribers,
            active_subscribers: registry.subscriber_count,
            watched_symbols: registry.symbol_count,
            pending_deferred: registry.pending_deferred,
            upstream: self.upstream.snapshot(),
        }
    }

    /// Symbols currently requested from upstream.
    #[must_use]
    pub fn watched_symbols(&self) -> BTreeSet<Symbol> {
        self.registry.list_watched_symbols()
    }

    /// Shared upstream link state.
    #[must_use]
    pub fn upstream(&self) -> Arc<UpstreamState> {
        Arc::clone(&self.upstream)
    }

    /// Stop background tasks and close every outbox.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let closed = self.close_all_sessions();
        tracing::info!(closed, "Subscription service stopped");
    }

    /// Resolves once the service faulted or was shut down.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn ensure_accepting(&self) -> Result<(), SubscriptionError> {
        if let Some(reason) = self.upstream.fault_reason() {
            return Err(SubscriptionError::ServiceFaulted(reason));
        }
        if self.cancel.is_cancelled() {
            return Err(SubscriptionError::ShuttingDown);
        }
        Ok(())
    }

    /// Recompute the interest set and push it. Pushes are serialized so the
    /// last one to reach the link is computed from the latest registry state.
    async fn push_interest(&self) {
        let _guard = self.push_lock.lock().await;

        let symbols = self.registry.list_watched_symbols();
        metrics::set_watched_symbols(symbols.len());

        match self.link.send_interest(&symbols).await {
            Ok(()) => {
                self.upstream.record_push_ok();
                metrics::record_interest_push(PushResult::Ok);
                tracing::debug!(symbols = symbols.len(), "Interest pushed upstream");
            }
            Err(e) => {
                self.upstream.record_push_failure();
                metrics::record_interest_push(PushResult::Error);
                tracing::warn!(error = %e, symbols = symbols.len(), "Interest push failed, resync pending");
            }
        }
    }

    async fn run_resync(&self) {
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.upstream.resync_pending() {
                tracing::debug!("Resyncing interest set");
                self.push_interest().await;
            }
        }
    }

    /// Enter the faulted state: reject new work and close every outbox.
    fn fault(&self, error: &PriceLinkError) {
        let drained = {
            let mut sessions = self.sessions.lock();
            if !self.upstream.set_faulted(error.to_string()) {
                return;
            }
            let drained: Vec<(SubscriberId, Outbox)> = sessions.drain().collect();
            for (id, _) in &drained {
                self.registry.remove(*id);
            }
            drained
        };

        tracing::error!(error = %error, closed = drained.len(), "Upstream link failed, subscription service faulted");

        for (_, outbox) in drained {
            outbox.close();
        }
        metrics::set_subscribers(0);
        metrics::set_watched_symbols(0);

        self.cancel.cancel();
    }

    fn close_all_sessions(&self) -> usize {
        let drained = {
            let mut sessions = self.sessions.lock();
            let drained: Vec<(SubscriberId, Outbox)> = sessions.drain().collect();
            for (id, _) in &drained {
                self.registry.remove(*id);
            }
            drained
        };

        for (_, outbox) in &drained {
            outbox.close();
        }
        metrics::set_subscribers(0);
        drained.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
