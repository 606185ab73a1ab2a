//! Subscription Registry
//!
//! The live many-to-many mapping between symbols and subscriber outboxes.
//!
//! # Design
//!
//! The registry tracks:
//! - For every symbol, the outboxes of the subscribers currently watching it
//! - For every subscriber, the symbols it currently watches (reverse index)
//!
//! All state sits behind a single reader/writer lock. Delivery and interest
//! listing take the read lock and run concurrently with each other; interest
//! changes and removals take the write lock. Fan-out is frequent and
//! subscription churn is rare, so the lock favours readers.
//!
//! Delivery never blocks: an update goes into the outbox with `try_send`,
//! and when the outbox is full a detached task finishes the send. That task
//! selects on the outbox's cancellation token, so it ends as soon as the
//! subscriber is unregistered or the service shuts down.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{PriceUpdate, SubscriberId, Symbol};

// =============================================================================
// Outbox
// =============================================================================

/// Write end of a subscriber's bounded outbox.
///
/// Cloning is cheap; every clone shares the same channel and cancellation
/// token. The channel closes once the registry, the owning session and any
/// in-flight deferred deliveries have all dropped their clones.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
}

impl Outbox {
    /// Create an outbox of the given capacity, returning the read end.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<PriceUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, cancel }, rx)
    }

    /// Stop every pending and future deferred delivery into this outbox.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the outbox was closed or its reader has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

// =============================================================================
// Delivery Report
// =============================================================================

/// Outcome of delivering one update to every subscriber of its symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Outboxes that accepted the update immediately.
    pub delivered: usize,
    /// Outboxes that were full; a detached task finishes the send.
    pub deferred: usize,
    /// Outboxes that were already closed.
    pub skipped: usize,
}

impl DeliveryReport {
    /// Total subscribers the update was routed to.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.deferred + self.skipped
    }

    /// Accumulate another report into this one.
    pub const fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Symbol to the outboxes of its subscribers. Empty buckets are pruned.
    buckets: HashMap<Symbol, HashMap<SubscriberId, Outbox>>,
    /// Subscriber to its watched symbols. Only non-empty sets are kept.
    watched: HashMap<SubscriberId, HashSet<Symbol>>,
}

impl RegistryState {
    /// Remove a subscriber from every bucket it occupies.
    ///
    /// Returns whether the subscriber was present.
    fn detach(&mut self, subscriber: SubscriberId) -> bool {
        let Some(symbols) = self.watched.remove(&subscriber) else {
            return false;
        };

        for symbol in &symbols {
            if let Some(bucket) = self.buckets.get_mut(symbol) {
                bucket.remove(&subscriber);
                if bucket.is_empty() {
                    self.buckets.remove(symbol);
                }
            }
        }

        true
    }

    /// Add a subscriber to the bucket of every given symbol.
    fn attach(&mut self, subscriber: SubscriberId, outbox: &Outbox, symbols: &HashSet<Symbol>) {
        if symbols.is_empty() {
            return;
        }

        for symbol in symbols {
            self.buckets
                .entry(symbol.clone())
                .or_default()
                .insert(subscriber, outbox.clone());
        }

        self.watched.insert(subscriber, symbols.clone());
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Mapping from symbol to the outboxes of the subscribers watching it.
///
/// # Example
///
/// ```rust
/// use std::collections::HashSet;
///
/// use price_stream_proxy::domain::streaming::SubscriberId;
/// use price_stream_proxy::domain::subscription::{Outbox, SubscriptionRegistry};
/// use tokio_util::sync::CancellationToken;
///
/// let registry = SubscriptionRegistry::new();
/// let (outbox, _rx) = Outbox::channel(16, CancellationToken::new());
/// let id = SubscriberId::generate();
///
/// let symbols: HashSet<String> = ["gold".to_string(), "oil".to_string()].into();
/// registry.set_interest(id, &outbox, &symbols);
/// assert_eq!(registry.list_watched_symbols().len(), 2);
///
/// registry.remove(id);
/// assert!(registry.list_watched_symbols().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    pending_deferred: Arc<AtomicUsize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every symbol that currently has at least one subscriber.
    #[must_use]
    pub fn list_watched_symbols(&self) -> BTreeSet<Symbol> {
        self.state.read().buckets.keys().cloned().collect()
    }

    /// Replace a subscriber's membership with exactly `symbols`.
    ///
    /// The subscriber is first removed from every bucket it occupied, then
    /// added to the buckets of the new set. An empty set leaves it in none.
    pub fn set_interest(&self, subscriber: SubscriberId, outbox: &Outbox, symbols: &HashSet<Symbol>) {
        let mut state = self.state.write();
        state.detach(subscriber);
        state.attach(subscriber, outbox, symbols);
    }

    /// Remove a subscriber from every bucket.
    ///
    /// Unknown or already removed subscribers are a no-op. Returns whether
    /// the subscriber was watching anything.
    pub fn remove(&self, subscriber: SubscriberId) -> bool {
        self.state.write().detach(subscriber)
    }

    /// Remove every subscriber, returning their ids.
    pub fn clear(&self) -> Vec<SubscriberId> {
        let mut state = self.state.write();
        state.buckets.clear();
        state.watched.drain().map(|(id, _)| id).collect()
    }

    /// Push an update into the outbox of every subscriber of its symbol.
    ///
    /// Never blocks. Full outboxes get the update through a detached task
    /// that gives up when the outbox is closed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while some outbox is full.
    pub fn deliver(&self, update: &PriceUpdate) -> DeliveryReport {
        let state = self.state.read();
        let mut report = DeliveryReport::default();

        let Some(bucket) = state.buckets.get(&update.symbol) else {
            return report;
        };

        for outbox in bucket.values() {
            if outbox.cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }

            match outbox.tx.try_send(update.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(update)) => {
                    self.defer(outbox.clone(), update);
                    report.deferred += 1;
                }
                Err(TrySendError::Closed(_)) => report.skipped += 1,
            }
        }

        report
    }

    /// Symbols a subscriber currently watches.
    #[must_use]
    pub fn subscriber_symbols(&self, subscriber: SubscriberId) -> HashSet<Symbol> {
        self.state
            .read()
            .watched
            .get(&subscriber)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of subscribers watching a symbol.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.state.read().buckets.get(symbol).map_or(0, HashMap::len)
    }

    /// Number of deferred deliveries still waiting on a full outbox.
    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.pending_deferred.load(Ordering::Relaxed)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            subscriber_count: state.watched.len(),
            symbol_count: state.buckets.len(),
            pending_deferred: self.pending_deferred(),
        }
    }

    fn defer(&self, outbox: Outbox, update: PriceUpdate) {
        let pending = Arc::clone(&self.pending_deferred);
        pending.fetch_add(1, Ordering::Relaxed);

        let symbol = update.symbol.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = outbox.cancel.cancelled() => {
                    tracing::trace!(%symbol, "Deferred delivery abandoned");
                }
                result = outbox.tx.send(update) => {
                    if result.is_err() {
                        tracing::trace!("Deferred delivery target closed");
                    }
                }
            }
            pending.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Subscribers watching at least one symbol.
    pub subscriber_count: usize,
    /// Symbols with at least one subscriber.
    pub symbol_count: usize,
    /// Deferred deliveries still in flight.
    pub pending_deferred: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;

    use super::*;

    fn symbols(names: &[&str]) -> HashSet<Symbol> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn outbox(capacity: usize) -> (Outbox, mpsc::Receiver<PriceUpdate>) {
        Outbox::channel(capacity, CancellationToken::new())
    }

    #[test]
    fn set_interest_creates_buckets() {
        let registry = SubscriptionRegistry::new();
        let (out, _rx) = outbox(8);
        let id = SubscriberId::generate();

        registry.set_interest(id, &out, &symbols(&["gold", "oil"]));

        let watched = registry.list_watched_symbols();
        assert_eq!(watched.len(), 2);
        assert!(watched.contains("gold"));
        assert!(watched.contains("oil"));
        assert_eq!(registry.subscriber_symbols(id), symbols(&["gold", "oil"]));
    }

    #[test]
    fn set_interest_replaces_previous_set() {
        let registry = SubscriptionRegistry::new();
        let (out, _rx) = outbox(8);
        let id = SubscriberId::generate();

        registry.set_interest(id, &out, &symbols(&["gold", "oil"]));
        registry.set_interest(id, &out, &symbols(&["oil", "tesla"]));

        assert_eq!(registry.subscriber_count("gold"), 0);
        assert_eq!(registry.subscriber_count("oil"), 1);
        assert_eq!(registry.subscriber_count("tesla"), 1);
        assert!(!registry.list_watched_symbols().contains("gold"));
    }

    #[test]
    fn set_interest_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (out, _rx) = outbox(8);
        let id = SubscriberId::generate();

        registry.set_interest(id, &out, &symbols(&["gold", "oil"]));
        let once = (registry.list_watched_symbols(), registry.stats());

        registry.set_interest(id, &out, &symbols(&["gold", "oil"]));
        let twice = (registry.list_watched_symbols(), registry.stats());

        assert_eq!(once, twice);
        assert_eq!(registry.subscriber_count("gold"), 1);
        assert_eq!(registry.subscriber_count("oil"), 1);
    }

    #[test]
    fn empty_interest_removes_subscriber() {
        let registry = SubscriptionRegistry::new();
        let (out, _rx) = outbox(8);
        let id = SubscriberId::generate();

        registry.set_interest(id, &out, &symbols(&["gold"]));
        registry.set_interest(id, &out, &HashSet::new());

        assert!(registry.list_watched_symbols().is_empty());
        assert_eq!(registry.stats().subscriber_count, 0);
    }

    #[test]
    fn shared_symbol_survives_one_removal() {
        let registry = SubscriptionRegistry::new();
        let (out1, _rx1) = outbox(8);
        let (out2, _rx2) = outbox(8);
        let first = SubscriberId::generate();
        let second = SubscriberId::generate();

        registry.set_interest(first, &out1, &symbols(&["tesla"]));
        registry.set_interest(second, &out2, &symbols(&["tesla"]));
        assert!(registry.remove(first));

        assert!(registry.list_watched_symbols().contains("tesla"));
        assert_eq!(registry.subscriber_count("tesla"), 1);
    }

    #[test]
    fn remove_unknown_subscriber_is_noop() {
        let registry = SubscriptionRegistry::new();
        let (out, _rx) = outbox(8);
        let id = SubscriberId::generate();
        registry.set_interest(id, &out, &symbols(&["gold"]));

        assert!(!registry.remove(SubscriberId::generate()));
        assert!(registry.remove(id));
        // Second removal races a disconnect; must stay quiet.
        assert!(!registry.remove(id));
        assert!(registry.list_watched_symbols().is_empty());
    }

    #[test]
    fn clear_returns_all_subscribers() {
        let registry = SubscriptionRegistry::new();
        let (out1, _rx1) = outbox(8);
        let (out2, _rx2) = outbox(8);
        let first = SubscriberId::generate();
        let second = SubscriberId::generate();
        registry.set_interest(first, &out1, &symbols(&["gold"]));
        registry.set_interest(second, &out2, &symbols(&["oil"]));

        let mut cleared = registry.clear();
        cleared.sort();
        let mut expected = vec![first, second];
        expected.sort();

        assert_eq!(cleared, expected);
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[tokio::test]
    async fn deliver_routes_only_to_watchers() {
        let registry = SubscriptionRegistry::new();
        let (gold_out, mut gold_rx) = outbox(8);
        let (oil_out, mut oil_rx) = outbox(8);
        registry.set_interest(SubscriberId::generate(), &gold_out, &symbols(&["gold"]));
        registry.set_interest(SubscriberId::generate(), &oil_out, &symbols(&["oil"]));

        let report = registry.deliver(&PriceUpdate::new("gold", 1900.0, 1901.5));

        assert_eq!(report.delivered, 1);
        assert_eq!(
            gold_rx.try_recv().unwrap(),
            PriceUpdate::new("gold", 1900.0, 1901.5)
        );
        assert_eq!(oil_rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn deliver_unwatched_symbol_is_empty_report() {
        let registry = SubscriptionRegistry::new();
        let report = registry.deliver(&PriceUpdate::new("gold", 1.0, 2.0));
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn no_delivery_after_empty_interest_or_remove() {
        let registry = SubscriptionRegistry::new();
        let (out1, mut rx1) = outbox(8);
        let (out2, mut rx2) = outbox(8);
        let first = SubscriberId::generate();
        let second = SubscriberId::generate();
        registry.set_interest(first, &out1, &symbols(&["gold"]));
        registry.set_interest(second, &out2, &symbols(&["gold"]));

        registry.set_interest(first, &out1, &HashSet::new());
        registry.remove(second);
        let report = registry.deliver(&PriceUpdate::new("gold", 1.0, 2.0));

        assert_eq!(report.recipients(), 0);
        assert_eq!(rx1.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rx2.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn full_outbox_does_not_block_others() {
        let registry = SubscriptionRegistry::new();
        let (slow_out, mut slow_rx) = outbox(1);
        let (fast_out, mut fast_rx) = outbox(8);
        registry.set_interest(SubscriberId::generate(), &slow_out, &symbols(&["gold"]));
        registry.set_interest(SubscriberId::generate(), &fast_out, &symbols(&["gold"]));

        // Fill the slow subscriber's only slot.
        registry.deliver(&PriceUpdate::new("gold", 1.0, 1.5));
        assert_eq!(fast_rx.try_recv().unwrap().sell_price, 1.0);

        let report = registry.deliver(&PriceUpdate::new("gold", 2.0, 2.5));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(fast_rx.try_recv().unwrap().sell_price, 2.0);

        // The deferred send lands once the slow reader drains.
        assert_eq!(slow_rx.recv().await.unwrap().sell_price, 1.0);
        let late = timeout(Duration::from_secs(1), slow_rx.recv())
            .await
            .expect("deferred delivery timed out")
            .unwrap();
        assert_eq!(late.sell_price, 2.0);
    }

    #[tokio::test]
    async fn closing_outbox_abandons_deferred_delivery() {
        let registry = SubscriptionRegistry::new();
        let (out, mut rx) = outbox(1);
        let id = SubscriberId::generate();
        registry.set_interest(id, &out, &symbols(&["gold"]));

        registry.deliver(&PriceUpdate::new("gold", 1.0, 1.5));
        let report = registry.deliver(&PriceUpdate::new("gold", 2.0, 2.5));
        assert_eq!(report.deferred, 1);

        registry.remove(id);
        out.close();

        timeout(Duration::from_secs(1), async {
            while registry.pending_deferred() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("deferred delivery did not observe cancellation");

        assert_eq!(rx.recv().await.unwrap().sell_price, 1.0);
        drop(out);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_outbox_is_skipped() {
        let registry = SubscriptionRegistry::new();
        let (out, rx) = outbox(8);
        registry.set_interest(SubscriberId::generate(), &out, &symbols(&["gold"]));
        drop(rx);

        let report = registry.deliver(&PriceUpdate::new("gold", 1.0, 2.0));
        assert_eq!(report.skipped, 1);
        assert!(out.is_closed());
    }

    #[tokio::test]
    async fn deliver_preserves_order_for_symbol() {
        let registry = SubscriptionRegistry::new();
        let (out, mut rx) = outbox(16);
        registry.set_interest(SubscriberId::generate(), &out, &symbols(&["A"]));

        for price in [100.0, 101.0, 102.0] {
            registry.deliver(&PriceUpdate::new("A", price, price));
        }

        for expected in [100.0, 101.0, 102.0] {
            assert_eq!(rx.recv().await.unwrap().sell_price, expected);
        }
    }

    #[test]
    fn delivery_report_merge() {
        let mut total = DeliveryReport {
            delivered: 1,
            deferred: 0,
            skipped: 1,
        };
        total.merge(DeliveryReport {
            delivered: 2,
            deferred: 1,
            skipped: 0,
        });
        assert_eq!(total.delivered, 3);
        assert_eq!(total.deferred, 1);
        assert_eq!(total.recipients(), 5);
    }

    #[test]
    fn thread_safety_concurrent_interest_changes() {
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let (out, _rx) = Outbox::channel(4, CancellationToken::new());
                let id = SubscriberId::generate();
                r.set_interest(id, &out, &[format!("SYM{i}"), "SHARED".to_string()].into());
                id
            }));
        }

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stats = registry.stats();
        assert_eq!(stats.subscriber_count, 10);
        assert_eq!(stats.symbol_count, 11);

        for id in ids {
            registry.remove(id);
        }
        assert_eq!(registry.stats().symbol_count, 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        SetInterest(usize, Vec<usize>),
        Remove(usize),
    }

    const SYMBOLS: [&str; 5] = ["gold", "oil", "tesla", "google", "silver"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, prop::collection::vec(0..SYMBOLS.len(), 0..4))
                .prop_map(|(s, syms)| Op::SetInterest(s, syms)),
            (0..4usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn watched_symbols_equal_union_of_interests(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let registry = SubscriptionRegistry::new();
            let ids: Vec<SubscriberId> = (0..4).map(|_| SubscriberId::generate()).collect();
            let outboxes: Vec<_> = (0..4).map(|_| outbox(4)).collect();
            let mut model: HashMap<SubscriberId, HashSet<Symbol>> = HashMap::new();

            for op in ops {
                match op {
                    Op::SetInterest(slot, picks) => {
                        let set: HashSet<Symbol> =
                            picks.into_iter().map(|i| SYMBOLS[i].to_string()).collect();
                        registry.set_interest(ids[slot], &outboxes[slot].0, &set);
                        model.insert(ids[slot], set);
                    }
                    Op::Remove(slot) => {
                        registry.remove(ids[slot]);
                        model.remove(&ids[slot]);
                    }
                }
            }

            let expected: BTreeSet<Symbol> = model.values().flatten().cloned().collect();
            prop_assert_eq!(registry.list_watched_symbols(), expected);

            for id in &ids {
                let want = model.get(id).cloned().unwrap_or_default();
                prop_assert_eq!(registry.subscriber_symbols(*id), want);
            }
        }
    }
}
