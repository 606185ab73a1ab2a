//! In-Memory Price Link
//!
//! A `PriceLink` driven entirely from a handle: tests feed batches and
//! failures in, and read back every interest set the proxy pushed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::application::ports::{PriceLink, PriceLinkError};
use crate::domain::streaming::{PriceUpdate, Symbol};

type BatchResult = Result<Vec<PriceUpdate>, PriceLinkError>;

#[derive(Debug, Default)]
struct Shared {
    pushes: Mutex<Vec<BTreeSet<Symbol>>>,
    fail_pushes: AtomicBool,
    latest: RwLock<HashMap<Symbol, PriceUpdate>>,
}

/// Price link backed by in-process channels.
#[derive(Debug)]
pub struct InMemoryPriceLink {
    batches: tokio::sync::Mutex<mpsc::UnboundedReceiver<BatchResult>>,
    shared: Arc<Shared>,
}

/// Drives an [`InMemoryPriceLink`].
///
/// Dropping every handle closes the stream: the next receive returns
/// `PriceLinkError::Closed`.
#[derive(Debug, Clone)]
pub struct PriceFeedHandle {
    tx: mpsc::UnboundedSender<BatchResult>,
    shared: Arc<Shared>,
}

impl InMemoryPriceLink {
    /// Create a link and the handle that drives it.
    #[must_use]
    pub fn channel() -> (Self, PriceFeedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Self {
                batches: tokio::sync::Mutex::new(rx),
                shared: Arc::clone(&shared),
            },
            PriceFeedHandle { tx, shared },
        )
    }
}

impl PriceFeedHandle {
    /// Emit one batch of updates.
    ///
    /// Returns `false` if the link was dropped.
    pub fn send_batch(&self, batch: Vec<PriceUpdate>) -> bool {
        self.tx.send(Ok(batch)).is_ok()
    }

    /// Make the next receive fail.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.send(Err(PriceLinkError::receive(message))).is_ok()
    }

    /// Make subsequent interest pushes fail (or succeed again).
    pub fn fail_pushes(&self, fail: bool) {
        self.shared.fail_pushes.store(fail, Ordering::Relaxed);
    }

    /// Every interest set pushed so far, oldest first. Failed pushes are not
    /// recorded.
    #[must_use]
    pub fn pushes(&self) -> Vec<BTreeSet<Symbol>> {
        self.shared.pushes.lock().clone()
    }

    /// The most recent successful interest push.
    #[must_use]
    pub fn last_push(&self) -> Option<BTreeSet<Symbol>> {
        self.shared.pushes.lock().last().cloned()
    }
}

#[async_trait]
impl PriceLink for InMemoryPriceLink {
    async fn receive_batch(&self) -> Result<Vec<PriceUpdate>, PriceLinkError> {
        let batch = self
            .batches
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(PriceLinkError::Closed))?;

        let mut latest = self.shared.latest.write();
        for update in &batch {
            latest.insert(update.symbol.clone(), update.clone());
        }
        drop(latest);

        Ok(batch)
    }

    async fn send_interest(&self, symbols: &BTreeSet<Symbol>) -> Result<(), PriceLinkError> {
        if self.shared.fail_pushes.load(Ordering::Relaxed) {
            return Err(PriceLinkError::send("injected push failure"));
        }
        self.shared.pushes.lock().push(symbols.clone());
        Ok(())
    }

    async fn current_prices(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, PriceUpdate>, PriceLinkError> {
        let latest = self.shared.latest.read();
        Ok(symbols
            .iter()
            .filter_map(|s| latest.get(s).map(|u| (s.clone(), u.clone())))
            .collect())
    }
}
