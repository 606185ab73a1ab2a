//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceLink`: the single shared duplex stream to the upstream price
//!   service, plus its point-in-time snapshot RPC

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::domain::streaming::{PriceUpdate, Symbol};

// =============================================================================
// Errors
// =============================================================================

/// Upstream price link error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceLinkError {
    /// The link could not be established.
    #[error("Price service connection error: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Receiving the next batch failed.
    #[error("Price stream receive error: {message}")]
    Receive {
        /// Error details.
        message: String,
    },

    /// Pushing an interest set failed.
    #[error("Price stream send error: {message}")]
    Send {
        /// Error details.
        message: String,
    },

    /// A request/response call failed.
    #[error("Price service RPC error: {message}")]
    Rpc {
        /// Error details.
        message: String,
    },

    /// The upstream closed the stream.
    #[error("Price stream closed by upstream")]
    Closed,
}

impl PriceLinkError {
    /// Build a receive error from anything displayable.
    pub fn receive(message: impl Into<String>) -> Self {
        Self::Receive {
            message: message.into(),
        }
    }

    /// Build a send error from anything displayable.
    pub fn send(message: impl Into<String>) -> Self {
        Self::Send {
            message: message.into(),
        }
    }
}

// =============================================================================
// Price Link Port
// =============================================================================

/// Port for the upstream price service.
///
/// One implementation owns one duplex stream. `receive_batch` is only ever
/// called by the fan-out loop; `send_interest` may be called from any task
/// but callers serialize it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceLink: Send + Sync {
    /// Wait for the next batch of price updates.
    async fn receive_batch(&self) -> Result<Vec<PriceUpdate>, PriceLinkError>;

    /// Replace the set of symbols the upstream streams to us.
    async fn send_interest(&self, symbols: &BTreeSet<Symbol>) -> Result<(), PriceLinkError>;

    /// Fetch a point-in-time snapshot for the given symbols.
    async fn current_prices(
        &self,
        symbols: &[Symbol],
    ) -> Result<HashMap<Symbol, PriceUpdate>, PriceLinkError>;
}
