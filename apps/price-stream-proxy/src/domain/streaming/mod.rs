//! Price Streaming Types
//!
//! Core domain types for the price stream: the symbol key, the immutable
//! price update record, and the identity handed to each subscriber.
//! These types are transport-agnostic; adapters convert to and from them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Symbol
// =============================================================================

/// Identifier of a priced instrument (e.g. `"gold"`, `"tesla"`).
///
/// Opaque and case-sensitive; only used as a map key.
pub type Symbol = String;

// =============================================================================
// Price Update
// =============================================================================

/// A single price update produced by the upstream price service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Price at which the instrument can be sold.
    pub sell_price: f64,
    /// Price at which the instrument can be bought.
    pub buy_price: f64,
}

impl PriceUpdate {
    /// Create a new price update.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, sell_price: f64, buy_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            sell_price,
            buy_price,
        }
    }
}

// =============================================================================
// Subscriber Identity
// =============================================================================

/// Process-unique identity of a subscriber session.
///
/// Minted from 128 random bits when the session is created and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Mint a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Tests
// =============================================================================
