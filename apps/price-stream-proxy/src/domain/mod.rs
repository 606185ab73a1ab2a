//! Domain Layer - Core price types and the subscription registry.
//!
//! This layer holds the price stream's data types and the in-memory
//! mapping from symbols to subscriber outboxes. Nothing here talks to the
//! network; the only runtime dependency is the Tokio channel behind each
//! outbox.

/// Price stream types (symbols, updates, subscriber identity).
pub mod streaming;

/// Subscription registry and subscriber outboxes.
pub mod subscription;
