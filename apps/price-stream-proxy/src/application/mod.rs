//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream price link).
pub mod ports;

/// Application services for fan-out and subscription management.
pub mod services;
