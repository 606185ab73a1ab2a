//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionService`: subscriber sessions, interest pushes, faulting
//! - `run_fanout`: the single upstream read loop
//! - `UpstreamState`: link status shared with the health server

/// Fan-out loop.
pub mod fanout;

/// Subscription service.
pub mod subscription;

/// Upstream link state tracking.
pub mod upstream;

pub use fanout::{fan_out_batch, run_fanout};
pub use subscription::{
    ServiceStats, SubscriptionError, SubscriptionService, SubscriptionServiceConfig,
};
pub use upstream::{UpstreamState, UpstreamStatus};
