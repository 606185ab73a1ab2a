//! Upstream Price Service Adapters
//!
//! Implementations of the `PriceLink` port: the gRPC client used in
//! production and an in-memory link for tests and local runs.

/// gRPC adapter over `proto.PriceService`.
pub mod grpc;

/// In-memory adapter driven by a handle.
pub mod memory;

/// `proto.PriceService` messages and client, generated from
/// `proto/price_service.proto` by `build.rs`.
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/proto.rs"));
}

pub use grpc::GrpcPriceLink;
pub use memory::{InMemoryPriceLink, PriceFeedHandle};
