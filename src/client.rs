//! Coordinator: one request, three transports.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
mod relay;

pub use builder::CoordinatorBuilder;
pub use core::Coordinator;
pub use relay::TransportRelay;
