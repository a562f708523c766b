//! 类型模块：请求、归一化事件与线上帧的核心数据类型。
//!
//! Core data types shared by every transport session and the coordinator.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | The generation request and the transport identifiers |
//! | [`events`] | Normalized events and per-transport outcomes |
//! | [`wire`] | Frames exchanged with the generation endpoint, decoded once at the boundary |

pub mod events;
pub mod request;
pub mod wire;

pub use events::{NormalizedEvent, Settlement, TransportOutcome};
pub use request::{GenerationRequest, TransportKind};
