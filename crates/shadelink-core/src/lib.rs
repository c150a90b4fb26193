//! Domain layer for MOTION blinds hubs.
//!
//! Wraps a [`shadelink_proto::BridgeClient`] in a [`Bridge`] that speaks
//! in domain terms: roller blinds with open/close/stop state, percent
//! battery, display names, and update events tagged by origin (report,
//! poll, force) so consumers can apply their own staleness policy.

pub mod bridge;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use model::{
    Blind, BlindOperation, BlindState, DEVICE_KIND, DeviceUpdate, UpdateOrigin, WriteState,
};
