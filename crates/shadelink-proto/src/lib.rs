//! Wire protocol and stateful UDP client for MOTION bridges.
//!
//! The hub speaks JSON-encoded datagrams: unicast request/response on
//! port 32100, unsolicited multicast notifications (heartbeats, device
//! reports) on 238.0.0.18:32101. This crate owns the sockets, correlates
//! requests to responses, retries with backoff, watches liveness, and
//! authenticates writes. `shadelink-core` layers domain semantics on top.

pub mod api;
pub mod auth;
pub mod availability;
pub mod client;
pub mod error;
pub mod msgid;

// ── Primary re-exports ──────────────────────────────────────────────
pub use availability::{Availability, AvailabilityChange, BindGuard};
pub use client::{BridgeClient, ClientConfig, DeviceListing};
pub use error::ProtoError;
pub use msgid::MessageIdGenerator;
