//! Canonical domain types.
//!
//! Everything here is protocol-agnostic: operation codes, voltage
//! curves, and wire field names are resolved by [`crate::convert`]
//! before these types are built.

use serde::{Deserialize, Serialize};

/// Manufacturer string reported for every blind.
pub const MANUFACTURER: &str = "MOTION";

/// Device category tag. Consumer binding layers key on this to route
/// devices; every normalized device carries it.
pub const DEVICE_KIND: &str = "blinds";

fn default_kind() -> String {
    DEVICE_KIND.to_owned()
}

/// What a blind motor is currently doing (or was last told to do).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlindOperation {
    Open,
    Close,
    Stop,
    /// Reported code outside the known range.
    Unknown,
}

/// Normalized state of one blind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindState {
    pub operation: BlindOperation,
    /// Position in percent closed, always within 0–100.
    pub position: u8,
    /// Battery charge in percent. Present only for DC (battery) motors.
    pub battery_level: Option<u8>,
    /// Present only for DC (battery) motors.
    pub charging: Option<bool>,
    /// Raw RSSI as reported by the device.
    pub signal_strength: i32,
}

/// One motorized blind, as consumers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blind {
    /// Stable identifier; equals the device mac.
    pub id: String,
    /// Device category, always [`DEVICE_KIND`].
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub name: String,
    pub mac: String,
    pub manufacturer: String,
    /// Hardware model name, e.g. `RollerBlind`.
    pub model: String,
    pub state: BlindState,
}

/// Domain write shape accepted by [`Bridge::update_device`](crate::Bridge::update_device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteState {
    #[serde(default)]
    pub operation: Option<BlindOperation>,
    /// Target position in percent closed, 0–100.
    #[serde(default)]
    pub position: Option<u8>,
}

/// Why a device update was emitted. Consumers use this to decide
/// merge/staleness policy: a consumer that just issued a write may
/// ignore a stale `Poll` until its write settles, while always
/// honoring `Report` and `Force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UpdateOrigin {
    /// Unsolicited notification pushed by the hub.
    Report,
    /// Periodic poll sweep.
    Poll,
    /// Explicitly requested reconciliation fetch.
    Force,
}

/// A device state change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub device: Blind,
    pub origin: UpdateOrigin,
}
