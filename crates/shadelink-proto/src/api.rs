//! Wire-level message and type definitions for the MOTION bridge protocol.
//!
//! Everything here is a fixed contract: field names match the JSON the
//! hub emits byte for byte (`msgID`, `msgType`, `AccessToken`,
//! `ProtocolVersion`, `RSSI`), and the numeric codes mirror the hub
//! firmware. The client and the domain layer both build on these types.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Protocol version this client implements. The hub reports its own
/// version in every `GetDeviceListAck`; a mismatch is fatal on connect.
pub const PROTOCOL_VERSION: &str = "0.9";

/// Device type code of the hub itself.
pub const DEVICE_TYPE_BRIDGE: &str = "02000002";
/// Device type code of a standard (433 MHz) blind.
pub const DEVICE_TYPE_BLIND: &str = "10000000";

/// Unicast port the hub listens on for requests.
pub const HUB_PORT: u16 = 32100;
/// Multicast group the hub publishes notifications to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(238, 0, 0, 18);
/// Port of the multicast notification channel.
pub const MULTICAST_PORT: u16 = 32101;

// ── Requests ────────────────────────────────────────────────────────

/// Outbound request datagram.
///
/// The `msgType` tag doubles as the serde discriminant, so serializing
/// a variant produces exactly the JSON shape the hub expects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "msgType")]
pub enum Request {
    GetDeviceList {
        #[serde(rename = "msgID")]
        msg_id: String,
    },
    ReadDevice {
        #[serde(rename = "msgID")]
        msg_id: String,
        mac: String,
        #[serde(rename = "deviceType")]
        device_type: String,
    },
    WriteDevice {
        #[serde(rename = "msgID")]
        msg_id: String,
        mac: String,
        #[serde(rename = "deviceType")]
        device_type: String,
        #[serde(rename = "AccessToken")]
        access_token: String,
        data: DeviceCommand,
    },
}

impl Request {
    /// The `msgType` value this request serializes with.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::GetDeviceList { .. } => "GetDeviceList",
            Self::ReadDevice { .. } => "ReadDevice",
            Self::WriteDevice { .. } => "WriteDevice",
        }
    }

    /// Replace the correlation id. Retries re-send the same logical
    /// request under a fresh id.
    pub fn set_msg_id(&mut self, id: String) {
        match self {
            Self::GetDeviceList { msg_id }
            | Self::ReadDevice { msg_id, .. }
            | Self::WriteDevice { msg_id, .. } => *msg_id = id,
        }
    }
}

/// Write payload of a `WriteDevice` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<u8>,
    #[serde(rename = "targetPosition", skip_serializing_if = "Option::is_none")]
    pub target_position: Option<u8>,
}

// ── Responses ───────────────────────────────────────────────────────

/// Inbound unicast response, decoded loosely.
///
/// The hub reuses one envelope for all three acks; which optional
/// fields are present depends on `msgType`. Typed payloads are pulled
/// out of `data` on demand.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(rename = "msgType")]
    pub msg_type: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default, rename = "deviceType")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "ProtocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default, rename = "actionResult")]
    pub action_result: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn is_device_list_ack(&self) -> bool {
        self.msg_type == "GetDeviceListAck"
    }
}

/// One entry of a `GetDeviceListAck` directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceListEntry {
    pub mac: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
}

/// Raw per-device status block, as carried by `ReadDeviceAck`,
/// `WriteDeviceAck`, and `Report` payloads. Never mutated locally;
/// replaced wholesale on each fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatus {
    #[serde(rename = "type")]
    pub blind_type: u8,
    pub operation: u8,
    #[serde(rename = "currentPosition")]
    pub current_position: u8,
    #[serde(rename = "currentAngle", default)]
    pub current_angle: u16,
    #[serde(rename = "currentState", default)]
    pub limit_state: u8,
    #[serde(rename = "voltageMode", default)]
    pub voltage_mode: u8,
    #[serde(rename = "batteryLevel", default)]
    pub battery_level: u16,
    #[serde(rename = "chargingState", default)]
    pub charging_state: u8,
    #[serde(rename = "wirelessMode", default)]
    pub wireless_mode: u8,
    #[serde(rename = "RSSI", default)]
    pub rssi: i32,
}

/// A device record: identity plus its raw status block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    pub mac: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    pub data: DeviceStatus,
}

// ── Notifications ───────────────────────────────────────────────────

/// Periodic liveness beacon from the hub. Carries a refreshed session
/// token, so every heartbeat re-arms write authorization.
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    pub mac: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    pub token: String,
    #[serde(default)]
    pub data: Option<HeartbeatData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatData {
    #[serde(rename = "currentState", default)]
    pub current_state: u8,
    #[serde(rename = "numberOfDevices", default)]
    pub number_of_devices: u32,
    #[serde(rename = "RSSI", default)]
    pub rssi: i32,
}

/// A parsed multicast notification.
#[derive(Debug, Clone)]
pub enum Notification {
    Heartbeat(Heartbeat),
    Report(DeviceRecord),
    /// Syntactically valid JSON with an unrecognized `msgType`.
    Unknown(String),
}

impl Notification {
    /// Decode a raw multicast payload.
    ///
    /// Fails only on malformed JSON or a missing/mistyped `msgType`;
    /// unknown message types decode to [`Notification::Unknown`].
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "msgType")]
            msg_type: String,
        }
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let envelope: Envelope = serde_json::from_value(value.clone())?;
        match envelope.msg_type.as_str() {
            "Heartbeat" => Ok(Self::Heartbeat(serde_json::from_value(value)?)),
            "Report" => Ok(Self::Report(serde_json::from_value(value)?)),
            other => Ok(Self::Unknown(other.to_owned())),
        }
    }
}

// ── Correlation handles ─────────────────────────────────────────────

/// Derive the correlation handle for an expected response.
///
/// The directory listing is correlated by message type alone; per-device
/// acks append the mac, so concurrent requests to different devices
/// resolve independently.
pub fn request_handle(msg_type: &str, mac: Option<&str>) -> String {
    match mac {
        Some(mac) => format!("{msg_type}:{mac}"),
        None => msg_type.to_owned(),
    }
}

// ── Protocol enumerations ───────────────────────────────────────────

/// Motor operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    CloseDown = 0,
    OpenUp = 1,
    Stop = 2,
    StatusQuery = 5,
}

impl Operation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::CloseDown),
            1 => Some(Self::OpenUp),
            2 => Some(Self::Stop),
            5 => Some(Self::StatusQuery),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Highest operation code the hub accepts in a write.
pub const MAX_OPERATION_CODE: u8 = 5;

/// Blind hardware categories, keyed by the `type` field of a status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlindKind {
    RollerBlind = 1,
    VenetianBlind = 2,
    RomanBlind = 3,
    HoneycombBlind = 4,
    ShangriLaBlind = 5,
    RollerShutter = 6,
    RollerGate = 7,
    Awning = 8,
    TopDownBottomUp = 9,
    DayNightBlind = 10,
    DimmingBlind = 11,
    Curtain = 12,
    CurtainLeft = 13,
    CurtainRight = 14,
    DoubleRoller = 17,
    Switch = 43,
}

impl BlindKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::RollerBlind),
            2 => Some(Self::VenetianBlind),
            3 => Some(Self::RomanBlind),
            4 => Some(Self::HoneycombBlind),
            5 => Some(Self::ShangriLaBlind),
            6 => Some(Self::RollerShutter),
            7 => Some(Self::RollerGate),
            8 => Some(Self::Awning),
            9 => Some(Self::TopDownBottomUp),
            10 => Some(Self::DayNightBlind),
            11 => Some(Self::DimmingBlind),
            12 => Some(Self::Curtain),
            13 => Some(Self::CurtainLeft),
            14 => Some(Self::CurtainRight),
            17 => Some(Self::DoubleRoller),
            43 => Some(Self::Switch),
            _ => None,
        }
    }

    /// Hardware model name, used verbatim in the domain model.
    pub fn name(self) -> &'static str {
        match self {
            Self::RollerBlind => "RollerBlind",
            Self::VenetianBlind => "VenetianBlind",
            Self::RomanBlind => "RomanBlind",
            Self::HoneycombBlind => "HoneycombBlind",
            Self::ShangriLaBlind => "ShangriLaBlind",
            Self::RollerShutter => "RollerShutter",
            Self::RollerGate => "RollerGate",
            Self::Awning => "Awning",
            Self::TopDownBottomUp => "TopDownBottomUp",
            Self::DayNightBlind => "DayNightBlind",
            Self::DimmingBlind => "DimmingBlind",
            Self::Curtain => "Curtain",
            Self::CurtainLeft => "CurtainLeft",
            Self::CurtainRight => "CurtainRight",
            Self::DoubleRoller => "DoubleRoller",
            Self::Switch => "Switch",
        }
    }
}

/// Power source reported by a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoltageMode {
    Ac = 0,
    Dc = 1,
}

impl VoltageMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ac),
            1 => Some(Self::Dc),
            _ => None,
        }
    }
}

/// End-limit calibration state of a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LimitState {
    NoLimits = 0,
    TopLimitDetected = 1,
    BottomLimitDetected = 2,
    LimitsDetected = 3,
    ThirdLimitDetected = 4,
}

/// Radio link mode of a motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WirelessMode {
    UniDirectional = 0,
    BiDirectional = 1,
    BiDirectionalMechanicalLimits = 2,
    Other = 3,
}

/// Hub working state carried inside heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HubState {
    Working = 1,
    Pairing = 2,
    Updating = 3,
}

// ── Battery curve ───────────────────────────────────────────────────

/// Convert a raw battery level (hundredths of a volt) into
/// `(voltage, percent)`.
///
/// The pack chemistry is inferred from the voltage band: 2-cell packs
/// top out at 8.4 V, 3-cell at 12.6 V, 4-cell at 16.8 V. Percent is
/// linear within each band and clamped to 0–100.
pub fn battery_info(battery_level: u16) -> (f64, u8) {
    let voltage = f64::from(battery_level) / 100.0;
    let fraction = if voltage > 0.0 && voltage <= 9.4 {
        (voltage - 6.2) / (8.4 - 6.2) // 2-cell pack (8.4V)
    } else if voltage > 9.4 && voltage <= 13.6 {
        (voltage - 10.4) / (12.6 - 10.4) // 3-cell pack (12.6V)
    } else if voltage > 13.6 {
        (voltage - 14.6) / (16.8 - 14.6) // 4-cell pack (16.8V)
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
    (voltage, percent)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn write_device_serializes_wire_field_names() {
        let req = Request::WriteDevice {
            msg_id: "20200321134209916".into(),
            mac: "a4cf12345678".into(),
            device_type: DEVICE_TYPE_BLIND.into(),
            access_token: "1234ABCD".into(),
            data: DeviceCommand {
                operation: None,
                target_position: Some(40),
            },
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["msgType"], "WriteDevice");
        assert_eq!(value["msgID"], "20200321134209916");
        assert_eq!(value["deviceType"], DEVICE_TYPE_BLIND);
        assert_eq!(value["AccessToken"], "1234ABCD");
        assert_eq!(value["data"]["targetPosition"], 40);
        // Unset command fields must be omitted, not serialized as null.
        assert!(value["data"].get("operation").is_none());
    }

    #[test]
    fn get_device_list_round_trips_msg_id() {
        let mut req = Request::GetDeviceList {
            msg_id: "1".into(),
        };
        req.set_msg_id("2".into());
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["msgID"], "2");
        assert_eq!(req.msg_type(), "GetDeviceList");
    }

    #[test]
    fn parse_heartbeat_notification() {
        let payload = serde_json::json!({
            "msgType": "Heartbeat",
            "mac": "a4cf99999999",
            "deviceType": DEVICE_TYPE_BRIDGE,
            "token": "ABCDEF0123456789",
            "data": { "currentState": 1, "numberOfDevices": 3, "RSSI": -52 }
        });

        match Notification::parse(payload.to_string().as_bytes()).unwrap() {
            Notification::Heartbeat(hb) => {
                assert_eq!(hb.token, "ABCDEF0123456789");
                assert_eq!(hb.data.unwrap().number_of_devices, 3);
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn parse_report_notification() {
        let payload = serde_json::json!({
            "msgType": "Report",
            "mac": "a4cf12345678",
            "deviceType": DEVICE_TYPE_BLIND,
            "data": {
                "type": 1, "operation": 2, "currentPosition": 55,
                "currentAngle": 0, "currentState": 3, "voltageMode": 1,
                "batteryLevel": 810, "chargingState": 0, "wirelessMode": 1,
                "RSSI": -68
            }
        });

        match Notification::parse(payload.to_string().as_bytes()).unwrap() {
            Notification::Report(record) => {
                assert_eq!(record.mac, "a4cf12345678");
                assert_eq!(record.data.current_position, 55);
                assert_eq!(record.data.rssi, -68);
            }
            other => panic!("expected report, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_notification_type() {
        let payload = br#"{"msgType":"Gossip","mac":"00"}"#;
        match Notification::parse(payload).unwrap() {
            Notification::Unknown(kind) => assert_eq!(kind, "Gossip"),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        assert!(Notification::parse(b"not json at all").is_err());
        assert!(Notification::parse(br#"{"mac":"00"}"#).is_err());
    }

    #[test]
    fn handle_with_and_without_mac() {
        assert_eq!(request_handle("GetDeviceListAck", None), "GetDeviceListAck");
        assert_eq!(
            request_handle("ReadDeviceAck", Some("a4cf12345678")),
            "ReadDeviceAck:a4cf12345678"
        );
    }

    #[test]
    fn battery_curve_two_cell_bounds() {
        assert_eq!(battery_info(840), (8.4, 100));
        assert_eq!(battery_info(620), (6.2, 0));
    }

    #[test]
    fn battery_curve_three_and_four_cell() {
        // 11.5V sits midway in the 3-cell band (10.4–12.6V).
        let (_, pct) = battery_info(1150);
        assert_eq!(pct, 50);
        // 16.8V is a full 4-cell pack.
        assert_eq!(battery_info(1680).1, 100);
    }

    #[test]
    fn battery_curve_clamps_out_of_band_values() {
        // Below the 2-cell floor.
        assert_eq!(battery_info(500).1, 0);
        // Above the 4-cell ceiling.
        assert_eq!(battery_info(2000).1, 100);
        // Zero reads as empty.
        assert_eq!(battery_info(0).1, 0);
    }

    #[test]
    fn operation_codes_round_trip() {
        for op in [
            Operation::CloseDown,
            Operation::OpenUp,
            Operation::Stop,
            Operation::StatusQuery,
        ] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code(3), None);
        assert_eq!(Operation::from_code(9), None);
    }
}
