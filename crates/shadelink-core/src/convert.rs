//! Protocol-to-domain normalization.
//!
//! Turns raw device records from `shadelink-proto` into canonical
//! [`Blind`]s: maps operation codes, runs the battery voltage curve,
//! and filters to the supported category (roller blinds; other blind
//! kinds are silently excluded).

use shadelink_proto::api::{
    BlindKind, DeviceCommand, DeviceRecord, DeviceStatus, Operation, VoltageMode, battery_info,
};

use crate::config::BridgeConfig;
use crate::model::{Blind, BlindOperation, BlindState, DEVICE_KIND, MANUFACTURER, WriteState};

/// Normalize a raw record into a domain device. Returns `None` for
/// device categories the domain layer does not support.
pub fn blind_from_record(record: &DeviceRecord, config: &BridgeConfig) -> Option<Blind> {
    let kind = BlindKind::from_code(record.data.blind_type)?;
    if kind != BlindKind::RollerBlind {
        return None;
    }
    Some(Blind {
        id: record.mac.clone(),
        kind: DEVICE_KIND.to_owned(),
        name: config.device_name(&record.mac),
        mac: record.mac.clone(),
        manufacturer: MANUFACTURER.to_owned(),
        model: kind.name().to_owned(),
        state: state_from_status(&record.data),
    })
}

/// Normalize a raw status block.
pub fn state_from_status(status: &DeviceStatus) -> BlindState {
    let operation = match Operation::from_code(status.operation) {
        Some(Operation::OpenUp) => BlindOperation::Open,
        Some(Operation::CloseDown) => BlindOperation::Close,
        Some(Operation::Stop) => BlindOperation::Stop,
        _ => BlindOperation::Unknown,
    };

    // Battery data only means something on battery (DC) motors; mains
    // units report a nonsense level.
    let battery = matches!(
        VoltageMode::from_code(status.voltage_mode),
        Some(VoltageMode::Dc)
    );

    BlindState {
        operation,
        position: status.current_position.min(100),
        battery_level: battery.then(|| battery_info(status.battery_level).1),
        charging: battery.then(|| status.charging_state != 0),
        signal_strength: status.rssi,
    }
}

/// Translate the domain write shape into the protocol write payload.
pub fn command_from_write(write: WriteState) -> DeviceCommand {
    let operation = write.operation.map(|op| match op {
        BlindOperation::Open => Operation::OpenUp.code(),
        BlindOperation::Close => Operation::CloseDown.code(),
        BlindOperation::Stop => Operation::Stop.code(),
        // No protocol code exists; send the raw status query so the
        // hub replies with current state instead of moving the motor.
        BlindOperation::Unknown => Operation::StatusQuery.code(),
    });
    DeviceCommand {
        operation,
        target_position: write.position,
    }
}
