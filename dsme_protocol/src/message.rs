//! Typed message payloads and the `Message` sum type.
//!
//! Each payload struct owns a manual little-endian encode/decode pair
//! rather than relying on `#[repr(C)]` layout, so the wire format is
//! independent of the compiling platform's struct layout rules (§6).

use crate::types::{type_id, DeviceState, ThermalStatus, TypeId};

/// A decoded message body, plus any trailing "extra" bytes (§9 — owned
/// replacement for the source's raw embedded pointer).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Close,
    StateChangeInd { state: DeviceState },
    StateQuery,
    SaveDataInd,
    PowerupReq,
    ShutdownReq,
    SetAlarmState { alarm_set: bool },
    RebootReq,
    SetThermalState { status: ThermalStatus },
    SetBatteryState { battery_empty: bool },
    GetVersion,
    DsmeVersion { version: String },
    SetChargerState { connected: bool },
    SetUsbState { mounted_to_pc: bool },
    SetEmergencyCallState { ongoing: bool },
    ChangeRunlevel { runlevel: u8 },
    Shutdown { runlevel: u8 },
    BatteryEmptyInd,
    Idle,
    ThermalStatusInd { status: ThermalStatus, temperature_mc: i32, sensor_name: String },
    /// A message whose type is not registered here, or whose body length did
    /// not match the registered size for its type. Carried through rather
    /// than rejected at decode time — `size_` vs. registered-size mismatch
    /// is a *dispatch*-time silent-drop decision (§3), not a framing error.
    Unknown { type_id: TypeId, body: Vec<u8>, extra: Vec<u8> },
}

/// Errors raised while decoding a message body for a *known* type whose
/// fixed-size body is structurally malformed (wrong length for a bool/enum
/// field). A length mismatch against the registered size does not reach
/// this path — see [`Message::Unknown`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("invalid enum discriminant {0} for field")]
    InvalidDiscriminant(u32),
}

fn encode_bool(b: bool) -> Vec<u8> {
    vec![b as u8]
}

fn decode_bool(body: &[u8]) -> bool {
    body.first().map(|b| *b != 0).unwrap_or(false)
}

impl Message {
    /// The registered wire type of this message.
    pub fn type_id(&self) -> TypeId {
        match self {
            Message::Close => type_id::CLOSE,
            Message::StateChangeInd { .. } => type_id::STATE_CHANGE_IND,
            Message::StateQuery => type_id::STATE_QUERY,
            Message::SaveDataInd => type_id::SAVE_DATA_IND,
            Message::PowerupReq => type_id::POWERUP_REQ,
            Message::ShutdownReq => type_id::SHUTDOWN_REQ,
            Message::SetAlarmState { .. } => type_id::SET_ALARM_STATE,
            Message::RebootReq => type_id::REBOOT_REQ,
            Message::SetThermalState { .. } => type_id::SET_THERMAL_STATE,
            Message::SetBatteryState { .. } => type_id::SET_BATTERY_STATE,
            Message::GetVersion => type_id::GET_VERSION,
            Message::DsmeVersion { .. } => type_id::DSME_VERSION,
            Message::SetChargerState { .. } => type_id::SET_CHARGER_STATE,
            Message::SetUsbState { .. } => type_id::SET_USB_STATE,
            Message::SetEmergencyCallState { .. } => type_id::SET_EMERGENCY_CALL_STATE,
            Message::ChangeRunlevel { .. } => type_id::CHANGE_RUNLEVEL,
            Message::Shutdown { .. } => type_id::SHUTDOWN,
            Message::BatteryEmptyInd => type_id::BATTERY_EMPTY_IND,
            Message::Idle => type_id::IDLE,
            Message::ThermalStatusInd { .. } => type_id::THERMAL_STATUS_IND,
            Message::Unknown { type_id, .. } => *type_id,
        }
    }

    /// Fixed-struct body size registered for this message's type, in bytes.
    /// `Unknown` reports its observed body length verbatim.
    pub fn registered_size(&self) -> usize {
        match self {
            Message::Close
            | Message::StateQuery
            | Message::SaveDataInd
            | Message::PowerupReq
            | Message::ShutdownReq
            | Message::RebootReq
            | Message::GetVersion
            | Message::BatteryEmptyInd
            | Message::Idle => 0,
            Message::StateChangeInd { .. } => 1,
            Message::SetAlarmState { .. } => 1,
            Message::SetThermalState { .. } => 1,
            Message::SetBatteryState { .. } => 1,
            Message::SetChargerState { .. } => 1,
            Message::SetUsbState { .. } => 1,
            Message::SetEmergencyCallState { .. } => 1,
            Message::ChangeRunlevel { .. } => 1,
            Message::Shutdown { .. } => 1,
            Message::ThermalStatusInd { temperature_mc: _, .. } => 5, // status:1 + temperature:4
            Message::DsmeVersion { .. } => 0,
            Message::Unknown { body, .. } => body.len(),
        }
    }

    /// Encode the fixed-size body portion (not including header or extra).
    pub fn encode_body(&self) -> Vec<u8> {
        match self {
            Message::Close
            | Message::StateQuery
            | Message::SaveDataInd
            | Message::PowerupReq
            | Message::ShutdownReq
            | Message::RebootReq
            | Message::GetVersion
            | Message::BatteryEmptyInd
            | Message::Idle
            | Message::DsmeVersion { .. } => Vec::new(),
            Message::StateChangeInd { state } => vec![*state as u8],
            Message::SetAlarmState { alarm_set } => encode_bool(*alarm_set),
            Message::SetThermalState { status } => vec![*status as u8],
            Message::SetBatteryState { battery_empty } => encode_bool(*battery_empty),
            Message::SetChargerState { connected } => encode_bool(*connected),
            Message::SetUsbState { mounted_to_pc } => encode_bool(*mounted_to_pc),
            Message::SetEmergencyCallState { ongoing } => encode_bool(*ongoing),
            Message::ChangeRunlevel { runlevel } => vec![*runlevel],
            Message::Shutdown { runlevel } => vec![*runlevel],
            Message::ThermalStatusInd { status, temperature_mc, .. } => {
                let mut body = vec![*status as u8];
                body.extend_from_slice(&temperature_mc.to_le_bytes());
                body
            }
            Message::Unknown { body, .. } => body.clone(),
        }
    }

    /// Encode the "extra" tail (§3, §9): owned variable-length data that
    /// rides behind the fixed body (version strings, sensor names).
    pub fn encode_extra(&self) -> Vec<u8> {
        match self {
            Message::DsmeVersion { version } => version.as_bytes().to_vec(),
            Message::ThermalStatusInd { sensor_name, .. } => sensor_name.as_bytes().to_vec(),
            Message::Unknown { extra, .. } => extra.clone(),
            _ => Vec::new(),
        }
    }

    /// Decode a message from its wire type id, fixed body, and extra bytes.
    ///
    /// A body whose length does not match [`registered size`](Self::registered_size)
    /// for a *known* type yields `Message::Unknown` rather than an error —
    /// per §3 that mismatch is a dispatcher-level silent drop, not a framing
    /// failure.
    pub fn decode(type_id: TypeId, body: &[u8], extra: &[u8]) -> Message {
        match type_id {
            t if t == self::type_id::CLOSE && body.is_empty() => Message::Close,
            t if t == self::type_id::STATE_QUERY && body.is_empty() => Message::StateQuery,
            t if t == self::type_id::SAVE_DATA_IND && body.is_empty() => Message::SaveDataInd,
            t if t == self::type_id::POWERUP_REQ && body.is_empty() => Message::PowerupReq,
            t if t == self::type_id::SHUTDOWN_REQ && body.is_empty() => Message::ShutdownReq,
            t if t == self::type_id::REBOOT_REQ && body.is_empty() => Message::RebootReq,
            t if t == self::type_id::GET_VERSION && body.is_empty() => Message::GetVersion,
            t if t == self::type_id::BATTERY_EMPTY_IND && body.is_empty() => Message::BatteryEmptyInd,
            t if t == self::type_id::IDLE && body.is_empty() => Message::Idle,
            t if t == self::type_id::DSME_VERSION => Message::DsmeVersion {
                version: String::from_utf8_lossy(extra).into_owned(),
            },
            t if t == self::type_id::STATE_CHANGE_IND && body.len() == 1 => {
                match DeviceState::from_u8(body[0]) {
                    Some(state) => Message::StateChangeInd { state },
                    None => unknown(type_id, body, extra),
                }
            }
            t if t == self::type_id::SET_ALARM_STATE && body.len() == 1 => {
                Message::SetAlarmState { alarm_set: decode_bool(body) }
            }
            t if t == self::type_id::SET_THERMAL_STATE && body.len() == 1 => {
                match ThermalStatus::from_u8(body[0]) {
                    Some(status) => Message::SetThermalState { status },
                    None => unknown(type_id, body, extra),
                }
            }
            t if t == self::type_id::SET_BATTERY_STATE && body.len() == 1 => {
                Message::SetBatteryState { battery_empty: decode_bool(body) }
            }
            t if t == self::type_id::SET_CHARGER_STATE && body.len() == 1 => {
                Message::SetChargerState { connected: decode_bool(body) }
            }
            t if t == self::type_id::SET_USB_STATE && body.len() == 1 => {
                Message::SetUsbState { mounted_to_pc: decode_bool(body) }
            }
            t if t == self::type_id::SET_EMERGENCY_CALL_STATE && body.len() == 1 => {
                Message::SetEmergencyCallState { ongoing: decode_bool(body) }
            }
            t if t == self::type_id::CHANGE_RUNLEVEL && body.len() == 1 => {
                Message::ChangeRunlevel { runlevel: body[0] }
            }
            t if t == self::type_id::SHUTDOWN && body.len() == 1 => {
                Message::Shutdown { runlevel: body[0] }
            }
            t if t == self::type_id::THERMAL_STATUS_IND && body.len() == 5 => {
                match ThermalStatus::from_u8(body[0]) {
                    Some(status) => Message::ThermalStatusInd {
                        status,
                        temperature_mc: i32::from_le_bytes(body[1..5].try_into().unwrap()),
                        sensor_name: String::from_utf8_lossy(extra).into_owned(),
                    },
                    None => unknown(type_id, body, extra),
                }
            }
            _ => unknown(type_id, body, extra),
        }
    }
}

fn unknown(type_id: TypeId, body: &[u8], extra: &[u8]) -> Message {
    Message::Unknown { type_id, body: body.to_vec(), extra: extra.to_vec() }
}
