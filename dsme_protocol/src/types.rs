//! Registered message types and their wire identifiers.
//!
//! Values marked "stable" come directly from the external interface table;
//! the rest fill out the state-machine input/output vocabulary without an
//! assigned wire number, chosen from unused ranges so they never collide
//! with the stable set.

/// 32-bit message-type identifier, as carried in the wire header's `type_` field.
pub type TypeId = u32;

#[allow(missing_docs)]
pub mod type_id {
    use super::TypeId;

    // ─── Stable (externally documented) ────────────────────────────
    pub const CLOSE: TypeId = 0x0000_0001;
    pub const STATE_CHANGE_IND: TypeId = 0x0000_0301;
    pub const STATE_QUERY: TypeId = 0x0000_0302;
    pub const SAVE_DATA_IND: TypeId = 0x0000_0304;
    pub const POWERUP_REQ: TypeId = 0x0000_0305;
    pub const SHUTDOWN_REQ: TypeId = 0x0000_0306;
    pub const SET_ALARM_STATE: TypeId = 0x0000_0307;
    pub const REBOOT_REQ: TypeId = 0x0000_0308;
    pub const SET_THERMAL_STATE: TypeId = 0x0000_0312;
    pub const SET_BATTERY_STATE: TypeId = 0x0000_0314;
    pub const GET_VERSION: TypeId = 0x0000_1100;
    pub const DSME_VERSION: TypeId = 0x0000_1101;

    // ─── State-machine inputs/outputs not independently numbered ──
    pub const SET_CHARGER_STATE: TypeId = 0x0000_0309;
    pub const SET_USB_STATE: TypeId = 0x0000_030A;
    pub const SET_EMERGENCY_CALL_STATE: TypeId = 0x0000_030B;
    pub const CHANGE_RUNLEVEL: TypeId = 0x0000_030C;
    pub const SHUTDOWN: TypeId = 0x0000_030D;
    pub const BATTERY_EMPTY_IND: TypeId = 0x0000_030E;

    // ─── Internal bus housekeeping ──────────────────────────────────
    pub const IDLE: TypeId = 0x0000_0200;
    pub const THERMAL_STATUS_IND: TypeId = 0x0000_0320;
}

/// Device runlevel, as driven by `CHANGE_RUNLEVEL` / `SHUTDOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Runlevel {
    Shutdown = 0,
    User = 2,
    Actdead = 5,
    Reboot = 6,
    Malfunction = 8,
}

impl Runlevel {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Runlevel::Shutdown),
            2 => Some(Runlevel::User),
            5 => Some(Runlevel::Actdead),
            6 => Some(Runlevel::Reboot),
            8 => Some(Runlevel::Malfunction),
            _ => None,
        }
    }
}

/// Device state, as broadcast in `STATE_CHANGE_IND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Shutdown = 0,
    User = 1,
    Actdead = 2,
    Reboot = 3,
    Boot = 4,
    NotSet = 5,
    Test = 6,
    Malf = 7,
    Local = 8,
}

impl DeviceState {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DeviceState::Shutdown),
            1 => Some(DeviceState::User),
            2 => Some(DeviceState::Actdead),
            3 => Some(DeviceState::Reboot),
            4 => Some(DeviceState::Boot),
            5 => Some(DeviceState::NotSet),
            6 => Some(DeviceState::Test),
            7 => Some(DeviceState::Malf),
            8 => Some(DeviceState::Local),
            _ => None,
        }
    }
}

/// Aggregate thermal status lattice (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ThermalStatus {
    Invalid = 0,
    Low = 1,
    Normal = 2,
    Warning = 3,
    Alert = 4,
    Fatal = 5,
}

impl ThermalStatus {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ThermalStatus::Invalid),
            1 => Some(ThermalStatus::Low),
            2 => Some(ThermalStatus::Normal),
            3 => Some(ThermalStatus::Warning),
            4 => Some(ThermalStatus::Alert),
            5 => Some(ThermalStatus::Fatal),
            _ => None,
        }
    }

    /// Whether this status belongs to the critical (`ALERT`/`FATAL`) band.
    pub fn is_critical(self) -> bool {
        matches!(self, ThermalStatus::Alert | ThermalStatus::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_type_ids_match_spec() {
        assert_eq!(type_id::CLOSE, 0x0000_0001);
        assert_eq!(type_id::STATE_CHANGE_IND, 0x0000_0301);
        assert_eq!(type_id::STATE_QUERY, 0x0000_0302);
        assert_eq!(type_id::SAVE_DATA_IND, 0x0000_0304);
        assert_eq!(type_id::POWERUP_REQ, 0x0000_0305);
        assert_eq!(type_id::SHUTDOWN_REQ, 0x0000_0306);
        assert_eq!(type_id::SET_ALARM_STATE, 0x0000_0307);
        assert_eq!(type_id::REBOOT_REQ, 0x0000_0308);
        assert_eq!(type_id::SET_THERMAL_STATE, 0x0000_0312);
        assert_eq!(type_id::SET_BATTERY_STATE, 0x0000_0314);
        assert_eq!(type_id::GET_VERSION, 0x0000_1100);
        assert_eq!(type_id::DSME_VERSION, 0x0000_1101);
    }

    #[test]
    fn extension_ids_do_not_collide_with_stable_ids() {
        let stable = [
            type_id::CLOSE,
            type_id::STATE_CHANGE_IND,
            type_id::STATE_QUERY,
            type_id::SAVE_DATA_IND,
            type_id::POWERUP_REQ,
            type_id::SHUTDOWN_REQ,
            type_id::SET_ALARM_STATE,
            type_id::REBOOT_REQ,
            type_id::SET_THERMAL_STATE,
            type_id::SET_BATTERY_STATE,
            type_id::GET_VERSION,
            type_id::DSME_VERSION,
        ];
        let extensions = [
            type_id::SET_CHARGER_STATE,
            type_id::SET_USB_STATE,
            type_id::SET_EMERGENCY_CALL_STATE,
            type_id::CHANGE_RUNLEVEL,
            type_id::SHUTDOWN,
            type_id::BATTERY_EMPTY_IND,
            type_id::IDLE,
            type_id::THERMAL_STATUS_IND,
        ];
        for e in extensions {
            assert!(!stable.contains(&e), "extension id {e:#x} collides with a stable id");
        }
    }

    #[test]
    fn runlevel_roundtrip() {
        for rl in [
            Runlevel::Shutdown,
            Runlevel::User,
            Runlevel::Actdead,
            Runlevel::Reboot,
            Runlevel::Malfunction,
        ] {
            assert_eq!(Runlevel::from_u8(rl as u8), Some(rl));
        }
        assert_eq!(Runlevel::from_u8(99), None);
    }

    #[test]
    fn thermal_status_ordering_and_criticality() {
        assert!(ThermalStatus::Fatal > ThermalStatus::Alert);
        assert!(ThermalStatus::Alert > ThermalStatus::Warning);
        assert!(ThermalStatus::Low < ThermalStatus::Normal);
        assert!(ThermalStatus::Alert.is_critical());
        assert!(ThermalStatus::Fatal.is_critical());
        assert!(!ThermalStatus::Warning.is_critical());
        assert!(!ThermalStatus::Low.is_critical());
    }
}
