//! The device state machine's pure transition logic (§4.7).
//!
//! Deliberately free of any event-loop or bus dependency so the transition
//! table can be exercised directly against named scenarios in isolation.
//! Timer scheduling is represented as data (`Output::ArmTimer`); the caller
//! (the `StateModule` adapter in [`crate::module`]) is responsible for
//! actually scheduling it and calling [`StateMachine::on_timer_fire`] back.

use dsme_protocol::{DeviceState, Message};
use std::time::Duration;
use thiserror::Error;

/// Grace period between the first and second phase of a committed
/// transition (§4.7's two-phase commit).
pub const COMMIT_GRACE: Duration = Duration::from_secs(2);
/// Grace period before an ACTDEAD charger-detach turns into a real shutdown.
pub const ACTDEAD_DETACH_GRACE: Duration = Duration::from_secs(5);
/// Grace period before an empty battery commits to shutdown.
pub const BATTERY_EMPTY_GRACE: Duration = Duration::from_secs(3);
/// Grace period before sustained overheating commits to shutdown.
pub const THERMAL_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Opaque handle to a timer armed by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("BOOTSTATE={0:?} is not a recognized state and R&D mode is not active")]
    UnrecognizedBootstateWithoutRd(String),
}

/// A side effect produced by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Broadcast this message on the bus.
    Broadcast(Message),
    /// Schedule `timer` to fire after `after`; [`StateMachine::on_timer_fire`]
    /// must be called with the same id once it does.
    ArmTimer { timer: TimerId, after: Duration },
    /// Cancel a previously armed timer; it must not fire.
    CancelTimer(TimerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Shutdown,
    Reboot,
}

struct PendingCommit {
    timer: TimerId,
    target: DeviceState,
    runlevel: u8,
}

/// The device state machine (§3, §4.7).
pub struct StateMachine {
    state: DeviceState,
    rd_mode: bool,
    charger_connected: bool,
    usb_mounted_to_pc: bool,
    emergency_call_ongoing: bool,
    alarm_pending: bool,
    deferred: Option<Deferred>,
    pending_commit: Option<PendingCommit>,
    actdead_detach_timer: Option<TimerId>,
    battery_shutdown_timer: Option<TimerId>,
    thermal_shutdown_timer: Option<TimerId>,
    next_timer: u64,
}

fn bootstate_from_str(s: &str) -> Option<DeviceState> {
    match s {
        "USER" => Some(DeviceState::User),
        "ACT_DEAD" => Some(DeviceState::Actdead),
        "SHUTDOWN" => Some(DeviceState::Shutdown),
        "BOOT" => Some(DeviceState::Boot),
        "TEST" => Some(DeviceState::Test),
        "LOCAL" => Some(DeviceState::Local),
        _ => None,
    }
}

impl StateMachine {
    /// Build the machine from the `BOOTSTATE` environment value (§6). A
    /// missing value boots into [`DeviceState::NotSet`]; an unrecognized
    /// value boots into [`DeviceState::Malf`] and requires `rd_mode` to be
    /// tolerated (§4.7, §7).
    pub fn new(bootstate: Option<&str>, rd_mode: bool) -> Result<Self, StateError> {
        let state = match bootstate {
            None => DeviceState::NotSet,
            Some(s) => match bootstate_from_str(s) {
                Some(state) => state,
                None if rd_mode => DeviceState::Malf,
                None => return Err(StateError::UnrecognizedBootstateWithoutRd(s.to_string())),
            },
        };
        Ok(StateMachine {
            state,
            rd_mode,
            charger_connected: false,
            usb_mounted_to_pc: false,
            emergency_call_ongoing: false,
            alarm_pending: false,
            deferred: None,
            pending_commit: None,
            actdead_detach_timer: None,
            battery_shutdown_timer: None,
            thermal_shutdown_timer: None,
            next_timer: 0,
        })
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn rd_mode(&self) -> bool {
        self.rd_mode
    }

    fn alloc_timer(&mut self) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        id
    }

    /// Dispatch one state-relevant input message, producing zero or more
    /// outputs (§4.7).
    pub fn handle_message(&mut self, message: &Message) -> Vec<Output> {
        match *message {
            Message::ShutdownReq => self.begin_shutdown_request(),
            Message::RebootReq => self.begin_reboot_request(),
            Message::PowerupReq => self.handle_powerup(),
            Message::StateQuery => vec![Output::Broadcast(Message::StateChangeInd { state: self.state })],
            Message::SetChargerState { connected } => self.handle_charger_state(connected),
            Message::SetAlarmState { alarm_set } => {
                self.alarm_pending = alarm_set;
                vec![]
            }
            Message::SetEmergencyCallState { ongoing } => self.handle_emergency_call(ongoing),
            Message::SetUsbState { mounted_to_pc } => self.handle_usb_state(mounted_to_pc),
            Message::SetBatteryState { battery_empty } => self.handle_battery_state(battery_empty),
            Message::SetThermalState { status } => self.handle_thermal_state(status),
            _ => vec![],
        }
    }

    /// Advance a previously armed timer to completion (§4.7 phase two, or
    /// one of the deferred-grace timers).
    pub fn on_timer_fire(&mut self, timer: TimerId) -> Vec<Output> {
        if matches!(&self.pending_commit, Some(p) if p.timer == timer) {
            let pending = self.pending_commit.take().unwrap();
            self.state = pending.target;
            let output = if pending.target == DeviceState::Shutdown {
                Message::Shutdown { runlevel: pending.runlevel }
            } else {
                Message::ChangeRunlevel { runlevel: pending.runlevel }
            };
            return vec![Output::Broadcast(output)];
        }
        if self.actdead_detach_timer == Some(timer) {
            self.actdead_detach_timer = None;
            self.state = DeviceState::Shutdown;
            return vec![
                Output::Broadcast(Message::StateChangeInd { state: DeviceState::Shutdown }),
                Output::Broadcast(Message::SaveDataInd),
                Output::Broadcast(Message::Shutdown { runlevel: 0 }),
            ];
        }
        if self.battery_shutdown_timer == Some(timer) {
            self.battery_shutdown_timer = None;
            let mut outputs = vec![Output::Broadcast(Message::BatteryEmptyInd)];
            outputs.extend(self.begin_transition(DeviceState::Shutdown, 0));
            return outputs;
        }
        if self.thermal_shutdown_timer == Some(timer) {
            self.thermal_shutdown_timer = None;
            return self.begin_transition(DeviceState::Shutdown, 0);
        }
        Vec::new()
    }

    fn begin_shutdown_request(&mut self) -> Vec<Output> {
        if self.emergency_call_ongoing || self.usb_mounted_to_pc {
            self.deferred = Some(Deferred::Shutdown);
            return vec![];
        }
        self.commit_shutdown_target()
    }

    fn begin_reboot_request(&mut self) -> Vec<Output> {
        if self.emergency_call_ongoing || self.usb_mounted_to_pc {
            self.deferred = Some(Deferred::Reboot);
            return vec![];
        }
        self.begin_transition(DeviceState::Reboot, 6)
    }

    fn commit_shutdown_target(&mut self) -> Vec<Output> {
        if self.charger_connected && !self.alarm_pending {
            self.begin_transition(DeviceState::Actdead, 5)
        } else {
            self.begin_transition(DeviceState::Shutdown, 0)
        }
    }

    fn handle_powerup(&mut self) -> Vec<Output> {
        if self.state == DeviceState::Actdead {
            self.begin_transition(DeviceState::User, 2)
        } else {
            vec![]
        }
    }

    fn begin_transition(&mut self, target: DeviceState, runlevel: u8) -> Vec<Output> {
        let timer = self.alloc_timer();
        self.pending_commit = Some(PendingCommit { timer, target, runlevel });
        vec![
            Output::Broadcast(Message::StateChangeInd { state: target }),
            Output::Broadcast(Message::SaveDataInd),
            Output::ArmTimer { timer, after: COMMIT_GRACE },
        ]
    }

    fn handle_charger_state(&mut self, connected: bool) -> Vec<Output> {
        self.charger_connected = connected;
        if self.state != DeviceState::Actdead {
            return vec![];
        }
        if connected {
            if let Some(timer) = self.actdead_detach_timer.take() {
                return vec![Output::CancelTimer(timer)];
            }
            vec![]
        } else {
            let timer = self.alloc_timer();
            self.actdead_detach_timer = Some(timer);
            vec![Output::ArmTimer { timer, after: ACTDEAD_DETACH_GRACE }]
        }
    }

    fn handle_emergency_call(&mut self, ongoing: bool) -> Vec<Output> {
        self.emergency_call_ongoing = ongoing;
        if ongoing {
            return vec![];
        }
        self.resume_deferred_if_unblocked()
    }

    fn handle_usb_state(&mut self, mounted_to_pc: bool) -> Vec<Output> {
        self.usb_mounted_to_pc = mounted_to_pc;
        if mounted_to_pc {
            return vec![];
        }
        self.resume_deferred_if_unblocked()
    }

    /// Resume a deferred shutdown/reboot request, unless it is still
    /// blocked by the *other* deferral source (an ongoing emergency call or
    /// a mounted-to-PC USB state each independently block resumption; per
    /// §4.7 both must have cleared before the original request proceeds).
    fn resume_deferred_if_unblocked(&mut self) -> Vec<Output> {
        if self.emergency_call_ongoing || self.usb_mounted_to_pc {
            return vec![];
        }
        match self.deferred.take() {
            Some(Deferred::Shutdown) => {
                let (target, runlevel) = if self.charger_connected && !self.alarm_pending {
                    (DeviceState::Actdead, 5u8)
                } else {
                    (DeviceState::Shutdown, 0u8)
                };
                self.state = target;
                let second = if target == DeviceState::Shutdown {
                    Message::Shutdown { runlevel }
                } else {
                    Message::ChangeRunlevel { runlevel }
                };
                vec![
                    Output::Broadcast(Message::StateChangeInd { state: target }),
                    Output::Broadcast(Message::SaveDataInd),
                    Output::Broadcast(second),
                ]
            }
            Some(Deferred::Reboot) => {
                self.state = DeviceState::Reboot;
                vec![
                    Output::Broadcast(Message::StateChangeInd { state: DeviceState::Reboot }),
                    Output::Broadcast(Message::SaveDataInd),
                    Output::Broadcast(Message::ChangeRunlevel { runlevel: 6 }),
                ]
            }
            None => vec![],
        }
    }

    fn handle_battery_state(&mut self, battery_empty: bool) -> Vec<Output> {
        if !battery_empty {
            return vec![];
        }
        if self.battery_shutdown_timer.is_some() {
            return vec![];
        }
        let timer = self.alloc_timer();
        self.battery_shutdown_timer = Some(timer);
        vec![Output::ArmTimer { timer, after: BATTERY_EMPTY_GRACE }]
    }

    fn handle_thermal_state(&mut self, status: dsme_protocol::ThermalStatus) -> Vec<Output> {
        if !status.is_critical() {
            // Cooling down does not cancel a shutdown already in grace.
            return vec![];
        }
        if self.thermal_shutdown_timer.is_some() {
            return vec![];
        }
        let timer = self.alloc_timer();
        self.thermal_shutdown_timer = Some(timer);
        vec![Output::ArmTimer { timer, after: THERMAL_SHUTDOWN_GRACE }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_protocol::ThermalStatus;

    fn broadcasts(outputs: &[Output]) -> Vec<&Message> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Broadcast(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unrecognized_bootstate_without_rd_mode_is_fatal() {
        assert!(matches!(
            StateMachine::new(Some("GARBAGE"), false),
            Err(StateError::UnrecognizedBootstateWithoutRd(_))
        ));
    }

    #[test]
    fn unrecognized_bootstate_with_rd_mode_boots_into_malf() {
        let sm = StateMachine::new(Some("GARBAGE"), true).unwrap();
        assert_eq!(sm.state(), DeviceState::Malf);
    }

    #[test]
    fn missing_bootstate_is_not_set() {
        let sm = StateMachine::new(None, false).unwrap();
        assert_eq!(sm.state(), DeviceState::NotSet);
    }

    #[test]
    fn scenario_a_clean_user_shutdown() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        assert!(sm.handle_message(&Message::SetChargerState { connected: false }).is_empty());

        let outputs = sm.handle_message(&Message::ShutdownReq);
        assert_eq!(
            broadcasts(&outputs),
            vec![
                &Message::StateChangeInd { state: DeviceState::Shutdown },
                &Message::SaveDataInd
            ]
        );
        let timer = outputs
            .iter()
            .find_map(|o| match o {
                Output::ArmTimer { timer, .. } => Some(*timer),
                _ => None,
            })
            .expect("commit timer must be armed");

        let fired = sm.on_timer_fire(timer);
        assert_eq!(broadcasts(&fired), vec![&Message::Shutdown { runlevel: 0 }]);
    }

    #[test]
    fn scenario_b_shutdown_with_charger_becomes_actdead() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        sm.handle_message(&Message::SetChargerState { connected: true });

        let outputs = sm.handle_message(&Message::ShutdownReq);
        assert_eq!(
            broadcasts(&outputs),
            vec![
                &Message::StateChangeInd { state: DeviceState::Actdead },
                &Message::SaveDataInd
            ]
        );
        let timer = outputs
            .iter()
            .find_map(|o| match o {
                Output::ArmTimer { timer, .. } => Some(*timer),
                _ => None,
            })
            .unwrap();

        let fired = sm.on_timer_fire(timer);
        assert_eq!(broadcasts(&fired), vec![&Message::ChangeRunlevel { runlevel: 5 }]);
    }

    #[test]
    fn scenario_c_actdead_charger_detach_grace_window() {
        let mut sm = StateMachine::new(Some("ACT_DEAD"), false).unwrap();
        assert!(sm.handle_message(&Message::SetChargerState { connected: true }).is_empty());

        let detach = sm.handle_message(&Message::SetChargerState { connected: false });
        assert!(broadcasts(&detach).is_empty());
        let timer = detach
            .iter()
            .find_map(|o| match o {
                Output::ArmTimer { timer, .. } => Some(*timer),
                _ => None,
            })
            .expect("detach timer must be armed");

        let reconnect = sm.handle_message(&Message::SetChargerState { connected: true });
        assert!(matches!(reconnect.as_slice(), [Output::CancelTimer(t)] if *t == timer));

        let second_detach = sm.handle_message(&Message::SetChargerState { connected: false });
        let second_timer = second_detach
            .iter()
            .find_map(|o| match o {
                Output::ArmTimer { timer, .. } => Some(*timer),
                _ => None,
            })
            .unwrap();

        let fired = sm.on_timer_fire(second_timer);
        assert_eq!(
            broadcasts(&fired),
            vec![
                &Message::StateChangeInd { state: DeviceState::Shutdown },
                &Message::SaveDataInd,
                &Message::Shutdown { runlevel: 0 }
            ]
        );
    }

    #[test]
    fn scenario_d_emergency_call_defers_shutdown() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        sm.handle_message(&Message::SetChargerState { connected: false });
        sm.handle_message(&Message::SetEmergencyCallState { ongoing: true });

        let during_call = sm.handle_message(&Message::ShutdownReq);
        assert!(during_call.is_empty(), "shutdown must be fully deferred while a call is ongoing");

        let after_call = sm.handle_message(&Message::SetEmergencyCallState { ongoing: false });
        assert_eq!(
            broadcasts(&after_call),
            vec![
                &Message::StateChangeInd { state: DeviceState::Shutdown },
                &Message::SaveDataInd,
                &Message::Shutdown { runlevel: 0 }
            ]
        );
    }

    #[test]
    fn usb_mount_outlives_an_unrelated_emergency_call_end() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        sm.handle_message(&Message::SetChargerState { connected: false });
        sm.handle_message(&Message::SetUsbState { mounted_to_pc: true });

        let deferred = sm.handle_message(&Message::ShutdownReq);
        assert!(deferred.is_empty(), "shutdown must be deferred while USB is mounted to a PC");

        let after_call_end = sm.handle_message(&Message::SetEmergencyCallState { ongoing: false });
        assert!(
            after_call_end.is_empty(),
            "ending a call that was never ongoing must not resume a USB-blocked shutdown"
        );
        assert_eq!(sm.state(), DeviceState::User);

        let after_unmount = sm.handle_message(&Message::SetUsbState { mounted_to_pc: false });
        assert_eq!(
            broadcasts(&after_unmount),
            vec![
                &Message::StateChangeInd { state: DeviceState::Shutdown },
                &Message::SaveDataInd,
                &Message::Shutdown { runlevel: 0 }
            ],
            "unmounting USB must resume the deferred shutdown on its own trigger"
        );
    }

    #[test]
    fn property_state_monotonicity_for_reboot() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        let outputs = sm.handle_message(&Message::RebootReq);
        assert_eq!(
            broadcasts(&outputs),
            vec![&Message::StateChangeInd { state: DeviceState::Reboot }, &Message::SaveDataInd]
        );

        // No subsequent input returns the machine to USER.
        sm.handle_message(&Message::PowerupReq);
        sm.handle_message(&Message::SetChargerState { connected: true });
        assert_ne!(sm.state(), DeviceState::User);
    }

    #[test]
    fn thermal_cooldown_does_not_cancel_a_shutdown_already_in_grace() {
        let mut sm = StateMachine::new(Some("USER"), false).unwrap();
        let armed = sm.handle_message(&Message::SetThermalState { status: ThermalStatus::Fatal });
        assert!(armed.iter().any(|o| matches!(o, Output::ArmTimer { .. })));

        let cooldown = sm.handle_message(&Message::SetThermalState { status: ThermalStatus::Normal });
        assert!(cooldown.is_empty());
    }
}
