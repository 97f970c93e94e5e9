//! Pure thermal-object polling and global-status aggregation (§4.9).
//!
//! Mirrors [`dsme_state::machine::StateMachine`]'s shape: a reactor-free core
//! that emits [`Output`] values instead of driving timers or sockets
//! directly, so it is testable without an event loop.

use dsme_common::consts::{
    THERMAL_POLL_DELAY_MIN_S, THERMAL_POLL_DELAY_RELAXED_MAX_S, THERMAL_POLL_DELAY_RELAXED_MIN_S,
    THERMAL_POLL_DELAY_TIGHT_MAX_S, THERMAL_TRANSITION_DEBOUNCE_S,
};
use dsme_protocol::ThermalStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error("no thermal object named {0:?} is registered")]
    UnknownObject(String),
    #[error("a thermal object named {0:?} is already registered")]
    DuplicateObject(String),
}

/// Identifies an armed per-object poll timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// (Re)arm this object's poll timer after the given delay.
    ArmPoll { object: String, timer: TimerId, after: Duration },
    /// The aggregate global status changed; broadcast it.
    GlobalStatusChanged { status: ThermalStatus, sensor_name: String, temperature_mc: i32 },
}

#[derive(Debug, Clone)]
struct Object {
    name: String,
    last_accepted: ThermalStatus,
    last_temperature_mc: i32,
    pending: Option<(ThermalStatus, i32, TimerId)>,
    poll_timer: Option<TimerId>,
}

/// Registers thermal objects, tracks their debounced status, and aggregates
/// a single global status from them (§4.9).
pub struct ThermalManager {
    objects: Vec<Object>,
    global: ThermalStatus,
    next_timer: u64,
}

impl Default for ThermalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalManager {
    pub fn new() -> Self {
        ThermalManager { objects: Vec::new(), global: ThermalStatus::Invalid, next_timer: 0 }
    }

    fn fresh_timer(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name == name)
    }

    /// Register a new thermal object and arm its first poll.
    pub fn register(&mut self, name: &str) -> Result<Output, ThermalError> {
        if self.index_of(name).is_some() {
            return Err(ThermalError::DuplicateObject(name.to_string()));
        }
        let timer = self.fresh_timer();
        self.objects.push(Object {
            name: name.to_string(),
            last_accepted: ThermalStatus::Invalid,
            last_temperature_mc: 0,
            pending: None,
            poll_timer: Some(timer),
        });
        Ok(Output::ArmPoll { object: name.to_string(), timer, after: relaxed_delay() })
    }

    /// Accept a fresh sample for `name`. Returns the poll rearm for that
    /// object plus, if the debounce elapsed and the global status moved, a
    /// `GlobalStatusChanged` output.
    pub fn on_sample(
        &mut self,
        name: &str,
        status: ThermalStatus,
        temperature_mc: i32,
    ) -> Result<Vec<Output>, ThermalError> {
        let index = self.index_of(name).ok_or_else(|| ThermalError::UnknownObject(name.to_string()))?;
        let mut outputs = Vec::new();

        let transitioning = status != self.objects[index].last_accepted;
        let debounce = if transitioning { Some(self.fresh_timer()) } else { None };

        if transitioning {
            self.objects[index].pending = Some((status, temperature_mc, debounce.unwrap()));
        } else {
            self.objects[index].pending = None;
            self.objects[index].last_temperature_mc = temperature_mc;
        }

        let delay = if transitioning { tight_delay() } else { relaxed_delay() };
        let poll_timer = self.fresh_timer();
        self.objects[index].poll_timer = Some(poll_timer);
        outputs.push(Output::ArmPoll { object: name.to_string(), timer: poll_timer, after: delay });

        if !transitioning {
            if let Some(changed) = self.recompute_global() {
                outputs.push(changed);
            }
        }

        Ok(outputs)
    }

    /// Fire a debounce timer previously returned as part of a transitioning
    /// sample: after [`THERMAL_TRANSITION_DEBOUNCE_S`] holds steady, the new
    /// status is accepted and the global status is recomputed. Since this
    /// core does not track which timers are debounce-vs-poll, callers drive
    /// this by calling [`Self::accept_pending`] once the debounce elapses.
    pub fn accept_pending(&mut self, name: &str) -> Result<Option<Output>, ThermalError> {
        let index = self.index_of(name).ok_or_else(|| ThermalError::UnknownObject(name.to_string()))?;
        if let Some((status, temperature_mc, _)) = self.objects[index].pending.take() {
            self.objects[index].last_accepted = status;
            self.objects[index].last_temperature_mc = temperature_mc;
        }
        Ok(self.recompute_global())
    }

    fn recompute_global(&mut self) -> Option<Output> {
        let statuses: Vec<ThermalStatus> = self.objects.iter().map(|o| o.last_accepted).collect();
        let new_global = aggregate(&statuses);
        if new_global == self.global {
            return None;
        }
        self.global = new_global;
        let worst = self
            .objects
            .iter()
            .filter(|o| o.last_accepted == new_global)
            .max_by_key(|o| o.last_temperature_mc)?;
        Some(Output::GlobalStatusChanged {
            status: new_global,
            sensor_name: worst.name.clone(),
            temperature_mc: worst.last_temperature_mc,
        })
    }

    pub fn global_status(&self) -> ThermalStatus {
        self.global
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(THERMAL_TRANSITION_DEBOUNCE_S)
    }
}

/// §4.9 global-status aggregation: max of ALERT/FATAL wins; else LOW wins;
/// else the maximum non-critical status.
fn aggregate(statuses: &[ThermalStatus]) -> ThermalStatus {
    if let Some(worst_critical) = statuses.iter().copied().filter(|s| s.is_critical()).max() {
        return worst_critical;
    }
    if statuses.iter().any(|s| *s == ThermalStatus::Low) {
        return ThermalStatus::Low;
    }
    statuses.iter().copied().max().unwrap_or(ThermalStatus::Invalid)
}

fn tight_delay() -> Duration {
    Duration::from_secs((THERMAL_POLL_DELAY_MIN_S + THERMAL_POLL_DELAY_TIGHT_MAX_S) / 2)
}

fn relaxed_delay() -> Duration {
    Duration::from_secs((THERMAL_POLL_DELAY_RELAXED_MIN_S + THERMAL_POLL_DELAY_RELAXED_MAX_S) / 2)
}
