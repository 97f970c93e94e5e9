//! Adapts [`ThermalManager`] to [`dsme_bus::PolicyModule`].
//!
//! Mirrors `dsme_state::module`'s `Rc<RefCell<Shared>>` dual-handle pattern:
//! the bus owns an opaque `Box<dyn PolicyModule>`, while a [`ThermalHandle`]
//! held by the worker's timer service fires per-object poll and debounce
//! timers.

use crate::manager::{Output, ThermalManager, TimerId};
use dsme_bus::{HandlerSpec, ModuleContext, PolicyModule};
use dsme_protocol::{Endpoint, Message};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A timer the owning binary must arm against its reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollArm {
    pub object: String,
    pub timer: TimerId,
    pub after: Duration,
}

struct Shared {
    manager: ThermalManager,
    polls: Vec<PollArm>,
}

fn split(shared: &mut Shared, outputs: Vec<Output>) -> Vec<Message> {
    let mut messages = Vec::new();
    for out in outputs {
        match out {
            Output::ArmPoll { object, timer, after } => shared.polls.push(PollArm { object, timer, after }),
            Output::GlobalStatusChanged { status, sensor_name, temperature_mc } => {
                messages.push(Message::SetThermalState { status });
                messages.push(Message::ThermalStatusInd { status, temperature_mc, sensor_name });
            }
        }
    }
    messages
}

/// External handle to a loaded [`ThermalModule`]'s shared state.
#[derive(Clone)]
pub struct ThermalHandle(Rc<RefCell<Shared>>);

impl ThermalHandle {
    pub fn global_status(&self) -> dsme_protocol::ThermalStatus {
        self.0.borrow().manager.global_status()
    }

    /// Drain poll-timer arm requests queued since the last call.
    pub fn take_poll_arms(&self) -> Vec<PollArm> {
        std::mem::take(&mut self.0.borrow_mut().polls)
    }
}

pub const HANDLED: &[HandlerSpec] = &[];

/// The bus-loadable thermal policy module: not message-driven from the
/// outside (it is driven by timer fires via [`ThermalHandle`]), so it
/// registers no handlers of its own.
pub struct ThermalModule {
    shared: Rc<RefCell<Shared>>,
}

impl ThermalModule {
    pub fn new(manager: ThermalManager) -> (Self, ThermalHandle) {
        let shared = Rc::new(RefCell::new(Shared { manager, polls: Vec::new() }));
        (ThermalModule { shared: shared.clone() }, ThermalHandle(shared))
    }
}

impl PolicyModule for ThermalModule {
    fn name(&self) -> &'static str {
        "thermal"
    }

    fn handled_types(&self) -> &'static [HandlerSpec] {
        HANDLED
    }

    fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {}
}

/// Called by the owning binary when object `name`'s poll timer fires, with
/// the freshly sampled status and millidegree temperature. Returns messages
/// to broadcast.
pub fn sample(handle: &ThermalHandle, name: &str, status: dsme_protocol::ThermalStatus, temperature_mc: i32) -> Vec<Message> {
    let mut shared = handle.0.borrow_mut();
    let outputs = shared.manager.on_sample(name, status, temperature_mc).expect("registered object");
    split(&mut shared, outputs)
}

/// Called by the owning binary when object `name`'s debounce timer fires.
pub fn accept_pending(handle: &ThermalHandle, name: &str) -> Vec<Message> {
    let mut shared = handle.0.borrow_mut();
    let changed = shared.manager.accept_pending(name).expect("registered object");
    match changed {
        Some(out) => split(&mut shared, vec![out]),
        None => Vec::new(),
    }
}

/// Register a new thermal object, returning the initial poll arm.
pub fn register(handle: &ThermalHandle, name: &str) -> PollArm {
    let mut shared = handle.0.borrow_mut();
    let output = shared.manager.register(name).expect("name not already registered");
    match output {
        Output::ArmPoll { object, timer, after } => PollArm { object, timer, after },
        Output::GlobalStatusChanged { .. } => unreachable!("register never changes global status"),
    }
}
