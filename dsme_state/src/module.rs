//! Adapts [`StateMachine`] to the [`PolicyModule`] trait so it can be
//! loaded into a [`dsme_bus::Bus`].
//!
//! `ArmTimer`/`CancelTimer` outputs cannot travel through
//! [`dsme_bus::ModuleContext`] (it only queues messages), so they are
//! buffered on a side channel shared with a [`StateHandle`] the owning
//! binary keeps around to drive the timer service and replay fired timers
//! back into the machine.

use crate::machine::{Output, StateMachine, TimerId};
use dsme_bus::{HandlerSpec, ModuleContext, PolicyModule};
use dsme_protocol::{type_id, Endpoint, Message};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A pending timer request the state module wants scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerOp {
    Arm { timer: TimerId, after: Duration },
    Cancel(TimerId),
}

struct Shared {
    machine: StateMachine,
    timer_ops: Vec<TimerOp>,
}

fn split_outputs(shared: &mut Shared, outputs: Vec<Output>) -> Vec<Message> {
    let mut messages = Vec::new();
    for output in outputs {
        match output {
            Output::Broadcast(message) => messages.push(message),
            Output::ArmTimer { timer, after } => shared.timer_ops.push(TimerOp::Arm { timer, after }),
            Output::CancelTimer(timer) => shared.timer_ops.push(TimerOp::Cancel(timer)),
        }
    }
    messages
}

/// Handle kept by the owning binary to fire timers back into the machine
/// and inspect its current state, independent of the `Box<dyn PolicyModule>`
/// the bus owns.
#[derive(Clone)]
pub struct StateHandle(Rc<RefCell<Shared>>);

impl StateHandle {
    /// Advance a timer to completion, returning messages to broadcast.
    pub fn fire_timer(&self, timer: TimerId) -> Vec<Message> {
        let mut shared = self.0.borrow_mut();
        let outputs = shared.machine.on_timer_fire(timer);
        split_outputs(&mut shared, outputs)
    }

    /// Drain pending timer scheduling requests produced by the most recent
    /// dispatch; the caller is responsible for actually arming/cancelling
    /// them on its reactor.
    pub fn take_timer_ops(&self) -> Vec<TimerOp> {
        std::mem::take(&mut self.0.borrow_mut().timer_ops)
    }

    pub fn state(&self) -> dsme_protocol::DeviceState {
        self.0.borrow().machine.state()
    }
}

const HANDLED: &[HandlerSpec] = &[
    HandlerSpec::new(type_id::SHUTDOWN_REQ, 0),
    HandlerSpec::new(type_id::REBOOT_REQ, 0),
    HandlerSpec::new(type_id::POWERUP_REQ, 0),
    HandlerSpec::new(type_id::STATE_QUERY, 0),
    HandlerSpec::new(type_id::SET_CHARGER_STATE, 1),
    HandlerSpec::new(type_id::SET_ALARM_STATE, 1),
    HandlerSpec::new(type_id::SET_EMERGENCY_CALL_STATE, 1),
    HandlerSpec::new(type_id::SET_USB_STATE, 1),
    HandlerSpec::new(type_id::SET_BATTERY_STATE, 1),
    HandlerSpec::new(type_id::SET_THERMAL_STATE, 1),
];

/// The bus-facing module. Its `handle` forwards every state-relevant
/// message into the shared [`StateMachine`] and turns `Output::Broadcast`
/// entries into bus broadcasts (§4.7).
pub struct StateModule {
    shared: Rc<RefCell<Shared>>,
}

impl StateModule {
    /// Build the module plus the [`StateHandle`] used to drive its timers.
    pub fn new(machine: StateMachine) -> (StateModule, StateHandle) {
        let shared = Rc::new(RefCell::new(Shared { machine, timer_ops: Vec::new() }));
        (StateModule { shared: shared.clone() }, StateHandle(shared))
    }
}

impl PolicyModule for StateModule {
    fn name(&self) -> &'static str {
        "state"
    }

    fn handled_types(&self) -> &[HandlerSpec] {
        HANDLED
    }

    fn handle(&mut self, ctx: &mut ModuleContext, _from: Endpoint, message: &Message) {
        let mut shared = self.shared.borrow_mut();
        let outputs = shared.machine.handle_message(message);
        for msg in split_outputs(&mut shared, outputs) {
            ctx.broadcast(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_bus::Bus;

    #[test]
    fn loaded_module_dispatches_through_the_bus() {
        let machine = StateMachine::new(Some("USER"), false).unwrap();
        let (module, handle) = StateModule::new(machine);
        let mut bus = Bus::new();
        bus.load_module(Box::new(module), 0);

        bus.send(Endpoint::System, dsme_protocol::ModuleId(0), Message::SetChargerState { connected: false });
        bus.process_message_queue();
        bus.broadcast(Endpoint::System, Message::ShutdownReq);
        bus.process_message_queue();

        let ops = handle.take_timer_ops();
        assert_eq!(ops.len(), 1);
        let TimerOp::Arm { timer, .. } = ops[0] else { panic!("expected an armed timer") };
        handle.fire_timer(timer);
        assert_eq!(handle.state(), dsme_protocol::DeviceState::Shutdown);
    }
}
