//! End-to-end scenarios driven through `StateModule` + `Bus`, matching the
//! literal worked examples and testable properties.

use dsme_bus::Bus;
use dsme_protocol::{DeviceState, Endpoint, Message};
use dsme_state::{StateMachine, StateModule, TimerOp};

fn build() -> (Bus, dsme_state::StateHandle) {
    let machine = StateMachine::new(Some("ACT_DEAD"), false).unwrap();
    let (module, handle) = StateModule::new(machine);
    let mut bus = Bus::new();
    bus.load_module(Box::new(module), 0);
    (bus, handle)
}

#[test]
fn charger_disconnect_then_reconnect_before_grace_is_equivalent_to_no_input() {
    let (mut bus, handle) = build();

    bus.broadcast(Endpoint::System, Message::SetChargerState { connected: false });
    bus.process_message_queue();
    let ops = handle.take_timer_ops();
    assert_eq!(ops.len(), 1);

    bus.broadcast(Endpoint::System, Message::SetChargerState { connected: true });
    bus.process_message_queue();
    let cancel_ops = handle.take_timer_ops();
    assert_eq!(cancel_ops.len(), 1);
    assert!(matches!(cancel_ops[0], TimerOp::Cancel(_)));

    assert_eq!(handle.state(), DeviceState::Actdead);
}

#[test]
fn reboot_from_actdead_commits_after_its_timer_fires() {
    let (mut bus, handle) = build();
    bus.broadcast(Endpoint::System, Message::SetChargerState { connected: false });
    bus.process_message_queue();
    handle.take_timer_ops();

    bus.broadcast(Endpoint::System, Message::RebootReq);
    bus.process_message_queue();
    let ops = handle.take_timer_ops();
    let TimerOp::Arm { timer, .. } = ops[0] else { panic!("expected armed commit timer") };
    handle.fire_timer(timer);

    assert_eq!(handle.state(), DeviceState::Reboot);
}
