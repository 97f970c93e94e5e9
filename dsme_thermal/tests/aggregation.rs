//! End-to-end aggregation scenarios driven through the public module API.

use dsme_bus::Bus;
use dsme_protocol::ThermalStatus;
use dsme_thermal::{ThermalManager, ThermalModule};

fn build() -> dsme_thermal::ThermalHandle {
    let (module, handle) = ThermalModule::new(ThermalManager::new());
    let mut bus = Bus::new();
    bus.load_module(Box::new(module), 0);
    handle
}

#[test]
fn two_objects_settle_on_the_worse_status_once_both_debounce() {
    let handle = build();
    dsme_thermal::module::register(&handle, "cpu");
    dsme_thermal::module::register(&handle, "battery");

    dsme_thermal::module::sample(&handle, "cpu", ThermalStatus::Normal, 40_000);
    dsme_thermal::module::accept_pending(&handle, "cpu");
    assert_eq!(handle.global_status(), ThermalStatus::Normal);

    dsme_thermal::module::sample(&handle, "battery", ThermalStatus::Alert, 80_000);
    // Not yet accepted: global status still reflects the prior reading.
    assert_eq!(handle.global_status(), ThermalStatus::Normal);
    let messages = dsme_thermal::module::accept_pending(&handle, "battery");
    assert_eq!(messages.len(), 2);
    assert_eq!(handle.global_status(), ThermalStatus::Alert);
}

#[test]
fn every_sample_rearms_the_objects_own_poll_timer() {
    let handle = build();
    dsme_thermal::module::register(&handle, "cpu");
    dsme_thermal::module::sample(&handle, "cpu", ThermalStatus::Normal, 40_000);
    let arms = handle.take_poll_arms();
    assert_eq!(arms.len(), 1);
    assert_eq!(arms[0].object, "cpu");
}
