//! Integration tests for `WatchdogTable` against a real character device
//! substitute (`/dev/null`), since no actual watchdog hardware is present
//! in a test environment.

use dsme_watchdog::table::{DeviceSpec, WatchdogTable};

#[test]
fn kick_writes_to_every_opened_descriptor_in_order() {
    // /dev/null accepts writes unconditionally, letting us exercise the
    // kick-in-order loop without real watchdog hardware.
    let devices = vec![
        DeviceSpec { path: "/dev/null".to_string(), timeout_s: None, disable_token: "none" },
        DeviceSpec { path: "/dev/null".to_string(), timeout_s: None, disable_token: "none" },
    ];
    let mut table = WatchdogTable::new(devices).unwrap();
    // SAFETY: test-only env mutation.
    unsafe { std::env::remove_var("DSME_RD_FLAGS") };
    let opened = table.init().expect("should open /dev/null twice");
    assert!(opened);
    assert_eq!(table.open_count(), 2);

    // Kicking and quitting must not panic; quit clears every descriptor.
    table.kick();
    table.kick_from_signal_handler();
    table.quit();
    assert_eq!(table.open_count(), 0);
}

#[test]
fn rd_mode_with_all_devices_disabled_tolerates_zero_opened() {
    // SAFETY: test-only env mutation.
    unsafe { std::env::set_var("DSME_RD_FLAGS", "no-omap-wd") };
    let devices = vec![DeviceSpec {
        path: "/dev/dsme_test_missing_watchdog".to_string(),
        timeout_s: None,
        disable_token: "no-omap-wd",
    }];
    let mut table = WatchdogTable::new(devices).unwrap();
    let result = table.init();
    // SAFETY: test-only env mutation.
    unsafe { std::env::remove_var("DSME_RD_FLAGS") };
    assert_eq!(result.unwrap(), false);
    assert_eq!(table.open_count(), 0);
}
