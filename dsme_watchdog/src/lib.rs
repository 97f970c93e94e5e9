//! dsme_watchdog — the hardware watchdog device layer (§4.1).
//!
//! Opens, configures, feeds, and cleanly releases kernel watchdog character
//! devices. Used exclusively by the supervisor process (§5) — the worker
//! never touches these file descriptors.

pub mod ioctl;
pub mod table;

pub use table::{DeviceSpec, WatchdogError, WatchdogTable, MAX_WATCHDOGS};

use dsme_common::config::WatchdogConfig;

/// Build device specs from configuration, assigning a disable token per
/// device derived from its basename (so `DSME_RD_FLAGS` tokens like
/// `no-omap-wd` map onto `/dev/watchdog` and `no-ext-wd` onto a second
/// configured device, matching the source's convention).
pub fn device_specs_from_config(config: &WatchdogConfig) -> Vec<DeviceSpec> {
    config
        .devices
        .iter()
        .enumerate()
        .map(|(i, path)| DeviceSpec {
            path: path.clone(),
            timeout_s: Some(config.timeout_s),
            disable_token: disable_token_for_index(i),
        })
        .collect()
}

fn disable_token_for_index(i: usize) -> &'static str {
    match i {
        0 => "no-omap-wd",
        1 => "no-ext-wd",
        _ => "no-extra-wd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_conversion_assigns_conventional_disable_tokens() {
        let config = WatchdogConfig {
            devices: vec!["/dev/watchdog0".to_string(), "/dev/watchdog1".to_string()],
            ..WatchdogConfig::default()
        };
        let specs = device_specs_from_config(&config);
        assert_eq!(specs[0].disable_token, "no-omap-wd");
        assert_eq!(specs[1].disable_token, "no-ext-wd");
        assert_eq!(specs[0].timeout_s, Some(config.timeout_s));
    }
}
