//! Configuration loading traits and types.
//!
//! Provides a standardized way to load the TOML configuration file shared
//! by the supervisor and worker processes.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dsme_common::config::{ConfigLoader, DsmeConfig};
//! use std::path::Path;
//!
//! let config = DsmeConfig::load(Path::new("/etc/dsme/dsme.toml")).expect("load config");
//! println!("watchdog device: {}", config.watchdog.device);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Log level for configuration (mirrors `tracing::Level`, serializable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level verbosity.
    Trace,
    /// Debug-level verbosity.
    Debug,
    /// Info-level verbosity (default).
    Info,
    /// Warning-level verbosity.
    Warn,
    /// Error-level verbosity.
    Error,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// Unknown field in TOML (strict parsing with `deny_unknown_fields`).
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Common configuration fields shared across the supervisor and worker.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "dsmed"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Provides a default implementation for any type implementing
/// `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::UnknownField` if an unrecognized key is present
///   on a `deny_unknown_fields` struct
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("unknown field") {
                ConfigError::UnknownField(msg)
            } else {
                ConfigError::ParseError(msg)
            }
        })
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── WatchdogConfig ────────────────────────────────────────────────

fn default_device() -> String {
    crate::consts::DEFAULT_WATCHDOG_DEVICE.to_string()
}
fn default_kick_interval_s() -> u64 {
    crate::consts::WATCHDOG_KICK_INTERVAL_S
}
fn default_timeout_s() -> u32 {
    crate::consts::WATCHDOG_TIMEOUT_S
}
fn default_sigterm_grace_s() -> u64 {
    crate::consts::SUPERVISOR_SIGTERM_GRACE_S
}
fn default_sigkill_grace_s() -> u64 {
    crate::consts::SUPERVISOR_SIGKILL_GRACE_S
}

/// Hardware watchdog configuration — read by the supervisor process.
///
/// Multiple devices may be listed; they are kicked in table order and
/// kicking stops at the first descriptor that fails (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Watchdog character device paths, kicked in order.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    /// Heartbeat interval between kicks, in seconds (1..=60). Must leave at
    /// least [`crate::consts::HEARTBEAT_SAFETY_MARGIN_S`] of margin before
    /// `timeout_s`, matching the shortest-watchdog-period-minus-margin
    /// derivation of the heartbeat interval.
    #[serde(default = "default_kick_interval_s")]
    pub kick_interval_s: u64,
    /// Hardware timeout programmed via `WDIOC_SETTIMEOUT`, in seconds (2..=300).
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u32,
    /// SIGTERM grace period before escalating to SIGKILL, in seconds.
    #[serde(default = "default_sigterm_grace_s")]
    pub sigterm_grace_s: u64,
    /// SIGKILL grace period before giving up on the worker, in seconds.
    #[serde(default = "default_sigkill_grace_s")]
    pub sigkill_grace_s: u64,
}

fn default_devices() -> Vec<String> {
    vec![default_device()]
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            kick_interval_s: default_kick_interval_s(),
            timeout_s: default_timeout_s(),
            sigterm_grace_s: default_sigterm_grace_s(),
            sigkill_grace_s: default_sigkill_grace_s(),
        }
    }
}

impl WatchdogConfig {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::ValidationError(
                "watchdog.devices must list at least one device".to_string(),
            ));
        }
        if !(1..=60).contains(&self.kick_interval_s) {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.kick_interval_s={} out of range [1, 60]",
                self.kick_interval_s
            )));
        }
        if !(2..=300).contains(&self.timeout_s) {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.timeout_s={} out of range [2, 300]",
                self.timeout_s
            )));
        }
        let margin = (self.timeout_s as u64).saturating_sub(self.kick_interval_s);
        if margin < crate::consts::HEARTBEAT_SAFETY_MARGIN_S {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.timeout_s={} must exceed kick_interval_s={} by at least {} seconds (got {})",
                self.timeout_s,
                self.kick_interval_s,
                crate::consts::HEARTBEAT_SAFETY_MARGIN_S,
                margin
            )));
        }
        Ok(())
    }
}

// ─── Lifeguard (process supervisor) config ─────────────────────────

fn default_max_restarts() -> u32 {
    5
}
fn default_restart_window_s() -> u64 {
    60
}

/// A single supervised child process entry (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChildSpec {
    /// Unique name for this child, used in logs and in restart bookkeeping.
    pub name: String,
    /// Executable path, passed to `execvp`.
    pub exec: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Restart policy: `"once"`, `"respawn"`, or `"respawn_fail"`.
    #[serde(default = "default_restart_policy")]
    pub restart: String,
}

fn default_restart_policy() -> String {
    "respawn".to_string()
}

/// Process supervisor configuration — restart-rate budget and child table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifeguardConfig {
    /// Maximum restarts allowed within `restart_window_s` before giving up.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Rolling window, in seconds, over which `max_restarts` is counted.
    #[serde(default = "default_restart_window_s")]
    pub restart_window_s: u64,
    /// Supervised child processes.
    #[serde(default)]
    pub children: Vec<ChildSpec>,
}

impl Default for LifeguardConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_window_s: default_restart_window_s(),
            children: Vec::new(),
        }
    }
}

impl LifeguardConfig {
    /// Validate bounds and child-table consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_restarts) {
            return Err(ConfigError::ValidationError(format!(
                "lifeguard.max_restarts={} out of range [1, 100]",
                self.max_restarts
            )));
        }
        if !(1..=3600).contains(&self.restart_window_s) {
            return Err(ConfigError::ValidationError(format!(
                "lifeguard.restart_window_s={} out of range [1, 3600]",
                self.restart_window_s
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for child in &self.children {
            if !seen.insert(&child.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate lifeguard child name: {}",
                    child.name
                )));
            }
        }
        Ok(())
    }
}

// ─── DsmeConfig (top-level) ────────────────────────────────────────

/// Top-level configuration — loaded from `dsme.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DsmeConfig {
    /// Shared fields (logging, service name).
    pub shared: SharedConfig,
    /// Hardware watchdog configuration.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Process supervisor configuration.
    #[serde(default)]
    pub lifeguard: LifeguardConfig,
    /// IPC socket path override.
    #[serde(default = "default_sockfile")]
    pub sockfile: String,
}

fn default_sockfile() -> String {
    crate::consts::DEFAULT_SOCKFILE.to_string()
}

impl DsmeConfig {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.watchdog.validate()?;
        self.lifeguard.validate()?;
        if self.sockfile.is_empty() {
            return Err(ConfigError::ValidationError(
                "sockfile path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate configuration from the given path.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(default_log_level(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_roundtrip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Wrapper {
            level: LogLevel,
        }

        for (s, lvl) in [
            ("trace", LogLevel::Trace),
            ("debug", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("warn", LogLevel::Warn),
            ("error", LogLevel::Error),
        ] {
            let parsed: Wrapper = toml::from_str(&format!("level = \"{s}\"")).unwrap();
            assert_eq!(parsed.level, lvl);
        }
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: String::new(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = DsmeConfig::load(Path::new("/nonexistent/path/dsme.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();
        let result = DsmeConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_watchdog_config_defaults() {
        let wd = WatchdogConfig::default();
        assert!(wd.validate().is_ok());
        assert_eq!(wd.devices, vec!["/dev/watchdog".to_string()]);
    }

    #[test]
    fn test_watchdog_timeout_must_exceed_kick_interval() {
        let wd = WatchdogConfig {
            kick_interval_s: 30,
            timeout_s: 10,
            ..WatchdogConfig::default()
        };
        assert!(matches!(wd.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_watchdog_margin_below_safety_minimum_is_rejected() {
        let wd = WatchdogConfig {
            kick_interval_s: 9,
            timeout_s: 10,
            ..WatchdogConfig::default()
        };
        assert!(matches!(wd.validate(), Err(ConfigError::ValidationError(_))), "a 1-second margin must not pass the 8-second minimum");
    }

    #[test]
    fn test_watchdog_margin_at_safety_minimum_is_accepted() {
        let wd = WatchdogConfig {
            kick_interval_s: 22,
            timeout_s: 30,
            ..WatchdogConfig::default()
        };
        assert!(wd.validate().is_ok());
    }

    #[test]
    fn test_lifeguard_rejects_duplicate_child_names() {
        let cfg = LifeguardConfig {
            children: vec![
                ChildSpec {
                    name: "a".into(),
                    exec: "/bin/a".into(),
                    args: vec![],
                    restart: "respawn".into(),
                },
                ChildSpec {
                    name: "a".into(),
                    exec: "/bin/b".into(),
                    args: vec![],
                    restart: "once".into(),
                },
            ],
            ..LifeguardConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_full_config_load_and_validate() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "dsmed"

[watchdog]
devices = ["/dev/watchdog0"]
kick_interval_s = 5
timeout_s = 30

[lifeguard]
max_restarts = 3

[[lifeguard.children]]
name = "state"
exec = "/usr/libexec/dsme/state"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = DsmeConfig::load_validated(file.path()).expect("should load and validate");
        assert_eq!(config.shared.service_name, "dsmed");
        assert_eq!(config.watchdog.devices, vec!["/dev/watchdog0".to_string()]);
        assert_eq!(config.lifeguard.children.len(), 1);
        assert_eq!(config.sockfile, crate::consts::DEFAULT_SOCKFILE);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "info"
service_name = "dsmed"
bogus = true
"#
        )
        .unwrap();
        file.flush().unwrap();

        let result = DsmeConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::UnknownField(_))));
    }
}
