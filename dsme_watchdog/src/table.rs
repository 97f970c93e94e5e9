//! The ordered watchdog descriptor table (§3, §4.1).
//!
//! Ordering matters: if kicking watchdog N fails, N+1 is not attempted.
//! A failing earlier kick is evidence the system is unwell; suppressing
//! later kicks lets the device reboot rather than mask the fault.

use crate::ioctl::{KICK_BYTE, QUIT_BYTE, WDIOC_SETTIMEOUT};
use dsme_common::consts::RD_FLAGS_ENV;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use thiserror::Error;
use tracing::{error, warn};

/// Maximum number of watchdog devices supervised at once. Fixed so the
/// signal-handler kick path never allocates (§4.1, §9).
pub const MAX_WATCHDOGS: usize = 8;

/// Error type for watchdog table operations.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("too many watchdog devices configured (max {MAX_WATCHDOGS})")]
    TooManyDevices,
    #[error("no watchdog device could be opened and R&D mode is not active")]
    NoneOpened,
    #[error("device path contains an interior NUL byte: {0}")]
    InvalidPath(String),
}

/// One entry in the static ordered watchdog table (§3).
struct Entry {
    device_path: String,
    timeout_s: Option<u32>,
    disable_token: &'static str,
    fd: Option<RawFd>,
}

/// The supervisor's ordered watchdog table.
///
/// `kick`/`kick_from_signal_handler` iterate entries in table order and
/// stop at the first failure (§4.1). `fds` is a fixed-size array mirroring
/// `entries[i].fd`, read by the async-signal-safe kick path without
/// touching `entries` (which is not signal-safe to traverse, since it
/// contains `String`s).
pub struct WatchdogTable {
    entries: Vec<Entry>,
    fds: [Option<RawFd>; MAX_WATCHDOGS],
}

/// A single configured watchdog device, as read from `WatchdogConfig`.
pub struct DeviceSpec {
    pub path: String,
    pub timeout_s: Option<u32>,
    pub disable_token: &'static str,
}

impl WatchdogTable {
    /// Build a table from configuration, but do not open any device yet.
    pub fn new(devices: Vec<DeviceSpec>) -> Result<WatchdogTable, WatchdogError> {
        if devices.len() > MAX_WATCHDOGS {
            return Err(WatchdogError::TooManyDevices);
        }
        let entries = devices
            .into_iter()
            .map(|d| Entry {
                device_path: d.path,
                timeout_s: d.timeout_s,
                disable_token: d.disable_token,
                fd: None,
            })
            .collect();
        Ok(WatchdogTable { entries, fds: [None; MAX_WATCHDOGS] })
    }

    /// Open every entry not disabled by `DSME_RD_FLAGS`, applying the
    /// configured timeout. Returns `Ok(true)` if at least one watchdog was
    /// opened, `Ok(false)` if R&D mode tolerates none being open, and
    /// `Err` if none opened and R&D mode is not active (§7: fatal config).
    pub fn init(&mut self) -> Result<bool, WatchdogError> {
        let rd_flags = std::env::var(RD_FLAGS_ENV).ok();
        let rd_mode = rd_flags.as_deref().is_some_and(|v| !v.is_empty());
        let disabled_tokens: Vec<&str> = rd_flags
            .as_deref()
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default();

        let mut any_opened = false;

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if disabled_tokens.contains(&entry.disable_token) {
                continue;
            }

            let c_path = match CString::new(entry.device_path.as_str()) {
                Ok(p) => p,
                Err(_) => return Err(WatchdogError::InvalidPath(entry.device_path.clone())),
            };

            // SAFETY: c_path is a valid NUL-terminated C string for the
            // duration of this call.
            let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ENOENT) {
                    continue;
                }
                error!(device = %entry.device_path, error = %err, "failed to open watchdog device");
                continue;
            }

            if let Some(timeout) = entry.timeout_s {
                if timeout != 0 {
                    let mut t = timeout as libc::c_int;
                    // SAFETY: fd was just opened successfully; t is a valid in/out pointer.
                    let rc = unsafe { libc::ioctl(fd, WDIOC_SETTIMEOUT, &mut t as *mut libc::c_int) };
                    if rc < 0 {
                        warn!(device = %entry.device_path, "WDIOC_SETTIMEOUT failed");
                    }
                }
            }

            entry.fd = Some(fd);
            self.fds[i] = Some(fd);
            any_opened = true;
        }

        if !any_opened && !rd_mode {
            return Err(WatchdogError::NoneOpened);
        }
        Ok(any_opened)
    }

    /// Feed every opened watchdog in table order. Stops at the first
    /// descriptor that fails (§4.1): a failing earlier kick already
    /// indicates trouble, so later watchdogs are deliberately starved.
    pub fn kick(&self) {
        for entry in &self.entries {
            let Some(fd) = entry.fd else { continue };
            loop {
                // SAFETY: fd was opened by `init` and is valid for the
                // lifetime of this table.
                let rc = unsafe { libc::write(fd, [KICK_BYTE].as_ptr() as *const libc::c_void, 1) };
                if rc >= 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EAGAIN) {
                    continue;
                }
                eprintln!("dsme_watchdog: kick failed on {}: {}", entry.device_path, err);
                return;
            }
        }
    }

    /// Async-signal-safe equivalent of [`kick`](Self::kick): no allocation,
    /// no logging, no errno-dependent branching beyond a bare retry loop
    /// on the write itself (§4.1, §9).
    pub fn kick_from_signal_handler(&self) {
        for slot in &self.fds {
            let Some(fd) = *slot else { continue };
            loop {
                let rc = unsafe { libc::write(fd, [KICK_BYTE].as_ptr() as *const libc::c_void, 1) };
                if rc >= 0 {
                    break;
                }
                if unsafe { *libc::__errno_location() } == libc::EAGAIN {
                    continue;
                }
                return;
            }
        }
    }

    /// Write the kernel "nowayout" clearance byte to every opened watchdog
    /// and close it. Clears the fd to `None` *before* closing, following
    /// the write-local/clear-table/close discipline so a concurrent
    /// signal-handler kick never touches a closing descriptor (§5, §9).
    pub fn quit(&mut self) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            let Some(fd) = entry.fd else { continue };
            let local_fd = fd;
            entry.fd = None;
            self.fds[i] = None;
            unsafe {
                libc::write(local_fd, [QUIT_BYTE].as_ptr() as *const libc::c_void, 1);
                libc::close(local_fd);
            }
        }
    }

    /// Number of entries currently holding an open descriptor.
    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|e| e.fd.is_some()).count()
    }
}

impl Drop for WatchdogTable {
    fn drop(&mut self) {
        self.quit();
    }
}
