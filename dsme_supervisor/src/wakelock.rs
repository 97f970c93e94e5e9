//! Kernel wake-lock acquisition (§4.2, §6).
//!
//! Used only on the supervisor's abnormal paths: the pre-main signal trap
//! and the loop-exit shutdown sequence. The signal-handler path must never
//! allocate or format a string, so the restart line is rendered once at
//! startup and the fd pre-opened, following the same write-local discipline
//! `dsme_watchdog::WatchdogTable` uses for `kick_from_signal_handler`.

use dsme_common::consts::{
    RESTART_WAKE_LOCK_NAME, RESTART_WAKE_LOCK_TIMEOUT_NS, WAKE_LOCK_PATH, WAKE_UNLOCK_PATH,
};
use std::ffi::CString;
use std::io::Write;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};

static LOCK_FD: AtomicI32 = AtomicI32::new(-1);
static LOCK_LINE_PTR: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static LOCK_LINE_LEN: AtomicUsize = AtomicUsize::new(0);

/// Pre-open the wake-lock file and render the restart line once, so the
/// terminating-signal handler installed afterwards never allocates.
///
/// Safe to call even where `/sys/power/wake_lock` does not exist (e.g. in
/// tests, or on a kernel without the wakelocks sysfs API): the fd is simply
/// left at `-1` and the signal-handler path becomes a no-op.
pub fn install_signal_safe() {
    if let Ok(c_path) = CString::new(WAKE_LOCK_PATH) {
        // SAFETY: c_path is a valid NUL-terminated C string for the call's duration.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY) };
        if fd >= 0 {
            LOCK_FD.store(fd, Ordering::SeqCst);
        }
    }

    let mut line = format!("{RESTART_WAKE_LOCK_NAME} {RESTART_WAKE_LOCK_TIMEOUT_NS}\n").into_bytes();
    line.shrink_to_fit();
    let len = line.len();
    let ptr = Box::leak(line.into_boxed_slice()).as_mut_ptr();
    LOCK_LINE_PTR.store(ptr, Ordering::SeqCst);
    LOCK_LINE_LEN.store(len, Ordering::SeqCst);
}

/// Async-signal-safe: write the pre-rendered restart line to the pre-opened
/// wake-lock fd. No-op if [`install_signal_safe`] was never called or the
/// file could not be opened.
pub fn acquire_restart_from_signal_handler() {
    let fd = LOCK_FD.load(Ordering::SeqCst);
    let ptr = LOCK_LINE_PTR.load(Ordering::SeqCst);
    let len = LOCK_LINE_LEN.load(Ordering::SeqCst);
    if fd < 0 || ptr.is_null() {
        return;
    }
    // SAFETY: fd was opened by `install_signal_safe` and stays open for the
    // process lifetime; ptr/len describe a leaked, never-mutated buffer.
    unsafe {
        libc::write(fd, ptr as *const libc::c_void, len);
    }
}

/// Normal-path acquisition of the restart wake-lock (loop-exit shutdown,
/// not inside a signal handler).
pub fn acquire_restart() {
    write_line(WAKE_LOCK_PATH, RESTART_WAKE_LOCK_NAME, Some(RESTART_WAKE_LOCK_TIMEOUT_NS));
}

/// Release the restart wake-lock (called once booted successfully, after fork).
pub fn release_restart() {
    write_line(WAKE_UNLOCK_PATH, RESTART_WAKE_LOCK_NAME, None);
}

fn write_line(path: &str, name: &str, timeout_ns: Option<u64>) {
    let line = match timeout_ns {
        Some(ns) => format!("{name} {ns}\n"),
        None => format!("{name}\n"),
    };
    if let Ok(mut file) = std::fs::OpenOptions::new().write(true).open(path) {
        let _ = file.write_all(line.as_bytes());
    }
}
