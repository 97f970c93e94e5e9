//! Pre-main signal trap (§4.2, §7).
//!
//! `SIGTERM`/`SIGINT` request a clean exit; `SIGHUP`/`SIGPIPE` are ignored;
//! every other terminating signal acquires the restart wake-lock, kicks
//! every open watchdog, restores the default disposition, and re-raises —
//! so an accidental death of the supervisor itself still reboots the
//! device rather than silently dropping watchdog supervision.

use crate::wakelock;
use dsme_watchdog::WatchdogTable;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

static TERMINATE_REQUESTED: AtomicBool = AtomicBool::new(false);
static WATCHDOG_PTR: AtomicPtr<WatchdogTable> = AtomicPtr::new(std::ptr::null_mut());

/// Point the signal handlers at the live watchdog table so an abnormal
/// signal can still feed it. Must outlive every subsequent signal; callers
/// pass a pointer into a `WatchdogTable` owned by `main`'s stack frame,
/// which does not return until shutdown.
pub fn set_watchdog_table(table: &mut WatchdogTable) {
    WATCHDOG_PTR.store(table as *mut WatchdogTable, Ordering::SeqCst);
}

pub fn terminate_requested() -> bool {
    TERMINATE_REQUESTED.load(Ordering::SeqCst)
}

/// Install every terminating-signal handler described above. Call once,
/// before the watchdog table is opened (the table pointer may still be
/// null at that point — the abnormal-signal path tolerates that).
pub fn install() {
    wakelock::install_signal_safe();

    for &sig in &[Signal::SIGTERM, Signal::SIGINT] {
        install_handler(sig, handle_clean);
    }
    for &sig in &[Signal::SIGHUP, Signal::SIGPIPE] {
        ignore(sig);
    }
    for &sig in ABNORMAL_SIGNALS {
        install_handler(sig, handle_abnormal);
    }
}

const ABNORMAL_SIGNALS: &[Signal] = &[
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGBUS,
    Signal::SIGALRM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

extern "C" fn handle_clean(_: libc::c_int) {
    TERMINATE_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_abnormal(sig: libc::c_int) {
    wakelock::acquire_restart_from_signal_handler();
    let ptr = WATCHDOG_PTR.load(Ordering::SeqCst);
    if !ptr.is_null() {
        // SAFETY: the pointee outlives every signal delivered after
        // `set_watchdog_table` runs, and `kick_from_signal_handler` only
        // touches a fixed-size fd array plus async-signal-safe writes.
        unsafe { (*ptr).kick_from_signal_handler() };
    }
    // SAFETY: restoring SIG_DFL and re-raising, then exiting unconditionally
    // rather than relying on the platform's post-return delivery timing,
    // normalizes a terminating signal's behavior across platforms (§9).
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
        libc::_exit(1);
    }
}

fn install_handler(signal: Signal, handler: extern "C" fn(libc::c_int)) {
    let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: both handlers above are async-signal-safe: atomics, a fixed
    // fd-array kick, and a single write(2)/raise(2).
    if let Err(e) = unsafe { nix::sys::signal::sigaction(signal, &action) } {
        eprintln!("dsme_supervisor: failed to trap {signal:?}: {e}");
    }
}

fn ignore(signal: Signal) {
    // SAFETY: SIG_IGN takes no handler and cannot misbehave.
    if let Err(e) = unsafe { nix::sys::signal::sigaction(signal, &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty())) } {
        eprintln!("dsme_supervisor: failed to ignore {signal:?}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn terminate_flag_starts_clear_and_is_settable() {
        let _guard = LOCK.lock().unwrap();
        TERMINATE_REQUESTED.store(false, Ordering::SeqCst);
        assert!(!terminate_requested());
        handle_clean(libc::SIGTERM);
        assert!(terminate_requested());
        TERMINATE_REQUESTED.store(false, Ordering::SeqCst);
    }
}
