//! Self-pipe signal wake and the monotonic exit-code accumulator (§4.5, §5).
//!
//! `quit(code)` must be safe to call from a signal handler: it touches only
//! an atomic and performs a single `write(2)` to a pre-opened pipe, matching
//! the supervisor's own async-signal-safety discipline for `wd_fd[]` (§5).

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("failed to create the self-pipe: {0}")]
    PipeCreate(#[source] nix::Error),
    #[error("failed to register the self-pipe with the reactor: {0}")]
    ReactorRegister(#[source] std::io::Error),
    #[error("failed to install signal handler: {0}")]
    SigactionFailed(#[source] nix::Error),
    #[error("failed to set the self-pipe non-blocking: {0}")]
    NonBlockingFailed(#[source] nix::Error),
}

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);
static EXIT_CODE: AtomicI32 = AtomicI32::new(0);
static WAKE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// Raise the process exit code monotonically and wake the event loop.
///
/// Never lowers a previously set code (§4.5): an abnormal exit code sticks
/// even if a later caller requests a clean `0`. Safe to call from a signal
/// handler.
pub fn quit(code: i32) {
    EXIT_CODE.fetch_max(code, Ordering::SeqCst);
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
    let fd = WAKE_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = [1u8];
        // SAFETY: `fd` is a pipe write end owned for the process lifetime;
        // write(2) on a pipe is async-signal-safe. Errors (a full pipe, an
        // already-closed fd) are ignored: at most one wake is lost, and the
        // loop's next timer tick still observes `QUIT_REQUESTED`.
        unsafe {
            libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

pub fn quit_requested() -> bool {
    QUIT_REQUESTED.load(Ordering::SeqCst)
}

pub fn exit_code() -> i32 {
    EXIT_CODE.load(Ordering::SeqCst)
}

extern "C" fn handle_signal(_: libc::c_int) {
    quit(EXIT_FROM_SIGNAL);
}

/// Exit code used when a termination signal (not an internal `quit`) fires.
const EXIT_FROM_SIGNAL: i32 = 128;

fn set_nonblocking(fd: &OwnedFd) -> Result<(), SignalError> {
    let raw = fd.as_raw_fd();
    fcntl(raw, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(SignalError::NonBlockingFailed)?;
    Ok(())
}

/// A self-pipe whose read end is registered with the reactor; a byte arrives
/// whenever `quit()` runs, including from a signal handler (§4.5).
pub struct SelfPipe {
    read: tokio::io::unix::AsyncFd<OwnedFd>,
}

impl SelfPipe {
    /// Create the pipe and install `SIGTERM`/`SIGINT` handlers that call
    /// [`quit`]. Must be called once, before the reactor starts polling.
    pub fn install() -> Result<Self, SignalError> {
        let (read_fd, write_fd) = pipe().map_err(SignalError::PipeCreate)?;
        set_nonblocking(&read_fd)?;
        set_nonblocking(&write_fd)?;

        WAKE_WRITE_FD.store(write_fd.as_raw_fd(), Ordering::SeqCst);
        // Leak the write end: it must outlive the process, and only the
        // signal handler ever writes to it via the raw fd stashed above.
        std::mem::forget(write_fd);

        install_handler(nix::sys::signal::Signal::SIGTERM)?;
        install_handler(nix::sys::signal::Signal::SIGINT)?;

        let read = tokio::io::unix::AsyncFd::new(read_fd).map_err(SignalError::ReactorRegister)?;
        Ok(SelfPipe { read })
    }

    /// Wait for a wake byte (a signal fired, or `quit()` was called
    /// in-process) and drain the pipe.
    pub async fn wait(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            let mut guard = match self.read.readable().await {
                Ok(guard) => guard,
                Err(_) => return,
            };
            match guard.try_io(|inner| {
                // SAFETY: libc::read is the standard, always-safe-to-call
                // syscall wrapper; the fd is valid for the guard's lifetime.
                let n = unsafe { libc::read(inner.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                if n >= 0 {
                    Ok(n as usize)
                } else {
                    Err(std::io::Error::last_os_error())
                }
            }) {
                Ok(_) => return,
                Err(_would_block) => continue,
            }
        }
    }
}

fn install_handler(signal: nix::sys::signal::Signal) -> Result<(), SignalError> {
    let action = nix::sys::signal::SigAction::new(
        nix::sys::signal::SigHandler::Handler(handle_signal),
        nix::sys::signal::SaFlags::SA_RESTART,
        nix::sys::signal::SigSet::empty(),
    );
    // SAFETY: `handle_signal` only touches atomics and issues a single
    // `write(2)`, both async-signal-safe.
    unsafe { nix::sys::signal::sigaction(signal, &action) }.map_err(SignalError::SigactionFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests touching the process-global quit state.
    static LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn quit_raises_exit_code_monotonically() {
        let _guard = LOCK.lock().unwrap();
        EXIT_CODE.store(0, Ordering::SeqCst);
        QUIT_REQUESTED.store(false, Ordering::SeqCst);

        quit(3);
        assert_eq!(exit_code(), 3);
        quit(1);
        assert_eq!(exit_code(), 3, "a lower code must never override a higher one");
        quit(9);
        assert_eq!(exit_code(), 9);
        assert!(quit_requested());
    }
}
