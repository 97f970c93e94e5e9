//! dsme_supervisor — the watchdog-kicking supervisor process (§4.2).
//!
//! `main.rs` is a thin wrapper around [`run`]: CLI parsing, logging setup,
//! and the heartbeat loop itself live here so they can be unit tested
//! directly, the way `evo_hal` splits its `core` logic from its binary.

pub mod signal;
pub mod wakelock;

use clap::Parser;
use dsme_common::config::{ConfigError, DsmeConfig, LogLevel};
use dsme_common::consts::MAX_MISSED_PONGS;
use dsme_common::logging::{self, LogSink};
use dsme_watchdog::{device_specs_from_config, WatchdogError, WatchdogTable};
use nix::sys::mman::{mlockall, MlockAllFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::ffi::CString;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

const WORKER_BINARY: &str = "dsmed";
const PING_BYTE: u8 = b'.';

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),
    #[error("posix error: {0}")]
    Posix(#[from] nix::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supervisor flags. Everything after `--` is forwarded verbatim to the
/// worker binary's own CLI surface (§6).
#[derive(Parser, Debug)]
#[command(name = "dsme_supervisor")]
#[command(version)]
#[command(about = "Watchdog-kicking supervisor for the dsmed worker")]
pub struct Cli {
    /// Path to the dsme configuration file.
    #[arg(long, env = "DSME_CONFIG", default_value = "/etc/dsme/dsme.toml")]
    pub config: PathBuf,

    /// Where the supervisor's own logs go.
    #[arg(long, default_value = "stderr")]
    pub log: LogSink,

    /// Supervisor log verbosity (0..=7).
    #[arg(short = 'v', long, default_value_t = 0)]
    pub verbose: u8,

    /// Arguments forwarded verbatim to the worker binary.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub worker_args: Vec<String>,
}

pub fn init_logging(cli: &Cli) {
    logging::init(cli.log, LogLevel::Info, Some(cli.verbose));
}

/// Top-level orchestration: load config, open watchdogs, fork the worker,
/// run the heartbeat loop, and escalate shutdown. Returns the process exit
/// code.
pub fn run(cli: &Cli) -> Result<i32, SupervisorError> {
    // Pre-main trap: must be armed before anything else touches a watchdog,
    // so even a crash during config loading still reboots the device.
    signal::install();

    let config = DsmeConfig::load_validated(&cli.config)?;

    let specs = device_specs_from_config(&config.watchdog);
    let mut watchdog = WatchdogTable::new(specs)?;
    let opened_any = watchdog.init()?;
    info!(devices = watchdog.open_count(), opened_any, "watchdog devices initialized");
    watchdog.kick();
    signal::set_watchdog_table(&mut watchdog);

    if let Err(e) = raise_scheduling_priority() {
        warn!(error = %e, "could not raise scheduling priority; continuing at default priority");
    }

    let worker = spawn_worker(&cli.worker_args)?;
    info!(pid = worker.pid.as_raw(), "worker spawned");

    wakelock::release_restart();

    let heartbeat_interval = Duration::from_secs(config.watchdog.kick_interval_s);
    let abnormal_exit = heartbeat_loop(&watchdog, &worker, heartbeat_interval);

    let exit_code = shutdown_worker(
        &mut watchdog,
        &worker,
        abnormal_exit,
        Duration::from_secs(config.watchdog.sigterm_grace_s),
        Duration::from_secs(config.watchdog.sigkill_grace_s),
    );

    Ok(exit_code)
}

/// Raise scheduling priority to real-time FIFO at the maximum available
/// priority, lower niceness to the minimum, lock all pages into RAM, and
/// ask the OOM killer to leave this process alone. Best-effort: a sandbox
/// or an unprivileged test run will fail most of these, which is logged
/// but not fatal (§4.2).
fn raise_scheduling_priority() -> Result<(), SupervisorError> {
    // SAFETY: sched_param is a plain-old-data struct; sched_setscheduler
    // validates the priority range itself.
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let param = libc::sched_param { sched_priority: max_priority };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            warn!(error = %std::io::Error::last_os_error(), "sched_setscheduler(SCHED_FIFO) failed");
        }
        if libc::setpriority(libc::PRIO_PROCESS, 0, -20) != 0 {
            warn!(error = %std::io::Error::last_os_error(), "setpriority failed");
        }
    }

    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)?;

    if let Ok(mut f) = std::fs::OpenOptions::new().write(true).open("/proc/self/oom_score_adj") {
        let _ = f.write_all(b"-1000");
    }

    Ok(())
}

pub struct WorkerHandle {
    pub pid: Pid,
    ping_write: OwnedFd,
    pong_read: OwnedFd,
}

/// Open the two supervisor↔worker pipes, fork, and exec the worker binary
/// in the child with the original argument vector (§4.2).
fn spawn_worker(worker_args: &[String]) -> Result<WorkerHandle, SupervisorError> {
    let (ping_read, ping_write) = pipe()?;
    let (pong_read, pong_write) = pipe()?;

    // SAFETY: this process is single-threaded at this point; the child
    // performs only dup2/close/execvp before exec, all safe post-fork.
    match unsafe { fork() }? {
        ForkResult::Child => {
            unsafe {
                libc::dup2(ping_read.as_raw_fd(), libc::STDIN_FILENO);
                libc::dup2(pong_write.as_raw_fd(), libc::STDOUT_FILENO);
            }
            drop(ping_read);
            drop(ping_write);
            drop(pong_read);
            drop(pong_write);
            exec_worker(worker_args);
            // execvp only returns on failure.
            unsafe { libc::_exit(127) };
        }
        ForkResult::Parent { child } => {
            drop(ping_read);
            drop(pong_write);
            set_nonblocking(&ping_write)?;
            set_nonblocking(&pong_read)?;
            Ok(WorkerHandle { pid: child, ping_write, pong_read })
        }
    }
}

fn exec_worker(extra_args: &[String]) {
    let Ok(program) = CString::new(WORKER_BINARY) else { return };
    let mut argv = vec![program.clone()];
    for arg in extra_args {
        if let Ok(c) = CString::new(arg.as_str()) {
            argv.push(c);
        }
    }
    let _ = nix::unistd::execvp(&program, &argv);
}

fn set_nonblocking(fd: &OwnedFd) -> Result<(), SupervisorError> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Runs steps 1-5 of §4.2's loop until either a clean-termination signal
/// fires or the worker goes nonresponsive. Returns `true` on the abnormal
/// (nonresponsive-worker) exit path.
fn heartbeat_loop(watchdog: &WatchdogTable, worker: &WorkerHandle, interval: Duration) -> bool {
    let mut missed = 0u32;
    loop {
        watchdog.kick();
        if interruptible_sleep(interval, watchdog) {
            return false;
        }
        watchdog.kick();

        let read_any = drain_pong(worker.pong_read.as_raw_fd());
        let (next_missed, nonresponsive) = step_missed_pongs(missed, read_any, MAX_MISSED_PONGS);
        missed = next_missed;
        if nonresponsive {
            error!(missed, "worker nonresponsive, allowing a watchdog reboot");
            return true;
        }

        write_ping(worker.ping_write.as_raw_fd());
    }
}

/// Update the missed-pong counter and report whether the worker should now
/// be declared nonresponsive. Pure so it is unit-testable without a real
/// pipe or process.
pub fn step_missed_pongs(counter: u32, read_any: bool, max: u32) -> (u32, bool) {
    let next = if read_any { 0 } else { counter + 1 };
    (next, next >= max)
}

/// Sleep for `total`, kicking the watchdog on every signal-interrupted
/// wake. Returns `true` if a clean-termination signal arrived during the
/// sleep (§4.2 step 2).
fn interruptible_sleep(total: Duration, watchdog: &WatchdogTable) -> bool {
    let mut remaining = total;
    loop {
        let req = libc::timespec {
            tv_sec: remaining.as_secs() as libc::time_t,
            tv_nsec: remaining.subsec_nanos() as libc::c_long,
        };
        let mut rem = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: req/rem are valid in/out pointers for the duration of this call.
        let rc = unsafe { libc::nanosleep(&req, &mut rem) };
        if rc == 0 {
            return signal::terminate_requested();
        }
        if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return signal::terminate_requested();
        }
        watchdog.kick();
        if signal::terminate_requested() {
            return true;
        }
        remaining = Duration::new(rem.tv_sec as u64, rem.tv_nsec as u32);
        if remaining.is_zero() {
            return false;
        }
    }
}

/// Drain every byte currently available on the worker pipe. Returns
/// whether anything was read.
fn drain_pong(fd: RawFd) -> bool {
    let mut buf = [0u8; 256];
    let mut read_any = false;
    loop {
        // SAFETY: fd is the parent's nonblocking read end, valid for the
        // worker's lifetime; buf is a correctly-sized local buffer.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            read_any = true;
            continue;
        }
        break;
    }
    read_any
}

fn write_ping(fd: RawFd) {
    // SAFETY: fd is the parent's nonblocking write end; a single-byte
    // write either succeeds, blocks transiently (EAGAIN, ignored — the
    // next tick retries), or fails because the worker is gone (ignored,
    // the missed-pong counter will catch that).
    unsafe {
        libc::write(fd, [PING_BYTE].as_ptr() as *const libc::c_void, 1);
    }
}

/// On loop exit: acquire the restart wake-lock, kick once more, escalate
/// `SIGTERM` → `SIGKILL` against the worker, and release the watchdogs
/// only if the worker is confirmed to have exited cleanly and this wasn't
/// already an abnormal (nonresponsive-worker) exit (§4.2, scenario E).
fn shutdown_worker(
    watchdog: &mut WatchdogTable,
    worker: &WorkerHandle,
    abnormal_exit: bool,
    sigterm_grace: Duration,
    sigkill_grace: Duration,
) -> i32 {
    wakelock::acquire_restart();
    watchdog.kick();

    let _ = kill(worker.pid, Signal::SIGTERM);
    let mut status = wait_for_exit(worker.pid, sigterm_grace);
    if status.is_none() {
        let _ = kill(worker.pid, Signal::SIGKILL);
        status = wait_for_exit(worker.pid, sigkill_grace);
    }

    let exited_cleanly = !abnormal_exit && matches!(status, Some(WaitStatus::Exited(_, 0)));
    if exited_cleanly {
        info!("worker exited cleanly, releasing watchdogs");
        watchdog.quit();
        0
    } else {
        warn!(?status, abnormal_exit, "worker did not exit cleanly, leaving watchdogs armed");
        watchdog.kick();
        1
    }
}

fn wait_for_exit(pid: Pid, timeout: Duration) -> Option<WaitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => return Some(status),
            Err(_) => return None,
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
