//! dsmed — the device-state-management worker process (§4.3-§4.10).
//!
//! `main.rs` is a thin wrapper around [`run`], mirroring `dsme_supervisor`'s
//! split: the bus, event loop, and module wiring live here so they can be
//! unit tested without a forked supervisor or a live control socket.

pub mod modules;

use clap::Parser;
use dsme_bus::Bus;
use dsme_common::config::{ChildSpec, ConfigError, DsmeConfig, LifeguardConfig, LogLevel};
use dsme_common::consts::{BOOTSTATE_ENV, CONFIG_ENV, DEFAULT_CONFIG_PATH, RD_FLAGS_ENV, SOCKFILE_ENV};
use dsme_common::logging::{self, LogSink};
use dsme_eventloop::{EventLoop, IpcError, IpcServer, SelfPipe, SignalError, TimerHandle};
use dsme_lifeguard::{ChildAction, Lifeguard, LifeguardError, UnixLauncher};
use dsme_protocol::{Endpoint, Message};
use dsme_state::{StateError, TimerId as StateTimerId};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const LIFEGUARD_REAP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("state machine error: {0}")]
    State(#[from] StateError),
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    #[error("signal setup error: {0}")]
    Signal(#[from] SignalError),
    #[error("lifeguard error: {0}")]
    Lifeguard(#[from] LifeguardError),
    #[error("unrecognized startup module: {0:?}")]
    UnknownModule(String),
}

/// Worker CLI surface (§6.1): `-p` is repeatable and selects startup
/// modules from the static registry in [`modules`]; `-l` picks the log
/// sink, `-v` sets verbosity, `-d` detaches from the controlling terminal,
/// and `-s` signals the init system once startup has completed.
#[derive(Parser, Debug)]
#[command(name = "dsmed")]
#[command(version)]
#[command(about = "Device-state-management worker process")]
pub struct Cli {
    /// Load a startup plug-in module by name (repeatable); known names
    /// today are "state" and "thermal".
    #[arg(short = 'p', action = clap::ArgAction::Append)]
    pub modules: Vec<String>,

    /// Log sink: stdout, stderr, or none.
    #[arg(short = 'l', default_value = "stderr")]
    pub log: LogSink,

    /// Verbosity level, 0-7.
    #[arg(short = 'v', default_value_t = 0)]
    pub verbose: u8,

    /// Detach from the controlling terminal.
    #[arg(short = 'd')]
    pub detach: bool,

    /// Signal the init system once startup has completed.
    #[arg(short = 's')]
    pub signal_ready: bool,
}

pub fn init_logging(cli: &Cli) {
    logging::init(cli.log, LogLevel::Info, Some(cli.verbose));
}

/// Which side produced a timer handle armed on the reactor, so a fired
/// timer can be routed back to the module or subsystem that requested it.
enum TimerOrigin {
    State(StateTimerId),
    LifeguardReap,
}

pub async fn run(cli: &Cli) -> Result<i32, WorkerError> {
    if cli.detach {
        daemonize();
    }

    let bootstate = std::env::var(BOOTSTATE_ENV).ok();
    let rd_mode = std::env::var(RD_FLAGS_ENV).ok().is_some_and(|v| !v.is_empty());

    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = DsmeConfig::load_validated(std::path::Path::new(&config_path))?;
    let sockfile = std::env::var(SOCKFILE_ENV).unwrap_or_else(|_| config.sockfile.clone());

    let mut bus = Bus::new();
    let handles = modules::load_requested(&mut bus, &cli.modules, bootstate.as_deref(), rd_mode)?;

    let ipc = IpcServer::bind(&sockfile)?;
    let pipe = SelfPipe::install()?;
    let mut event_loop = EventLoop::new(bus, ipc, pipe);

    let mut timers: HashMap<TimerHandle, TimerOrigin> = HashMap::new();
    if let Some(state) = &handles.state {
        arm_state_timer_ops(&mut event_loop, &mut timers, state.take_timer_ops());
    }

    let mut lifeguard = build_lifeguard(&config.lifeguard)?;
    if lifeguard.is_some() {
        let handle = event_loop.arm_timer(LIFEGUARD_REAP_INTERVAL);
        timers.insert(handle, TimerOrigin::LifeguardReap);
    }

    if cli.signal_ready {
        notify_ready();
    }
    info!(modules = ?cli.modules, sockfile = %sockfile, "dsmed worker ready");

    let exit_code = loop {
        let fired = event_loop.tick().await;
        for handle in fired {
            match timers.remove(&handle) {
                Some(TimerOrigin::State(timer)) => {
                    if let Some(state) = &handles.state {
                        for message in state.fire_timer(timer) {
                            event_loop.bus_mut().broadcast(Endpoint::System, message);
                        }
                        let ops = state.take_timer_ops();
                        arm_state_timer_ops(&mut event_loop, &mut timers, ops);
                    }
                }
                Some(TimerOrigin::LifeguardReap) => {
                    if let Some(lg) = lifeguard.as_mut() {
                        reap_children(&mut event_loop, lg);
                        let rearm = event_loop.arm_timer(LIFEGUARD_REAP_INTERVAL);
                        timers.insert(rearm, TimerOrigin::LifeguardReap);
                    }
                }
                None => {}
            }
        }
        if event_loop.should_quit() {
            break event_loop.exit_code();
        }
    };

    if let Some(lg) = lifeguard.as_mut() {
        lg.shutdown_all(false);
    }
    event_loop.shutdown().await;
    Ok(exit_code)
}

fn arm_state_timer_ops(event_loop: &mut EventLoop, timers: &mut HashMap<TimerHandle, TimerOrigin>, ops: Vec<dsme_state::TimerOp>) {
    for op in ops {
        match op {
            dsme_state::TimerOp::Arm { timer, after } => {
                let handle = event_loop.arm_timer(after);
                timers.insert(handle, TimerOrigin::State(timer));
            }
            dsme_state::TimerOp::Cancel(cancelled) => {
                timers.retain(|_, origin| !matches!(origin, TimerOrigin::State(t) if *t == cancelled));
            }
        }
    }
}

/// Build the process supervisor from `lifeguard.children` (§4.8). `None`
/// when no children are configured, so the worker doesn't arm a reap timer
/// for nothing.
fn build_lifeguard(config: &LifeguardConfig) -> Result<Option<Lifeguard<UnixLauncher>>, WorkerError> {
    if config.children.is_empty() {
        return Ok(None);
    }
    let mut lifeguard = Lifeguard::new(config, UnixLauncher)?;
    lifeguard.spawn_all()?;
    info!(children = config.children.len(), "lifeguard supervising configured child processes");
    Ok(Some(lifeguard))
}

/// Non-blocking reap of every exited child, feeding each exit to
/// [`Lifeguard::on_child_exit`] and broadcasting a reboot request if the
/// restart budget is exhausted (§4.8).
fn reap_children(event_loop: &mut EventLoop, lifeguard: &mut Lifeguard<UnixLauncher>) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                dispatch_child_action(event_loop, lifeguard, pid.as_raw() as u32, Some(code));
            }
            Ok(WaitStatus::Signaled(pid, ..)) => {
                dispatch_child_action(event_loop, lifeguard, pid.as_raw() as u32, None);
            }
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            _ => {}
        }
    }
}

fn dispatch_child_action(event_loop: &mut EventLoop, lifeguard: &mut Lifeguard<UnixLauncher>, pid: u32, exit_code: Option<i32>) {
    match lifeguard.on_child_exit(pid, exit_code) {
        Ok(ChildAction::ResetDevice) => {
            warn!(pid, "lifeguard restart budget exhausted, requesting a reboot");
            event_loop.bus_mut().broadcast(Endpoint::System, Message::RebootReq);
        }
        Ok(_) => {}
        Err(e) => warn!(pid, error = %e, "lifeguard could not process child exit"),
    }
}

/// Tell the init system startup has completed (`-s`), matching the
/// `NOTIFY_SOCKET`/`READY=1` protocol; a no-op if the variable is unset.
fn notify_ready() {
    let Ok(path) = std::env::var("NOTIFY_SOCKET") else { return };
    let Ok(socket) = std::os::unix::net::UnixDatagram::unbound() else { return };
    let _ = socket.send_to(b"READY=1", path);
}

/// Classic double-fork daemonization (`-d`): detach from the controlling
/// terminal by forking twice and starting a new session in between, so the
/// worker survives its original parent exiting.
fn daemonize() {
    unsafe {
        match libc::fork() {
            0 => {}
            _ => libc::_exit(0),
        }
        libc::setsid();
        match libc::fork() {
            0 => {}
            _ => libc::_exit(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_collects_repeated_p_flags_in_order() {
        let cli = Cli::parse_from(["dsmed", "-p", "thermal", "-p", "state", "-v", "3"]);
        assert_eq!(cli.modules, vec!["thermal", "state"]);
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn cli_defaults_are_conservative() {
        let cli = Cli::parse_from(["dsmed"]);
        assert!(cli.modules.is_empty());
        assert!(!cli.detach);
        assert!(!cli.signal_ready);
        assert_eq!(cli.log, LogSink::Stderr);
    }

    #[test]
    fn no_configured_children_means_no_lifeguard() {
        let config = LifeguardConfig::default();
        assert!(build_lifeguard(&config).unwrap().is_none());
    }

    #[test]
    fn configured_children_spawn_a_lifeguard() {
        let config = LifeguardConfig {
            children: vec![ChildSpec { name: "echoer".into(), exec: "/bin/true".into(), args: vec![], restart: "once".into() }],
            ..LifeguardConfig::default()
        };
        let lifeguard = build_lifeguard(&config).unwrap();
        assert!(lifeguard.is_some());
    }
}
