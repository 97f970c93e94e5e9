//! dsme_lifeguard — the config-driven child process supervisor (§4.8).
//!
//! Generalizes a spawn/health/restart/shutdown trait that was once
//! hardcoded to five named processes into a table driven by
//! [`dsme_common::config::LifeguardConfig`], so any number of named
//! children can be declared in `dsme.toml` instead.

pub mod launcher;

pub use launcher::{LauncherError, ProcessLauncher, UnixLauncher};

use dsme_common::config::{ChildSpec, LifeguardConfig};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifeguardError {
    #[error("unrecognized restart policy {0:?}")]
    InvalidRestartPolicy(String),
    #[error("no child named {0:?} is tracked")]
    UnknownChild(String),
    #[error(transparent)]
    Launcher(#[from] LauncherError),
}

/// The per-child action selected after a `SIGCHLD` (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Do nothing; the child is not respawned.
    Once,
    /// Fork again, subject to the restart-rate budget.
    Respawn,
    /// Ask the state machine to reboot the device.
    Reset,
    /// Like `Respawn`, but the budget being exhausted is the expected,
    /// named failure mode rather than an edge case.
    RespawnFail,
}

impl std::str::FromStr for RestartPolicy {
    type Err = LifeguardError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RestartPolicy::Once),
            "respawn" => Ok(RestartPolicy::Respawn),
            "reset" => Ok(RestartPolicy::Reset),
            "respawn_fail" => Ok(RestartPolicy::RespawnFail),
            other => Err(LifeguardError::InvalidRestartPolicy(other.to_string())),
        }
    }
}

/// Health of a tracked child, as reported by [`Lifeguard::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Dead { exit_code: Option<i32> },
    Unknown,
}

/// What the caller should do after [`Lifeguard::on_child_exit`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildAction {
    /// Nothing further to do.
    Noop,
    /// The child was respawned with this new pid.
    Respawned(u32),
    /// The restart budget is exhausted, or the policy is `Reset`: ask the
    /// state machine to reboot the device.
    ResetDevice,
}

struct TrackedChild {
    spec: ChildSpec,
    policy: RestartPolicy,
    pid: Option<u32>,
    last_exit_code: Option<i32>,
    restart_timestamps: VecDeque<Instant>,
}

/// Supervises every configured child process (§4.8).
pub struct Lifeguard<L: ProcessLauncher> {
    launcher: L,
    children: Vec<TrackedChild>,
    max_restarts: u32,
    restart_window: Duration,
}

impl<L: ProcessLauncher> Lifeguard<L> {
    pub fn new(config: &LifeguardConfig, launcher: L) -> Result<Self, LifeguardError> {
        let mut children = Vec::with_capacity(config.children.len());
        for spec in &config.children {
            let policy: RestartPolicy = spec.restart.parse()?;
            children.push(TrackedChild {
                spec: spec.clone(),
                policy,
                pid: None,
                last_exit_code: None,
                restart_timestamps: VecDeque::new(),
            });
        }
        Ok(Lifeguard {
            launcher,
            children,
            max_restarts: config.max_restarts,
            restart_window: Duration::from_secs(config.restart_window_s),
        })
    }

    /// Spawn every configured child in table order.
    pub fn spawn_all(&mut self) -> Result<(), LifeguardError> {
        for i in 0..self.children.len() {
            let pid = self.launcher.spawn(&self.children[i].spec)?;
            self.children[i].pid = Some(pid);
        }
        Ok(())
    }

    fn index_of_pid(&self, pid: u32) -> Option<usize> {
        self.children.iter().position(|c| c.pid == Some(pid))
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.spec.name == name)
    }

    /// True if respawning `index` now stays within the restart budget; if
    /// so, records this attempt's timestamp.
    fn consume_restart_budget(&mut self, index: usize, now: Instant) -> bool {
        let window = self.restart_window;
        let max = self.max_restarts;
        let child = &mut self.children[index];
        while let Some(&oldest) = child.restart_timestamps.front() {
            if now.duration_since(oldest) > window {
                child.restart_timestamps.pop_front();
            } else {
                break;
            }
        }
        if child.restart_timestamps.len() as u32 >= max {
            return false;
        }
        child.restart_timestamps.push_back(now);
        true
    }

    /// Determine the action to take after `pid` exits with `exit_code`
    /// (§4.8). Returns `UnknownChild` if `pid` is not tracked.
    pub fn on_child_exit(&mut self, pid: u32, exit_code: Option<i32>) -> Result<ChildAction, LifeguardError> {
        self.on_child_exit_at(pid, exit_code, Instant::now())
    }

    fn on_child_exit_at(&mut self, pid: u32, exit_code: Option<i32>, now: Instant) -> Result<ChildAction, LifeguardError> {
        let index = self.index_of_pid(pid).ok_or_else(|| LifeguardError::UnknownChild(pid.to_string()))?;
        self.children[index].pid = None;
        self.children[index].last_exit_code = exit_code;

        match self.children[index].policy {
            RestartPolicy::Once => Ok(ChildAction::Noop),
            RestartPolicy::Reset => Ok(ChildAction::ResetDevice),
            RestartPolicy::Respawn | RestartPolicy::RespawnFail => {
                if !self.consume_restart_budget(index, now) {
                    return Ok(ChildAction::ResetDevice);
                }
                let new_pid = self.launcher.spawn(&self.children[index].spec)?;
                self.children[index].pid = Some(new_pid);
                Ok(ChildAction::Respawned(new_pid))
            }
        }
    }

    pub fn health_check(&self, name: &str) -> HealthStatus {
        match self.index_of_name(name) {
            None => HealthStatus::Unknown,
            Some(i) => match self.children[i].pid {
                Some(_) => HealthStatus::Healthy,
                None => HealthStatus::Dead { exit_code: self.children[i].last_exit_code },
            },
        }
    }

    /// Terminate every running child in reverse spawn order, escalating to
    /// `SIGKILL` on the second call for any still-tracked pid.
    pub fn shutdown_all(&mut self, force: bool) {
        for child in self.children.iter_mut().rev() {
            if let Some(pid) = child.pid {
                self.launcher.terminate(pid, force);
            }
        }
    }
}
