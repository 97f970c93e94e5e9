//! Watchdog-kicking supervisor process (§4.2).
//!
//! Pinned to a real-time scheduling class, memory-locked, and OOM-protected,
//! this process's only job is to keep every configured hardware watchdog
//! fed while the worker binary is alive, and to let the watchdog reboot the
//! device the moment that stops being true.

use clap::Parser;
use dsme_supervisor::Cli;
use tracing::error;

fn main() {
    let cli = Cli::parse();
    dsme_supervisor::init_logging(&cli);

    match dsme_supervisor::run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}
