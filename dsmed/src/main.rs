//! Device-state-management worker process (§4.3-§4.10).
//!
//! Single-threaded cooperative reactor: module bus, IPC server, timers, and
//! the optional process supervisor all run on one OS thread, mirroring
//! `dsme_eventloop::reactor`'s own design.

use clap::Parser;
use dsmed::Cli;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    dsmed::init_logging(&cli);

    match dsmed::run(&cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}
