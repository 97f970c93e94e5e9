//! Logging initialization shared by the supervisor and worker binaries.
//!
//! Maps the CLI surface's `-l <sink>` / `-v <0..7>` flags onto a
//! `tracing_subscriber` `fmt` layer. The supervisor's signal-handling and
//! watchdog-kicking paths never go through this module (§4.1, §4.11) — they
//! write directly to stderr to stay async-signal-safe.

use crate::config::LogLevel;

/// Destination for log output, mirroring the daemon's `-l` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// Write to standard output.
    Stdout,
    /// Write to standard error.
    Stderr,
    /// Disable logging entirely.
    None,
}

impl std::str::FromStr for LogSink {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogSink::Stdout),
            "stderr" => Ok(LogSink::Stderr),
            "none" => Ok(LogSink::None),
            other => Err(format!("unknown log sink: {other}")),
        }
    }
}

/// Convert a `-v` verbosity count (0..=7) to a `tracing` level.
///
/// 0 disables tracing output; higher counts progressively widen the level
/// filter, capping out at `TRACE` for anything above 4.
pub fn verbosity_to_level(verbosity: u8) -> Option<tracing::Level> {
    match verbosity {
        0 => None,
        1 => Some(tracing::Level::ERROR),
        2 => Some(tracing::Level::WARN),
        3 => Some(tracing::Level::INFO),
        4 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

fn level_from_config(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Trace => tracing::Level::TRACE,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

/// Initialize the global `tracing` subscriber.
///
/// `verbosity`, when `Some`, overrides `default_level` (the `-v` flag takes
/// precedence over the config file's `shared.log_level`). `LogSink::None`
/// skips subscriber installation entirely.
pub fn init(sink: LogSink, default_level: LogLevel, verbosity: Option<u8>) {
    if sink == LogSink::None {
        return;
    }

    let level = verbosity
        .and_then(verbosity_to_level)
        .unwrap_or_else(|| level_from_config(default_level));

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_line_number(true)
        .with_max_level(level);

    match sink {
        LogSink::Stdout => builder.with_writer(std::io::stdout).init(),
        LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
        LogSink::None => unreachable!(),
    }
}
