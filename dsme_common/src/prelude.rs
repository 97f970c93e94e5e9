//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types so
//! consumers can do `use dsme_common::prelude::*;` and get the most
//! important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use dsme_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::{LogSink, init as init_logging};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ChildSpec, ConfigError, ConfigLoader, DsmeConfig, LifeguardConfig, SharedConfig, WatchdogConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CONFIG_PATH, DEFAULT_SOCKFILE, MAX_MSG_SIZE};
