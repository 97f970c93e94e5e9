//! dsme_common — shared constants, configuration, and logging setup for the
//! dsmed workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - wire-format limits, timeouts, and default paths
//! - [`config`] - configuration loading traits and types
//! - [`logging`] - `tracing` subscriber initialization
//! - [`prelude`] - common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use dsme_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod logging;
pub mod prelude;
