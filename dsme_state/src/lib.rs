//! dsme_state — the device state machine policy module (§4.7).
//!
//! [`machine::StateMachine`] is the pure transition table; [`module::StateModule`]
//! adapts it to [`dsme_bus::PolicyModule`] for loading into the worker's bus.

pub mod machine;
pub mod module;

pub use machine::{Output, StateError, StateMachine, TimerId};
pub use module::{StateHandle, StateModule, TimerOp};
