//! dsme_eventloop — the worker's single-threaded cooperative reactor (§4.5),
//! local IPC server (§4.6), and timer service (§4.10).

pub mod ipc;
pub mod reactor;
pub mod signal;
pub mod timer;

pub use ipc::{CloseReason, Connection, FrameOutcome, IpcError, IpcServer};
pub use reactor::EventLoop;
pub use signal::{exit_code, quit, quit_requested, SelfPipe, SignalError};
pub use timer::{Handle as TimerHandle, TimerService};
