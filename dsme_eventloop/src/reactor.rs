//! The single-threaded cooperative event loop (§4.5, §5).
//!
//! Alternates: drain the message bus → block on the next readiness event
//! (a timer deadline, the self-pipe, the IPC listener, or a client read).
//! Every callback runs to completion before the next is considered, so no
//! locking is needed anywhere in-process (§5).

use crate::ipc::{Connection, FrameOutcome, IpcServer};
use crate::signal::{self, SelfPipe};
use crate::timer::{Handle as TimerHandle, TimerService};
use dsme_bus::{Bus, SocketBroadcaster};
use dsme_protocol::{Endpoint, Message};
use futures_util::future::select_all;
use std::cell::RefCell;
use std::collections::HashMap;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Records messages the bus broadcasts, for [`EventLoop::flush_outbound`] to
/// write out to connected clients between bus drains. Shared with the
/// `Bus`-owned trait object via `Rc<RefCell<..>>`, the same dual-handle
/// pattern `dsme_state::module` uses for its bus-owned/externally-held
/// split (§4.4, §4.6).
#[derive(Default)]
struct OutboundQueue {
    pending: Vec<Message>,
}

struct SharedBroadcaster(Rc<RefCell<OutboundQueue>>);

impl SocketBroadcaster for SharedBroadcaster {
    fn broadcast_to_clients(&mut self, message: &Message) {
        self.0.borrow_mut().pending.push(message.clone());
    }
}

/// The worker's reactor: owns the bus, the IPC listener and its live
/// connections, the timer service, and the self-pipe.
pub struct EventLoop {
    bus: Bus,
    ipc: IpcServer,
    connections: HashMap<u64, Connection>,
    timers: TimerService,
    pipe: SelfPipe,
    outbound: Rc<RefCell<OutboundQueue>>,
}

impl EventLoop {
    pub fn new(mut bus: Bus, ipc: IpcServer, pipe: SelfPipe) -> Self {
        let outbound = Rc::new(RefCell::new(OutboundQueue::default()));
        bus.set_broadcaster(Box::new(SharedBroadcaster(outbound.clone())));
        EventLoop { bus, ipc, connections: HashMap::new(), timers: TimerService::new(), pipe, outbound }
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn arm_timer(&mut self, after: Duration) -> TimerHandle {
        self.timers.arm(after)
    }

    pub fn cancel_timer(&mut self, timer: TimerHandle) {
        self.timers.cancel(timer);
    }

    /// One iteration: drain the bus, flush any resulting client broadcasts,
    /// then wait for the next readiness event among timers / signal / IPC.
    /// Returns the timers that fired this iteration, for the caller to
    /// route to `dsme_state`/`dsme_thermal`.
    pub async fn tick(&mut self) -> Vec<TimerHandle> {
        self.bus.process_message_queue();
        self.flush_outbound().await;

        let deadline = self.timers.next_deadline();

        tokio::select! {
            _ = sleep_until_or_pending(deadline) => {}
            _ = self.pipe.wait() => {}
            accepted = self.ipc.accept() => {
                match accepted {
                    Ok(conn) => {
                        trace!(connection = conn.id.0, "accepted IPC connection");
                        self.connections.insert(conn.id.0, conn);
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            (id, outcome) = poll_connections(&mut self.connections) => {
                self.service_connection(id, outcome).await;
            }
        }

        self.timers.drain_expired()
    }

    pub fn should_quit(&self) -> bool {
        signal::quit_requested()
    }

    pub fn exit_code(&self) -> i32 {
        signal::exit_code()
    }

    /// Drain the bus and unload every module in reverse load order,
    /// draining again after each unload, looping until both the queue and
    /// the module registry are empty — a `fini` handler that re-registers
    /// a module is picked up by the next pass instead of being missed (§5
    /// shutdown discipline).
    pub async fn shutdown(&mut self) {
        loop {
            self.bus.process_message_queue();
            self.flush_outbound().await;

            let ids = self.bus.loaded_module_ids();
            if ids.is_empty() {
                break;
            }
            for id in ids.into_iter().rev() {
                self.bus.unload_module(id);
                self.bus.process_message_queue();
                self.flush_outbound().await;
            }
        }
    }

    async fn flush_outbound(&mut self) {
        let pending = std::mem::take(&mut self.outbound.borrow_mut().pending);
        for message in pending {
            for conn in self.connections.values_mut() {
                if let Err(e) = conn.write_frame(&message).await {
                    warn!(connection = conn.id.0, error = %e, "client write failed, will surface on next read");
                }
            }
        }
    }

    async fn service_connection(&mut self, id: u64, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Message(message) => {
                let Some(conn) = self.connections.get(&id) else { return };
                let from = Endpoint::Socket { connection: conn.id, credentials: conn.credentials };
                let is_close = matches!(message, Message::Close);
                self.bus.broadcast(from, message);
                if is_close {
                    self.bus.process_message_queue();
                    self.flush_outbound().await;
                    self.connections.remove(&id);
                }
            }
            FrameOutcome::NeedMore => {}
            FrameOutcome::Close(reason) => {
                info!(connection = id, ?reason, "closing IPC connection");
                self.connections.remove(&id);
            }
        }
    }
}

async fn sleep_until_or_pending(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Wait for read-readiness on any live connection. With no connections, this
/// never resolves — the other `select!` arms in `tick` still make progress.
async fn poll_connections(connections: &mut HashMap<u64, Connection>) -> (u64, FrameOutcome) {
    if connections.is_empty() {
        return std::future::pending().await;
    }
    let mut ids = Vec::with_capacity(connections.len());
    let mut futures: Vec<Pin<Box<dyn Future<Output = FrameOutcome> + '_>>> = Vec::with_capacity(connections.len());
    for (id, conn) in connections.iter_mut() {
        ids.push(*id);
        futures.push(Box::pin(conn.poll_frame()));
    }
    let (outcome, index, _rest) = select_all(futures).await;
    (ids[index], outcome)
}
