//! The typed message bus (§4.4).
//!
//! Queues messages and drains them to matching handlers one at a time,
//! following the source's "process the whole queue, re-checking length
//! after each dispatch" loop: a handler may itself queue more messages,
//! and those must be seen before the bus goes idle.

use crate::registry::{HandlerSpec, ModuleRegistry, Outbox, PolicyModule};
use dsme_protocol::{Endpoint, Message, ModuleId, Recipient};
use std::collections::VecDeque;
use tracing::trace;

/// A message waiting to be dispatched, together with who sent it and who it
/// is addressed to.
struct QueuedMessage {
    from: Endpoint,
    to: Recipient,
    message: Message,
    forward_externally: bool,
}

/// Receives messages the bus broadcasts to connected IPC clients (§4.4,
/// §4.6). Implemented by the event loop crate; kept as a trait object here
/// so `dsme_bus` does not depend on the socket transport.
pub trait SocketBroadcaster {
    fn broadcast_to_clients(&mut self, message: &Message);
}

/// Combines the module registry with the pending-message queue (§4.3, §4.4).
pub struct Bus {
    registry: ModuleRegistry,
    queue: VecDeque<QueuedMessage>,
    broadcaster: Option<Box<dyn SocketBroadcaster>>,
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Bus { registry: ModuleRegistry::new(), queue: VecDeque::new(), broadcaster: None }
    }

    /// Attach the transport that forwards broadcasts to IPC clients.
    pub fn set_broadcaster(&mut self, broadcaster: Box<dyn SocketBroadcaster>) {
        self.broadcaster = Some(broadcaster);
    }

    /// Register a module and drain any messages it queued during `init`.
    pub fn load_module(&mut self, module: Box<dyn PolicyModule>, priority: i32) -> ModuleId {
        let (module_id, outbox) = self.registry.load_module(module, priority);
        self.drain_outbox(Endpoint::Module(module_id), outbox);
        module_id
    }

    /// Unregister a module, draining any messages it queued during `fini`.
    /// No-op if `module_id` was not loaded.
    pub fn unload_module(&mut self, module_id: ModuleId) {
        if let Some(outbox) = self.registry.unload_module(module_id) {
            self.drain_outbox(Endpoint::Module(module_id), outbox);
        }
    }

    pub fn is_loaded(&self, module_id: ModuleId) -> bool {
        self.registry.is_loaded(module_id)
    }

    /// Currently loaded module ids, in load order (§5 shutdown unloads in
    /// reverse of this).
    pub fn loaded_module_ids(&self) -> Vec<ModuleId> {
        self.registry.loaded_ids()
    }

    /// Queue `message` for delivery to every matching handler and forward it
    /// to connected IPC clients.
    pub fn broadcast(&mut self, from: Endpoint, message: Message) {
        self.enqueue(from, Recipient::Broadcast, message, true);
    }

    /// Queue `message` for every matching in-process handler only.
    pub fn broadcast_internally(&mut self, from: Endpoint, message: Message) {
        self.enqueue(from, Recipient::Broadcast, message, false);
    }

    /// Queue `message` for a single module's handlers only.
    pub fn send(&mut self, from: Endpoint, to: ModuleId, message: Message) {
        self.enqueue(from, Recipient::Module(to), message, false);
    }

    fn enqueue(&mut self, from: Endpoint, to: Recipient, message: Message, forward_externally: bool) {
        self.queue.push_back(QueuedMessage { from, to, message, forward_externally });
    }

    fn drain_outbox(&mut self, from: Endpoint, outbox: Vec<Outbox>) {
        for item in outbox {
            self.enqueue(from, item.to, item.message, item.forward_externally);
        }
    }

    /// Drain the queue, dispatching each message to every matching handler
    /// in priority order. Handlers that queue further messages during
    /// dispatch are seen by this same call, matching the source's
    /// run-to-completion queue loop (§4.4). Once the queue runs dry, a
    /// single `IDLE` message is synthesised and dispatched so modules can
    /// notice idleness; the queue is re-checked after each dispatched
    /// `IDLE`, so a handler reacting to idleness gets its own messages
    /// drained and, if the queue empties again, another `IDLE` round. The
    /// loop only stops once an `IDLE` dispatch leaves the queue empty.
    /// Returns the number of messages dispatched to at least one handler,
    /// `IDLE` included.
    pub fn process_message_queue(&mut self) -> usize {
        let mut dispatched = 0;
        let mut idle_was_last = false;
        loop {
            let queued = match self.queue.pop_front() {
                Some(queued) => queued,
                None => {
                    if idle_was_last {
                        break;
                    }
                    idle_was_last = true;
                    self.enqueue(Endpoint::System, Recipient::Broadcast, Message::Idle, false);
                    continue;
                }
            };
            idle_was_last = matches!(queued.message, Message::Idle);

            let size = queued.message.encode_body().len();
            let type_id = queued.message.type_id();

            let targets = match queued.to {
                Recipient::Broadcast => self.registry.matching_modules(type_id, size),
                Recipient::Module(id) => {
                    if self.registry.matching_modules(type_id, size).contains(&id) {
                        vec![id]
                    } else {
                        Vec::new()
                    }
                }
            };

            if targets.is_empty() {
                trace!(type_id, "message matched no loaded handler, dropping silently");
            } else {
                dispatched += 1;
            }

            for module_id in targets {
                let outbox = self.registry.dispatch(module_id, queued.from, &queued.message);
                self.drain_outbox(Endpoint::Module(module_id), outbox);
            }

            if queued.forward_externally {
                if let Some(broadcaster) = self.broadcaster.as_mut() {
                    broadcaster.broadcast_to_clients(&queued.message);
                }
            }
        }
        dispatched
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub use HandlerSpec as Handler;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleContext;
    use dsme_protocol::type_id;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Echo {
        spec: HandlerSpec,
        log: Rc<RefCell<Vec<Message>>>,
    }

    impl PolicyModule for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn handled_types(&self) -> &[HandlerSpec] {
            std::slice::from_ref(&self.spec)
        }
        fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, message: &Message) {
            self.log.borrow_mut().push(message.clone());
        }
    }

    struct Chain {
        spec: HandlerSpec,
        fired: Rc<RefCell<bool>>,
    }

    impl PolicyModule for Chain {
        fn name(&self) -> &'static str {
            "chain"
        }
        fn handled_types(&self) -> &[HandlerSpec] {
            std::slice::from_ref(&self.spec)
        }
        fn handle(&mut self, ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {
            *self.fired.borrow_mut() = true;
            ctx.broadcast(Message::StateQuery);
        }
    }

    #[test]
    fn broadcast_reaches_matching_handler() {
        let mut bus = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let spec = HandlerSpec::new(type_id::REBOOT_REQ, 0);
        bus.load_module(Box::new(Echo { spec, log: log.clone() }), 0);

        bus.broadcast(Endpoint::System, Message::RebootReq);
        let dispatched = bus.process_message_queue();

        assert_eq!(dispatched, 1);
        assert_eq!(log.borrow().as_slice(), &[Message::RebootReq]);
    }

    #[test]
    fn unmatched_message_is_silently_dropped() {
        let mut bus = Bus::new();
        bus.broadcast(Endpoint::System, Message::RebootReq);
        let dispatched = bus.process_message_queue();
        assert_eq!(dispatched, 0);
        assert!(bus.is_queue_empty());
    }

    #[test]
    fn message_queued_during_dispatch_is_processed_in_same_call() {
        let mut bus = Bus::new();
        let fired = Rc::new(RefCell::new(false));
        let chain_spec = HandlerSpec::new(type_id::REBOOT_REQ, 0);
        bus.load_module(Box::new(Chain { spec: chain_spec, fired: fired.clone() }), 0);

        let log = Rc::new(RefCell::new(Vec::new()));
        let echo_spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
        bus.load_module(Box::new(Echo { spec: echo_spec, log: log.clone() }), 0);

        bus.broadcast(Endpoint::System, Message::RebootReq);
        let dispatched = bus.process_message_queue();

        assert!(*fired.borrow());
        assert_eq!(dispatched, 2);
        assert_eq!(log.borrow().as_slice(), &[Message::StateQuery]);
        assert!(bus.is_queue_empty());
    }

    #[test]
    fn unloaded_module_no_longer_receives_messages() {
        let mut bus = Bus::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let spec = HandlerSpec::new(type_id::REBOOT_REQ, 0);
        let id = bus.load_module(Box::new(Echo { spec, log: log.clone() }), 0);

        bus.unload_module(id);
        bus.broadcast(Endpoint::System, Message::RebootReq);
        bus.process_message_queue();

        assert!(log.borrow().is_empty());
        assert!(!bus.is_loaded(id));
    }

    #[test]
    fn directed_send_does_not_reach_other_modules() {
        let mut bus = Bus::new();
        let log_a = Rc::new(RefCell::new(Vec::new()));
        let log_b = Rc::new(RefCell::new(Vec::new()));
        let spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
        let module_a = bus.load_module(Box::new(Echo { spec, log: log_a.clone() }), 0);
        bus.load_module(Box::new(Echo { spec, log: log_b.clone() }), 0);

        bus.send(Endpoint::System, module_a, Message::StateQuery);
        bus.process_message_queue();

        assert_eq!(log_a.borrow().len(), 1);
        assert!(log_b.borrow().is_empty());
    }
}
