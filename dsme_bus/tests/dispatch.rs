//! Integration tests exercising handler priority ordering and isolation
//! through the public `Bus` API only.

use dsme_bus::{Bus, HandlerSpec, ModuleContext, PolicyModule};
use dsme_protocol::{type_id, Endpoint, Message};
use std::cell::RefCell;
use std::rc::Rc;

struct PriorityRecorder {
    spec: HandlerSpec,
    name: &'static str,
    order: Rc<RefCell<Vec<&'static str>>>,
}

impl PolicyModule for PriorityRecorder {
    fn name(&self) -> &'static str {
        self.name
    }
    fn handled_types(&self) -> &[HandlerSpec] {
        std::slice::from_ref(&self.spec)
    }
    fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {
        self.order.borrow_mut().push(self.name);
    }
}

#[test]
fn higher_priority_handler_runs_before_lower_priority_handler() {
    let mut bus = Bus::new();
    let order = Rc::new(RefCell::new(Vec::new()));
    let spec = HandlerSpec::new(type_id::REBOOT_REQ, 0);

    bus.load_module(Box::new(PriorityRecorder { spec, name: "low", order: order.clone() }), 1);
    bus.load_module(Box::new(PriorityRecorder { spec, name: "high", order: order.clone() }), 10);
    bus.load_module(Box::new(PriorityRecorder { spec, name: "mid", order: order.clone() }), 5);

    bus.broadcast(Endpoint::System, Message::RebootReq);
    bus.process_message_queue();

    assert_eq!(order.borrow().as_slice(), &["high", "mid", "low"]);
}

struct FiniSender {
    spec: HandlerSpec,
}

impl PolicyModule for FiniSender {
    fn name(&self) -> &'static str {
        "fini-sender"
    }
    fn handled_types(&self) -> &[HandlerSpec] {
        std::slice::from_ref(&self.spec)
    }
    fn fini(&mut self, ctx: &mut ModuleContext) {
        ctx.broadcast(Message::StateQuery);
    }
    fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {}
}

struct QueryCounter {
    spec: HandlerSpec,
    count: Rc<RefCell<usize>>,
}

impl PolicyModule for QueryCounter {
    fn name(&self) -> &'static str {
        "query-counter"
    }
    fn handled_types(&self) -> &[HandlerSpec] {
        std::slice::from_ref(&self.spec)
    }
    fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, _message: &Message) {
        *self.count.borrow_mut() += 1;
    }
}

#[test]
fn messages_queued_during_fini_still_reach_surviving_handlers() {
    let mut bus = Bus::new();
    let count = Rc::new(RefCell::new(0));
    let query_spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
    bus.load_module(Box::new(QueryCounter { spec: query_spec, count: count.clone() }), 0);

    let fini_spec = HandlerSpec::new(type_id::REBOOT_REQ, 0);
    let fini_id = bus.load_module(Box::new(FiniSender { spec: fini_spec }), 0);

    bus.unload_module(fini_id);
    bus.process_message_queue();

    assert_eq!(*count.borrow(), 1);
    assert!(!bus.is_loaded(fini_id));
}

#[test]
fn module_unloaded_mid_run_no_longer_receives_later_broadcasts() {
    let mut bus = Bus::new();
    let count = Rc::new(RefCell::new(0));
    let spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
    let id = bus.load_module(Box::new(QueryCounter { spec, count: count.clone() }), 0);

    bus.broadcast(Endpoint::System, Message::StateQuery);
    bus.process_message_queue();
    assert_eq!(*count.borrow(), 1);

    bus.unload_module(id);
    bus.broadcast(Endpoint::System, Message::StateQuery);
    bus.process_message_queue();
    assert_eq!(*count.borrow(), 1, "unloaded module must not be dispatched to again");
}
