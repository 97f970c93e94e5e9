//! Module registry (§4.3).
//!
//! Modules are statically linked Rust types rather than `dlopen`ed shared
//! objects (§9, Design Notes: "a sum type of statically linked policy
//! modules is the natural replacement"). Handler records reference their
//! owning module by [`ModuleId`] rather than by borrowed pointer (§9:
//! "represent this with an arena/slotmap").

use dsme_protocol::{Endpoint, Message, ModuleId, Recipient, TypeId};

/// One `(type, size)` pair a module wants to receive, mirroring the
/// source's null-terminated `message_handlers` array (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct HandlerSpec {
    pub type_id: TypeId,
    pub size: usize,
}

/// An outgoing message a module produced while handling `init`, `fini`, or
/// a dispatched message. Bus-level code turns these into queue entries.
pub struct Outbox {
    pub to: Recipient,
    pub message: Message,
    pub forward_externally: bool,
}

/// Per-call context passed to [`PolicyModule`] methods.
///
/// Replaces the source's thread-local "currently handling module" global
/// with an explicit value threaded through dispatch (§9).
pub struct ModuleContext {
    module_id: ModuleId,
    outbox: Vec<Outbox>,
}

impl ModuleContext {
    fn new(module_id: ModuleId) -> Self {
        ModuleContext { module_id, outbox: Vec::new() }
    }

    /// The module currently being invoked.
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Queue `message` for broadcast to every matching handler and to every
    /// connected IPC client.
    pub fn broadcast(&mut self, message: Message) {
        self.outbox.push(Outbox { to: Recipient::Broadcast, message, forward_externally: true });
    }

    /// Queue `message` for broadcast to every matching in-process handler
    /// only; external clients do not see it.
    pub fn broadcast_internally(&mut self, message: Message) {
        self.outbox.push(Outbox { to: Recipient::Broadcast, message, forward_externally: false });
    }

    /// Queue `message` for delivery to a single module's handlers only.
    pub fn send(&mut self, to: ModuleId, message: Message) {
        self.outbox.push(Outbox { to: Recipient::Module(to), message, forward_externally: false });
    }

    fn take_outbox(self) -> Vec<Outbox> {
        self.outbox
    }
}

/// A statically linked policy plug-in (§4.3, §9).
pub trait PolicyModule {
    /// Stable name used in logs and the `-p` CLI surface.
    fn name(&self) -> &'static str;

    /// The `(type, size)` pairs this module handles.
    fn handled_types(&self) -> &[HandlerSpec];

    /// Called once, immediately after the module is registered.
    fn init(&mut self, _ctx: &mut ModuleContext) {}

    /// Called once, immediately before the module is unregistered.
    fn fini(&mut self, _ctx: &mut ModuleContext) {}

    /// Invoked once per matching queued message (§4.4).
    fn handle(&mut self, ctx: &mut ModuleContext, from: Endpoint, message: &Message);
}

struct ModuleEntry {
    module: Box<dyn PolicyModule>,
    priority: i32,
}

#[derive(Clone, Copy)]
struct HandlerEntry {
    type_id: TypeId,
    size: usize,
    module_id: ModuleId,
    priority: i32,
    sequence: u64,
}

/// Owns every loaded module and the sorted handler dispatch table (§4.3).
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Option<ModuleEntry>>,
    handlers: Vec<HandlerEntry>,
    next_sequence: u64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` at `priority`, call its `init` hook, and return
    /// its id plus any messages it queued during init.
    pub fn load_module(&mut self, module: Box<dyn PolicyModule>, priority: i32) -> (ModuleId, Vec<Outbox>) {
        let slot = self.modules.iter().position(|m| m.is_none());
        let index = slot.unwrap_or(self.modules.len());
        let module_id = ModuleId(index as u32);

        let handled = module.handled_types().to_vec();
        let entry = ModuleEntry { module, priority };
        if slot.is_some() {
            self.modules[index] = Some(entry);
        } else {
            self.modules.push(Some(entry));
        }

        for spec in handled {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.handlers.push(HandlerEntry {
                type_id: spec.type_id,
                size: spec.size,
                module_id,
                priority,
                sequence,
            });
        }
        self.resort_handlers();

        let mut ctx = ModuleContext::new(module_id);
        if let Some(Some(entry)) = self.modules.get_mut(index) {
            entry.module.init(&mut ctx);
        }
        (module_id, ctx.take_outbox())
    }

    /// Remove every handler owned by `module_id`, call its `fini` hook, and
    /// drop the module. Returns `None` if the id was not registered.
    pub fn unload_module(&mut self, module_id: ModuleId) -> Option<Vec<Outbox>> {
        let index = module_id.0 as usize;
        let entry = self.modules.get_mut(index)?.as_mut()?;

        let mut ctx = ModuleContext::new(module_id);
        entry.module.fini(&mut ctx);
        let outbox = ctx.take_outbox();

        self.modules[index] = None;
        self.handlers.retain(|h| h.module_id != module_id);
        Some(outbox)
    }

    /// True if `module_id` currently names a loaded module.
    pub fn is_loaded(&self, module_id: ModuleId) -> bool {
        matches!(self.modules.get(module_id.0 as usize), Some(Some(_)))
    }

    pub fn name_of(&self, module_id: ModuleId) -> Option<&'static str> {
        self.modules.get(module_id.0 as usize)?.as_ref().map(|e| e.module.name())
    }

    /// Module ids (in dispatch-priority order) whose handler table matches
    /// `(type_id, size)`.
    pub fn matching_modules(&self, type_id: TypeId, size: usize) -> Vec<ModuleId> {
        self.handlers
            .iter()
            .filter(|h| h.type_id == type_id && h.size == size)
            .map(|h| h.module_id)
            .collect()
    }

    /// Invoke `module_id`'s `handle` callback and return any messages it
    /// queued.
    pub fn dispatch(&mut self, module_id: ModuleId, from: Endpoint, message: &Message) -> Vec<Outbox> {
        let mut ctx = ModuleContext::new(module_id);
        if let Some(Some(entry)) = self.modules.get_mut(module_id.0 as usize) {
            entry.module.handle(&mut ctx, from, message);
        }
        ctx.take_outbox()
    }

    /// Ids of every currently loaded module, in load order.
    pub fn loaded_ids(&self) -> Vec<ModuleId> {
        self.modules
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|_| ModuleId(i as u32)))
            .collect()
    }

    fn resort_handlers(&mut self) {
        // Descending type, then descending priority, then insertion order —
        // matches the source's dispatch table ordering contract (§4.3).
        self.handlers.sort_by(|a, b| {
            b.type_id
                .cmp(&a.type_id)
                .then(b.priority.cmp(&a.priority))
                .then(a.sequence.cmp(&b.sequence))
        });
    }
}

impl HandlerSpec {
    pub const fn new(type_id: TypeId, size: usize) -> Self {
        HandlerSpec { type_id, size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_protocol::type_id;

    struct RecordingModule {
        name: &'static str,
        spec: HandlerSpec,
        seen: Vec<TypeId>,
    }

    impl PolicyModule for RecordingModule {
        fn name(&self) -> &'static str {
            self.name
        }
        fn handled_types(&self) -> &[HandlerSpec] {
            std::slice::from_ref(&self.spec)
        }
        fn handle(&mut self, _ctx: &mut ModuleContext, _from: Endpoint, message: &Message) {
            self.seen.push(message.type_id());
        }
    }

    #[test]
    fn handlers_are_sorted_descending_type_then_priority() {
        let mut registry = ModuleRegistry::new();
        let spec_a = HandlerSpec::new(type_id::STATE_QUERY, 0);
        let spec_b = HandlerSpec::new(type_id::REBOOT_REQ, 0);

        let (low, _) = registry.load_module(
            Box::new(RecordingModule { name: "low", spec: spec_a, seen: vec![] }),
            0,
        );
        let (high, _) = registry.load_module(
            Box::new(RecordingModule { name: "high", spec: spec_a, seen: vec![] }),
            10,
        );
        registry.load_module(Box::new(RecordingModule { name: "other", spec: spec_b, seen: vec![] }), 5);

        let matches = registry.matching_modules(type_id::STATE_QUERY, 0);
        assert_eq!(matches, vec![high, low]);
    }

    #[test]
    fn unload_removes_all_handlers_for_that_module() {
        let mut registry = ModuleRegistry::new();
        let spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
        let (id, _) = registry.load_module(Box::new(RecordingModule { name: "m", spec, seen: vec![] }), 0);
        assert_eq!(registry.matching_modules(type_id::STATE_QUERY, 0), vec![id]);

        registry.unload_module(id).expect("module was loaded");
        assert!(registry.matching_modules(type_id::STATE_QUERY, 0).is_empty());
        assert!(!registry.is_loaded(id));
    }

    #[test]
    fn unload_of_unknown_id_returns_none() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.unload_module(ModuleId(42)).is_none());
    }

    #[test]
    fn module_id_slot_is_reused_after_unload() {
        let mut registry = ModuleRegistry::new();
        let spec = HandlerSpec::new(type_id::STATE_QUERY, 0);
        let (first, _) = registry.load_module(Box::new(RecordingModule { name: "a", spec, seen: vec![] }), 0);
        registry.unload_module(first).unwrap();
        let (second, _) = registry.load_module(Box::new(RecordingModule { name: "b", spec, seen: vec![] }), 0);
        assert_eq!(first, second);
    }
}
