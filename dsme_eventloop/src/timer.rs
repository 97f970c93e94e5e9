//! Timer service (§4.10): one-shot timers scheduled on the reactor, driving
//! `dsme_state`'s grace windows and `dsme_thermal`'s poll/debounce delays
//! without blocking the event loop.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Opaque handle returned by [`TimerService::arm`], distinct per timer
/// domain (state machine, thermal) — callers keep their own `TimerId` type
/// and map it to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Entry {
    at: Instant,
    handle: Handle,
    cancelled: bool,
}

/// A min-heap of pending fire times, ordered earliest-first.
#[derive(Default)]
pub struct TimerService {
    entries: BinaryHeap<Reverse<OrderedEntry>>,
    next_id: u64,
    live: std::collections::HashSet<u64>,
}

struct OrderedEntry(Entry);

impl PartialEq for OrderedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.at == other.0.at
    }
}
impl Eq for OrderedEntry {}
impl PartialOrd for OrderedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.at.cmp(&other.0.at)
    }
}

impl TimerService {
    pub fn new() -> Self {
        TimerService { entries: BinaryHeap::new(), next_id: 0, live: std::collections::HashSet::new() }
    }

    /// Arm a new one-shot timer, firing after `after`.
    pub fn arm(&mut self, after: Duration) -> Handle {
        self.next_id += 1;
        let handle = Handle(self.next_id);
        self.live.insert(handle.0);
        self.entries.push(Reverse(OrderedEntry(Entry { at: Instant::now() + after, handle, cancelled: false })));
        handle
    }

    /// Cancel a previously armed timer. A no-op if it already fired.
    pub fn cancel(&mut self, handle: Handle) {
        self.live.remove(&handle.0);
    }

    /// The instant the earliest still-live timer should fire, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_cancelled();
        self.entries.peek().map(|Reverse(e)| e.0.at)
    }

    fn drop_cancelled(&mut self) {
        while let Some(Reverse(top)) = self.entries.peek() {
            if self.live.contains(&top.0.handle.0) {
                break;
            }
            self.entries.pop();
        }
    }

    /// Pop every timer whose deadline has passed, in fire order.
    pub fn drain_expired(&mut self) -> Vec<Handle> {
        let now = Instant::now();
        let mut fired = Vec::new();
        loop {
            self.drop_cancelled();
            match self.entries.peek() {
                Some(Reverse(top)) if top.0.at <= now => {
                    let Reverse(OrderedEntry(entry)) = self.entries.pop().unwrap();
                    if self.live.remove(&entry.handle.0) {
                        fired.push(entry.handle);
                    }
                }
                _ => break,
            }
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
