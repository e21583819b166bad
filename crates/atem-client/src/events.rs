//! Subscriber registry and per-packet event delivery

use atem_core::{EventSet, StateEvent};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Subscription callback: change category plus the originating packet id
///
/// Callbacks run on the receive task. They must return quickly and must not
/// re-enter the client's state lock.
pub type EventCallback = Box<dyn Fn(StateEvent, u16) + Send + Sync>;

pub(crate) struct EventDispatcher {
    subscribers: DashMap<u32, EventCallback>,
    next_id: AtomicU32,
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher {
            subscribers: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn subscribe(&self, callback: EventCallback) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, callback);
        id
    }

    pub fn unsubscribe(&self, id: u32) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver every category in `events` once, in ordinal order
    pub fn dispatch(&self, events: EventSet, packet_id: u16) {
        for event in events.iter() {
            self.dispatch_one(event, packet_id);
        }
    }

    pub fn dispatch_one(&self, event: StateEvent, packet_id: u16) {
        for entry in self.subscribers.iter() {
            (entry.value())(event, packet_id);
        }
    }
}

/// Categories collected before the session goes active
///
/// The boot snapshot arrives while the handshake is still completing;
/// per-category, the last contributing packet id is remembered and the
/// whole set is flushed when the session activates.
#[derive(Default)]
pub(crate) struct PendingEvents {
    ids: [Option<u16>; StateEvent::COUNT],
}

impl PendingEvents {
    pub fn stage(&mut self, events: EventSet, packet_id: u16) {
        for event in events.iter() {
            self.ids[event as usize] = Some(packet_id);
        }
    }

    pub fn take(&mut self) -> Vec<(StateEvent, u16)> {
        let mut staged = Vec::new();
        for (index, id) in self.ids.iter_mut().enumerate() {
            if let Some(packet_id) = id.take() {
                if let Some(event) = StateEvent::from_index(index) {
                    staged.push((event, packet_id));
                }
            }
        }
        staged
    }

    pub fn clear(&mut self) {
        self.ids = [None; StateEvent::COUNT];
    }
}
