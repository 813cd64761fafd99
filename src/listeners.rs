use crate::common::lock;
use crate::event::{Event, EventKind};
use slab::Slab;
use std::sync::{Arc, Mutex};

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`Listeners::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// Display-level listeners keyed by event kind.
#[derive(Default)]
pub struct Listeners {
    table: Mutex<Slab<(EventKind, Listener)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        ListenerId(lock(&self.table).insert((kind, listener)))
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        lock(&self.table).try_remove(id.0).is_some()
    }

    /// Call every listener registered for the event's kind. The table is not
    /// locked while listeners run, so they may add or remove listeners.
    pub fn notify(&self, event: &Event) -> usize {
        let kind = event.kind();
        let matching: Vec<Listener> = lock(&self.table)
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(_, (_, l))| Arc::clone(l))
            .collect();
        for listener in &matching {
            listener(event);
        }
        matching.len()
    }
}
