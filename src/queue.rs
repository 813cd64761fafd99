use crate::common::lock;
use crate::event::Event;
use crate::host::{HostToolkit, Pulled, QueueId};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct SubstituteState {
    pending: Option<Event>,
    installs: usize,
}

/// Event queue pushed over the host's default queue so events are pulled one
/// at a time by the pump loop instead of being auto-dispatched.
pub struct SubstituteEventQueue {
    id: QueueId,
    host: Arc<HostToolkit>,
    state: Mutex<SubstituteState>,
}

impl SubstituteEventQueue {
    pub fn new(host: Arc<HostToolkit>) -> Self {
        Self {
            id: host.allocate_queue_id(),
            host,
            state: Mutex::new(SubstituteState::default()),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Push this queue on the host stack. Repeated installs are counted; only
    /// the first one touches the stack.
    pub fn install(&self) {
        let mut state = lock(&self.state);
        state.installs += 1;
        if state.installs == 1 {
            self.host.push_queue(self.id);
        }
    }

    /// Undo one [`install`](Self::install). The last one restores the queue
    /// that was active before. Returns `false` if nothing was installed.
    pub fn uninstall(&self) -> bool {
        let mut state = lock(&self.state);
        if state.installs == 0 {
            tracing::warn!(id = ?self.id, "uninstall without a matching install");
            return false;
        }
        state.installs -= 1;
        if state.installs == 0 {
            self.host.pop_queue(self.id);
        }
        true
    }

    pub fn is_installed(&self) -> bool {
        lock(&self.state).installs > 0
    }

    /// Whether this queue is the one on top of the host stack.
    pub fn is_active(&self) -> bool {
        self.host.active_queue() == Some(self.id)
    }

    /// Block until the host has an event for us, storing it in the lookahead
    /// slot. Returns `false` only once the host queue is torn down; a wake
    /// makes it return `true` with nothing pending.
    pub fn try_sleep(&self) -> bool {
        if lock(&self.state).pending.is_some() {
            return true;
        }
        match self.host.next_event() {
            Some(Pulled::Event(event)) => {
                let mut state = lock(&self.state);
                debug_assert!(state.pending.is_none(), "lookahead slot overwritten");
                state.pending = Some(event);
                true
            }
            Some(Pulled::Woken) => true,
            None => false,
        }
    }

    /// Dispatch the pending event, if any, through the host's listeners.
    pub fn dispatch_pending(&self) -> bool {
        let event = lock(&self.state).pending.take();
        match event {
            Some(event) => {
                self.host.dispatch(&event);
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Interrupt a blocked [`try_sleep`](Self::try_sleep).
    pub fn wake(&self) {
        self.host.wake();
    }
}
