//! Minimal in-process host toolkit.
//!
//! The host owns a dispatch thread, a default event queue and a stack of
//! queues pushed over it. While the stack is empty the dispatch thread drains
//! the default queue itself; once a substitute queue is pushed it stops doing
//! so and only runs native callbacks, leaving events to be pulled with
//! [`HostToolkit::next_event`].

use crate::common::{lock, wait};
use crate::error::panic_message;
use crate::event::Event;
use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use slab::Slab;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

pub type HostListener = Arc<dyn Fn(&Event) + Send + Sync>;
type NativeCall = Box<dyn FnOnce() + Send>;

/// Identifies a queue pushed on the host queue stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

/// Result of a blocking pull from the host queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    Event(Event),
    Woken,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    native: VecDeque<NativeCall>,
    stack: Vec<QueueId>,
    wake_requested: bool,
    closed: bool,
}

enum HostWork {
    Native(NativeCall),
    Event(Event),
}

pub struct HostToolkit {
    state: Mutex<QueueState>,
    condvar: Condvar,
    listeners: Mutex<Slab<HostListener>>,
    dispatch_thread: OnceCell<ThreadId>,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_queue_id: AtomicU64,
}

impl HostToolkit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            condvar: Condvar::new(),
            listeners: Mutex::new(Slab::new()),
            dispatch_thread: OnceCell::new(),
            handle: Mutex::new(None),
            next_queue_id: AtomicU64::new(1),
        })
    }

    /// Spawn the dispatch thread. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>, thread_name: &str) -> Result<()> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Ok(());
        }
        let host = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || host.run_dispatch_loop())?;
        if self.dispatch_thread.set(spawned.thread().id()).is_err() {
            tracing::warn!(
                thread = thread_name,
                "dispatch thread restarted; keeping the first identity"
            );
        }
        tracing::debug!(thread = thread_name, "host dispatch thread started");
        *handle = Some(spawned);
        Ok(())
    }

    pub fn dispatch_thread_id(&self) -> Option<ThreadId> {
        self.dispatch_thread.get().copied()
    }

    pub fn is_dispatch_thread(&self) -> bool {
        self.dispatch_thread.get() == Some(&thread::current().id())
    }

    /// Post an event to the default queue.
    pub fn post_event(&self, event: Event) {
        let mut state = lock(&self.state);
        if state.closed {
            tracing::debug!(kind = %event.kind(), "host queue closed; dropping event");
            return;
        }
        state.events.push_back(event);
        self.condvar.notify_all();
    }

    /// Run `call` on the dispatch thread as a native callback.
    pub fn invoke_later(&self, call: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(anyhow!("host toolkit is shut down"));
        }
        state.native.push_back(Box::new(call));
        self.condvar.notify_all();
        Ok(())
    }

    /// Run `call` on the dispatch thread and wait for its result. Runs inline
    /// when already on the dispatch thread.
    pub fn invoke_and_wait<R, F>(&self, call: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_dispatch_thread() {
            return Ok(call());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.invoke_later(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(call));
            let _ = tx.send(outcome);
        })?;
        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(anyhow!(
                "host call panicked: {}",
                panic_message(payload.as_ref())
            )),
            Err(_) => Err(anyhow!("host toolkit shut down before the call ran")),
        }
    }

    pub fn add_listener(&self, listener: HostListener) -> usize {
        lock(&self.listeners).insert(listener)
    }

    pub fn remove_listener(&self, key: usize) -> bool {
        lock(&self.listeners).try_remove(key).is_some()
    }

    /// Deliver `event` to every host listener on the calling thread.
    pub fn dispatch(&self, event: &Event) {
        let listeners: Vec<HostListener> =
            lock(&self.listeners).iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn allocate_queue_id(&self) -> QueueId {
        QueueId(self.next_queue_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn push_queue(&self, id: QueueId) {
        let mut state = lock(&self.state);
        state.stack.push(id);
        tracing::debug!(?id, depth = state.stack.len(), "queue pushed");
        self.condvar.notify_all();
    }

    /// Remove `id` from the queue stack, restoring the queue beneath it.
    pub(crate) fn pop_queue(&self, id: QueueId) -> bool {
        let mut state = lock(&self.state);
        let Some(pos) = state.stack.iter().rposition(|q| *q == id) else {
            return false;
        };
        if pos + 1 != state.stack.len() {
            tracing::warn!(?id, "popping a queue that is not on top of the stack");
        }
        state.stack.remove(pos);
        tracing::debug!(?id, depth = state.stack.len(), "queue popped");
        // The dispatch thread may resume auto-draining.
        self.condvar.notify_all();
        true
    }

    /// The queue currently on top of the stack; `None` means the default queue.
    pub fn active_queue(&self) -> Option<QueueId> {
        lock(&self.state).stack.last().copied()
    }

    /// Block until an event is available, a wake is requested, or the host is
    /// shut down (`None`).
    pub fn next_event(&self) -> Option<Pulled> {
        let mut state = lock(&self.state);
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(Pulled::Event(event));
            }
            if state.wake_requested {
                state.wake_requested = false;
                return Some(Pulled::Woken);
            }
            if state.closed {
                return None;
            }
            state = wait(&self.condvar, state);
        }
    }

    /// Make a pending or the next [`next_event`](Self::next_event) return.
    pub fn wake(&self) {
        let mut state = lock(&self.state);
        state.wake_requested = true;
        self.condvar.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn pending_events(&self) -> usize {
        lock(&self.state).events.len()
    }

    /// Close the queues and join the dispatch thread. Queued native calls are
    /// dropped, which fails any `invoke_and_wait` still waiting on them.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = lock(&self.state);
            state.closed = true;
            self.condvar.notify_all();
            std::mem::take(&mut state.native)
        };
        drop(dropped);
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("host dispatch thread panicked");
            }
        }
        tracing::debug!("host toolkit shut down");
    }

    fn next_host_work(&self) -> Option<HostWork> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return None;
            }
            if let Some(call) = state.native.pop_front() {
                return Some(HostWork::Native(call));
            }
            if state.stack.is_empty() {
                if let Some(event) = state.events.pop_front() {
                    return Some(HostWork::Event(event));
                }
            }
            state = wait(&self.condvar, state);
        }
    }

    fn run_dispatch_loop(self: Arc<Self>) {
        while let Some(work) = self.next_host_work() {
            let result = match work {
                HostWork::Native(call) => panic::catch_unwind(AssertUnwindSafe(call)),
                HostWork::Event(event) => {
                    panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&event)))
                }
            };
            if let Err(payload) = result {
                let panic_message = panic_message(payload.as_ref());
                tracing::error!(panic_message, "host callback panicked");
            }
        }
        tracing::debug!("host dispatch loop exited");
    }
}
