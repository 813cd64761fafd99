//! The emulated display: owner of the exclusive section, the substitute queue
//! and the synchronizer, and the pump loop driving them.

use crate::common::lock;
use crate::coordinator::ExclusivityCoordinator;
use crate::error::{panic_message, protocol_violation, CallbackFailure, FailureOrigin, SyncError};
use crate::event::{Event, EventKind};
use crate::host::HostToolkit;
use crate::listeners::{ListenerId, Listeners};
use crate::pump::{can_transition, PumpState};
use crate::queue::SubstituteEventQueue;
use crate::report::ErrorReporter;
use crate::settings::Settings;
use crate::synchronizer::CrossThreadSynchronizer;
use crate::timer::TimerId;
use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

pub struct Display {
    host: Arc<HostToolkit>,
    coordinator: Arc<ExclusivityCoordinator>,
    queue: Arc<SubstituteEventQueue>,
    synchronizer: Arc<CrossThreadSynchronizer>,
    listeners: Arc<Listeners>,
    reporter: Arc<ErrorReporter>,
    thread: ThreadId,
    state: Mutex<PumpState>,
    bridge: usize,
    queue_installed: AtomicBool,
    disposed: AtomicBool,
    drain_batch_limit: Option<usize>,
}

impl Display {
    /// Create a display owned by the current thread.
    ///
    /// The host should already be started so its dispatch thread can be
    /// recognised by the exclusive section.
    pub fn new(host: Arc<HostToolkit>, settings: &Settings) -> Result<Self> {
        let coordinator = Arc::new(ExclusivityCoordinator::new());
        match host.dispatch_thread_id() {
            Some(id) => coordinator.register_dispatch_thread(id),
            None => tracing::warn!("host dispatch thread not running; reentry fast path disabled"),
        }
        let listeners = Arc::new(Listeners::new());
        let reporter = Arc::new(ErrorReporter::new());
        let synchronizer = Arc::new(CrossThreadSynchronizer::new(
            Arc::clone(&coordinator),
            Arc::clone(&listeners),
            Arc::clone(&reporter),
            thread::current().id(),
            &settings.timer_thread_name,
        )?);
        let queue = Arc::new(SubstituteEventQueue::new(Arc::clone(&host)));

        let wake_queue = Arc::clone(&queue);
        synchronizer.set_waker(Some(Arc::new(move || wake_queue.wake())));

        let bridge = {
            let coordinator = Arc::clone(&coordinator);
            let listeners = Arc::clone(&listeners);
            let reporter = Arc::clone(&reporter);
            host.add_listener(Arc::new(move |event: &Event| {
                if coordinator.is_disposed() {
                    return;
                }
                let _section = coordinator.enter_current();
                let delivered =
                    panic::catch_unwind(AssertUnwindSafe(|| listeners.notify(event)));
                if let Err(payload) = delivered {
                    reporter.report(
                        FailureOrigin::Event(event.kind()),
                        panic_message(payload.as_ref()),
                    );
                }
            }))
        };

        tracing::debug!(thread = ?thread::current().id(), "display created");
        Ok(Self {
            host,
            coordinator,
            queue,
            synchronizer,
            listeners,
            reporter,
            thread: thread::current().id(),
            state: Mutex::new(PumpState::Sleeping),
            bridge,
            queue_installed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            drain_batch_limit: settings.drain_batch_limit,
        })
    }

    pub fn coordinator(&self) -> &Arc<ExclusivityCoordinator> {
        &self.coordinator
    }

    pub fn synchronizer(&self) -> &Arc<CrossThreadSynchronizer> {
        &self.synchronizer
    }

    pub fn queue(&self) -> &Arc<SubstituteEventQueue> {
        &self.queue
    }

    pub fn host(&self) -> &Arc<HostToolkit> {
        &self.host
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    pub fn pump_state(&self) -> PumpState {
        *lock(&self.state)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Run one Sleeping → Pumping → Draining → Sleeping cycle.
    ///
    /// Blocks while there is nothing to do. Returns whether more work is
    /// already waiting; `false` once the display is disposed or the host queue
    /// is torn down.
    pub fn pump_once(&self) -> bool {
        self.check_thread("pump_once");
        if self.is_disposed() {
            return false;
        }
        self.ensure_queue_installed();

        let work_waiting = self.synchronizer.has_pending() || self.queue.has_pending();
        if !work_waiting && !self.queue.try_sleep() {
            tracing::debug!("host queue torn down; pump loop stopping");
            return false;
        }
        if self.is_disposed() {
            return false;
        }

        self.transition(PumpState::Pumping);
        {
            let _section = self.coordinator.enter(false);
            let queue = &self.queue;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| queue.dispatch_pending()))
            {
                self.reporter
                    .report(FailureOrigin::Dispatch, panic_message(payload.as_ref()));
            }
            self.transition(PumpState::Draining);
            self.synchronizer.drain_once(self.drain_batch_limit);
        }
        self.transition(PumpState::Sleeping);

        !self.is_disposed() && (self.synchronizer.has_pending() || self.queue.has_pending())
    }

    /// Pump until `done` returns `true` or the display goes away. Use
    /// [`wake`](Self::wake) to make a sleeping loop re-check `done`.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) {
        while !done() && !self.is_disposed() {
            if !self.pump_once() && (self.is_disposed() || self.host.is_shut_down()) {
                break;
            }
        }
    }

    /// Make a sleeping [`pump_once`](Self::pump_once) return. Callable from
    /// any thread.
    pub fn wake(&self) {
        self.queue.wake();
    }

    pub fn async_exec(&self, action: impl FnOnce() + Send + 'static) -> Result<(), SyncError> {
        self.synchronizer.submit_async(action)
    }

    pub fn sync_exec<R, F>(&self, action: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.synchronizer.submit_sync(action)
    }

    pub fn timer_exec(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TimerId, SyncError> {
        self.synchronizer.register_timer(delay, callback)
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.synchronizer.cancel_timer(id)
    }

    /// Queue `event` for the display listeners; it is replayed by the pump
    /// loop rather than inside the calling native callback.
    pub fn defer_event(&self, event: Event) -> Result<(), SyncError> {
        self.synchronizer.post_deferred(event)
    }

    pub fn add_listener(
        &self,
        kind: EventKind,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(kind, Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Install a hook receiving every failure caught at the pump boundary.
    pub fn on_failure(&self, hook: impl Fn(&CallbackFailure) + Send + Sync + 'static) {
        self.reporter.set_hook(Some(Arc::new(hook)));
    }

    /// Run `f` inside the exclusive section.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _section = self.coordinator.enter_current();
        f()
    }

    /// Run `call` on the host dispatch thread and wait for it, lending the
    /// exclusive section so callbacks it triggers can re-enter.
    pub fn call_host<R, F>(&self, call: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.host.is_dispatch_thread() {
            let _section = self.coordinator.enter(true);
            return Ok(call());
        }
        let _section = self.coordinator.enter(false);
        self.coordinator
            .lend(|| self.host.invoke_and_wait(call))
    }

    /// Dispose the display. Queued work is dropped, the substitute queue is
    /// uninstalled and the exclusive section refuses further entries.
    pub fn dispose(&self) {
        self.check_thread("dispose");
        self.dispose_inner();
    }

    fn dispose_inner(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.synchronizer.set_waker(None);
        self.synchronizer.dispose();
        self.host.remove_listener(self.bridge);
        if self.queue_installed.swap(false, Ordering::SeqCst) {
            self.queue.uninstall();
        }
        self.coordinator.dispose();
        self.queue.wake();
        tracing::debug!("display disposed");
    }

    fn ensure_queue_installed(&self) {
        if !self.queue_installed.swap(true, Ordering::SeqCst) {
            self.queue.install();
            tracing::debug!(queue = ?self.queue.id(), "substitute queue installed");
        }
    }

    fn transition(&self, next: PumpState) {
        let mut state = lock(&self.state);
        debug_assert!(
            can_transition(*state, next),
            "invalid pump transition: {:?} -> {:?}",
            *state,
            next
        );
        tracing::trace!(from = ?*state, to = ?next, "pump state");
        *state = next;
    }

    fn check_thread(&self, operation: &str) {
        let current = thread::current().id();
        if current != self.thread {
            protocol_violation!(
                "{operation} called on {current:?}; the display belongs to {:?}",
                self.thread
            );
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.dispose_inner();
    }
}
