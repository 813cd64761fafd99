//! Work submitted from arbitrary threads, deferred events and timers, all
//! executed by the thread holding the exclusive section.

use crate::common::lock;
use crate::coordinator::ExclusivityCoordinator;
use crate::error::{panic_message, protocol_violation, FailureOrigin, SyncError};
use crate::event::Event;
use crate::listeners::Listeners;
use crate::report::ErrorReporter;
use crate::timer::{TimerId, TimerQueue};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

pub type Action = Box<dyn FnOnce() + Send + 'static>;
pub type Waker = Arc<dyn Fn() + Send + Sync>;

pub const DEFAULT_TIMER_THREAD_NAME: &str = "ui-handoff-timers";

enum WorkItem {
    Async(Action),
    /// The action sends its own outcome to the blocked caller.
    Sync(Action),
    /// A deadline passed; the callback still lives in the timer table.
    Timer(TimerId),
}

struct TimerEntry {
    deadline: Instant,
    callback: Action,
}

#[derive(Default)]
struct SyncState {
    pending: VecDeque<WorkItem>,
    deferred: VecDeque<Event>,
    timers: HashMap<TimerId, TimerEntry>,
    disposed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SyncState>,
    waker: Mutex<Option<Waker>>,
}

impl Shared {
    fn wake(&self) {
        let waker = lock(&self.waker).clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    fn timer_due(&self, id: TimerId) {
        let queued = {
            let mut state = lock(&self.state);
            let due = !state.disposed
                && state
                    .timers
                    .get(&id)
                    .is_some_and(|entry| entry.deadline <= Instant::now());
            if due {
                state.pending.push_back(WorkItem::Timer(id));
            }
            due
        };
        if queued {
            tracing::trace!(?id, "timer due");
            self.wake();
        }
    }
}

pub struct CrossThreadSynchronizer {
    shared: Arc<Shared>,
    coordinator: Arc<ExclusivityCoordinator>,
    listeners: Arc<Listeners>,
    reporter: Arc<ErrorReporter>,
    owner: ThreadId,
    timers: TimerQueue,
    next_timer: AtomicU64,
}

impl CrossThreadSynchronizer {
    /// `owner` is the thread running the pump loop; synchronous submissions
    /// from it run inline.
    pub fn new(
        coordinator: Arc<ExclusivityCoordinator>,
        listeners: Arc<Listeners>,
        reporter: Arc<ErrorReporter>,
        owner: ThreadId,
        timer_thread_name: &str,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let timers = TimerQueue::spawn(
            timer_thread_name,
            Box::new(move |id| {
                if let Some(shared) = weak.upgrade() {
                    shared.timer_due(id);
                }
            }),
        )?;
        Ok(Self {
            shared,
            coordinator,
            listeners,
            reporter,
            owner,
            timers,
            next_timer: AtomicU64::new(1),
        })
    }

    /// A synchronizer owned by the current thread with its own listeners and
    /// reporter.
    pub fn standalone(coordinator: Arc<ExclusivityCoordinator>) -> Result<Self> {
        Self::new(
            coordinator,
            Arc::new(Listeners::new()),
            Arc::new(ErrorReporter::new()),
            thread::current().id(),
            DEFAULT_TIMER_THREAD_NAME,
        )
    }

    /// Hook called after anything is queued, used to interrupt the pump
    /// loop's sleep.
    pub fn set_waker(&self, waker: Option<Waker>) {
        *lock(&self.shared.waker) = waker;
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    fn enqueue(&self, item: WorkItem) -> Result<(), SyncError> {
        {
            let mut state = lock(&self.shared.state);
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.pending.push_back(item);
        }
        self.shared.wake();
        Ok(())
    }

    /// Queue `action` and return immediately.
    pub fn submit_async(&self, action: impl FnOnce() + Send + 'static) -> Result<(), SyncError> {
        self.enqueue(WorkItem::Async(Box::new(action)))
    }

    /// Run `action` on the owning thread and wait for its outcome.
    ///
    /// Errors and panics raised by `action` are returned to the caller. When
    /// the current thread can own the section without waiting on the pump
    /// loop, the action runs inline.
    pub fn submit_sync<R, F>(&self, action: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }

        if thread::current().id() == self.owner {
            let _section = self.coordinator.enter(false);
            return run_caught(action);
        }
        if let Some(_section) = self
            .coordinator
            .enter_if_reentrant(self.coordinator.is_dispatch_thread())
        {
            return run_caught(action);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.enqueue(WorkItem::Sync(Box::new(move || {
            let _ = tx.send(run_caught(action));
        })))?;
        match rx.recv() {
            Ok(outcome) => outcome,
            // The item was dropped unexecuted.
            Err(_) => Err(SyncError::Disposed),
        }
    }

    /// Queue an event to be delivered to the display listeners by the
    /// owning thread.
    pub fn post_deferred(&self, event: Event) -> Result<(), SyncError> {
        {
            let mut state = lock(&self.shared.state);
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.deferred.push_back(event);
        }
        self.shared.wake();
        Ok(())
    }

    /// Run `callback` on the owning thread once `delay` has elapsed, unless
    /// cancelled first.
    pub fn register_timer(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TimerId, SyncError> {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::SeqCst));
        let deadline = Instant::now() + delay;
        {
            let mut state = lock(&self.shared.state);
            if state.disposed {
                return Err(SyncError::Disposed);
            }
            state.timers.insert(
                id,
                TimerEntry {
                    deadline,
                    callback: Box::new(callback),
                },
            );
        }
        self.timers.register(deadline, id);
        Ok(id)
    }

    /// Cancel a timer. Returns `true` if the callback had not run yet; it
    /// will then never run.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = lock(&self.shared.state).timers.remove(&id).is_some();
        if removed {
            self.timers.wakeup();
        }
        removed
    }

    pub fn has_pending(&self) -> bool {
        let state = lock(&self.shared.state);
        !state.pending.is_empty() || !state.deferred.is_empty()
    }

    pub fn pending_work_len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    pub fn deferred_len(&self) -> usize {
        lock(&self.shared.state).deferred.len()
    }

    pub fn active_timers(&self) -> usize {
        lock(&self.shared.state).timers.len()
    }

    /// Run the work queued when the call starts (at most `max_items`), then
    /// one pass over the deferred events queued when that pass starts.
    /// Anything queued meanwhile waits for the next call.
    ///
    /// The caller must hold the exclusive section.
    pub fn drain_once(&self, max_items: Option<usize>) -> bool {
        if !self.coordinator.is_held_by_current_thread() {
            protocol_violation!(
                "drain_once on {:?} without holding the exclusive section (depth {})",
                thread::current().id(),
                self.coordinator.depth()
            );
        }

        let budget = self
            .pending_work_len()
            .min(max_items.unwrap_or(usize::MAX));
        let mut did_work = false;
        for _ in 0..budget {
            let item = lock(&self.shared.state).pending.pop_front();
            let Some(item) = item else {
                break;
            };
            did_work = true;
            self.run_item(item);
        }

        let deferred_budget = self.deferred_len();
        for _ in 0..deferred_budget {
            let event = lock(&self.shared.state).deferred.pop_front();
            let Some(event) = event else {
                break;
            };
            did_work = true;
            self.deliver(event);
        }
        did_work
    }

    fn run_item(&self, item: WorkItem) {
        match item {
            WorkItem::Async(action) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                    self.reporter
                        .report(FailureOrigin::WorkItem, panic_message(payload.as_ref()));
                }
            }
            WorkItem::Sync(action) => action(),
            WorkItem::Timer(id) => {
                let entry = lock(&self.shared.state).timers.remove(&id);
                let Some(entry) = entry else {
                    tracing::trace!(?id, "timer cancelled before it ran");
                    return;
                };
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry.callback)) {
                    self.reporter
                        .report(FailureOrigin::Timer, panic_message(payload.as_ref()));
                }
            }
        }
    }

    fn deliver(&self, event: Event) {
        let kind = event.kind();
        let listeners = &self.listeners;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listeners.notify(&event))) {
            self.reporter
                .report(FailureOrigin::Event(kind), panic_message(payload.as_ref()));
        }
    }

    /// Drop everything queued and refuse further submissions. Callers blocked
    /// in [`submit_sync`](Self::submit_sync) get [`SyncError::Disposed`].
    pub fn dispose(&self) {
        let (pending, deferred, timers) = {
            let mut state = lock(&self.shared.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.deferred),
                std::mem::take(&mut state.timers),
            )
        };
        tracing::debug!(
            pending = pending.len(),
            deferred = deferred.len(),
            timers = timers.len(),
            "synchronizer disposed"
        );
        // Dropped outside the lock: dropping a sync item wakes its caller.
        drop(pending);
        drop(deferred);
        drop(timers);
        self.timers.shutdown();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared.state).disposed
    }
}

fn run_caught<R>(action: impl FnOnce() -> anyhow::Result<R>) -> Result<R, SyncError> {
    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SyncError::Failed(err)),
        Err(payload) => Err(SyncError::Panicked(panic_message(payload.as_ref()))),
    }
}
