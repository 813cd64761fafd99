use crate::common::{lock, wait};
use anyhow::Result;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Logical timer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

pub(crate) type DueHook = Box<dyn Fn(TimerId) + Send + Sync>;

#[derive(Default)]
struct HeapState {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    shutdown: bool,
}

struct Inner {
    heap: Mutex<HeapState>,
    condvar: Condvar,
}

/// Deadline heap served by one thread that sleeps on a condition variable
/// until the earliest deadline, or until woken by a new registration.
///
/// The queue only reports that a deadline passed; whether the timer is still
/// wanted is decided by the `on_due` hook.
pub(crate) struct TimerQueue {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerQueue {
    pub(crate) fn spawn(thread_name: &str, on_due: DueHook) -> Result<Self> {
        let inner = Arc::new(Inner {
            heap: Mutex::new(HeapState::default()),
            condvar: Condvar::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || Self::run(thread_inner, on_due))?;
        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(inner: Arc<Inner>, on_due: DueHook) {
        let mut heap_guard = lock(&inner.heap);
        loop {
            while heap_guard.heap.peek().is_none() && !heap_guard.shutdown {
                heap_guard = wait(&inner.condvar, heap_guard);
            }
            if heap_guard.shutdown {
                break;
            }
            let now = Instant::now();
            if let Some(Reverse((deadline, id))) = heap_guard.heap.peek().copied() {
                if deadline <= now {
                    heap_guard.heap.pop();
                    drop(heap_guard);
                    on_due(id);
                    heap_guard = lock(&inner.heap);
                } else {
                    let timeout = deadline.saturating_duration_since(now);
                    heap_guard = inner
                        .condvar
                        .wait_timeout(heap_guard, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        tracing::debug!("timer thread exited");
    }

    pub(crate) fn register(&self, deadline: Instant, id: TimerId) {
        let mut heap = lock(&self.inner.heap);
        heap.heap.push(Reverse((deadline, id)));
        self.inner.condvar.notify_one();
    }

    pub(crate) fn wakeup(&self) {
        self.inner.condvar.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut heap = lock(&self.inner.heap);
            heap.shutdown = true;
            heap.heap.clear();
            self.inner.condvar.notify_all();
        }
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("timer thread panicked");
            }
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
