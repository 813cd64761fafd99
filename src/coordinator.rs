//! The exclusive section shared by the host dispatch thread and the pump loop.
//!
//! Ownership is tracked as a nesting depth. The thread that takes the depth
//! from 0 to 1 becomes the holder; further enters on that thread only nest.
//! Other threads park on a condition variable and are served in ticket order
//! once the depth returns to 0.
//!
//! The holder may *lend* the section while it blocks on the host dispatch
//! thread (see [`ExclusivityCoordinator::lend`]). During a loan the dispatch
//! thread nests on the holder's ownership without blocking, because the holder
//! cannot make progress until the dispatch thread returns. The borrow outlives
//! the loan itself: the holder resumes only after every borrowed nesting has
//! exited, so the dispatch thread keeps nesting freely until then.
//!
//! The holder's thread id only tells a nested enter apart from a competing
//! one. Whether the section is held is decided by the depth alone.

use crate::common::{lock, wait};
use crate::error::protocol_violation;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct SectionState {
    depth: usize,
    holder: Option<ThreadId>,
    lent: usize,
    borrowed: usize,
    next_ticket: u64,
    now_serving: u64,
    abandoned: HashSet<u64>,
    disposed: bool,
}

impl SectionState {
    fn serve_next(&mut self) {
        self.now_serving += 1;
        while self.abandoned.remove(&self.now_serving) {
            self.now_serving += 1;
        }
    }

    /// The dispatch thread nests without blocking while the section is lent
    /// or while it already holds a borrow from an earlier loan.
    fn can_borrow(&self, on_dispatch_thread: bool) -> bool {
        on_dispatch_thread && (self.lent > 0 || self.borrowed > 0)
    }

    /// Give up a ticket whose owner borrowed the section instead of waiting.
    fn abandon(&mut self, ticket: u64) {
        if ticket == self.now_serving {
            self.serve_next();
        } else {
            self.abandoned.insert(ticket);
        }
    }
}

pub struct ExclusivityCoordinator {
    state: Mutex<SectionState>,
    condvar: Condvar,
    dispatch_thread: OnceCell<ThreadId>,
}

impl Default for ExclusivityCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusivityCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SectionState::default()),
            condvar: Condvar::new(),
            dispatch_thread: OnceCell::new(),
        }
    }

    /// Record the identity of the host dispatch thread. Only the first call
    /// has an effect.
    pub fn register_dispatch_thread(&self, id: ThreadId) {
        if self.dispatch_thread.set(id).is_err() {
            tracing::warn!(?id, "dispatch thread already registered; ignoring");
        }
    }

    pub fn is_dispatch_thread(&self) -> bool {
        self.dispatch_thread.get() == Some(&thread::current().id())
    }

    /// Enter the exclusive section, returning a guard that exits on drop.
    ///
    /// Blocks unless the current thread already holds the section, or
    /// `on_dispatch_thread` is set while the section is lent or still borrowed.
    pub fn enter(&self, on_dispatch_thread: bool) -> Section<'_> {
        self.acquire(on_dispatch_thread);
        Section::new(self)
    }

    /// [`enter`](Self::enter) with the dispatch flag taken from the registered
    /// dispatch thread.
    pub fn enter_current(&self) -> Section<'_> {
        self.enter(self.is_dispatch_thread())
    }

    /// Enter only if it can be done without blocking.
    pub fn enter_if_reentrant(&self, on_dispatch_thread: bool) -> Option<Section<'_>> {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        if state.disposed {
            drop(state);
            protocol_violation!("enter after disposal on {me:?}");
        }
        if state.holder == Some(me) {
            state.depth += 1;
        } else if state.can_borrow(on_dispatch_thread) {
            state.depth += 1;
            state.borrowed += 1;
        } else {
            return None;
        }
        drop(state);
        Some(Section::new(self))
    }

    /// Unscoped enter. Every call must be paired with [`release`](Self::release)
    /// on the same thread.
    pub fn acquire(&self, on_dispatch_thread: bool) {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        if state.disposed {
            drop(state);
            protocol_violation!("enter after disposal on {me:?}");
        }

        if state.holder == Some(me) {
            state.depth += 1;
            return;
        }

        if state.can_borrow(on_dispatch_thread) {
            // The holder is parked waiting on this thread.
            state.depth += 1;
            state.borrowed += 1;
            tracing::trace!(depth = state.depth, "dispatch thread borrowed the section");
            return;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.depth > 0 || state.now_serving != ticket {
            if state.can_borrow(on_dispatch_thread) {
                // Lent while we were parked; the holder now waits on us.
                state.abandon(ticket);
                state.depth += 1;
                state.borrowed += 1;
                self.condvar.notify_all();
                return;
            }
            state = wait(&self.condvar, state);
            if state.disposed {
                drop(state);
                protocol_violation!("display disposed while {me:?} waited to enter");
            }
        }
        state.serve_next();
        state.holder = Some(me);
        state.depth = 1;
        tracing::trace!(thread = ?me, ticket, "entered exclusive section");
    }

    /// Unscoped exit, the counterpart of [`acquire`](Self::acquire).
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        if state.depth == 0 {
            drop(state);
            protocol_violation!("exit without matching enter (depth 0, thread {me:?})");
        }

        if state.holder == Some(me) {
            if state.depth <= state.borrowed {
                let (depth, borrowed) = (state.depth, state.borrowed);
                drop(state);
                protocol_violation!(
                    "holder {me:?} exited while the dispatch thread still borrows (depth {depth}, borrowed {borrowed})"
                );
            }
            state.depth -= 1;
            if state.depth == 0 {
                state.holder = None;
                self.condvar.notify_all();
                tracing::trace!(thread = ?me, "left exclusive section");
            }
        } else if state.borrowed > 0 {
            state.borrowed -= 1;
            state.depth -= 1;
            if state.borrowed == 0 {
                self.condvar.notify_all();
            }
        } else {
            let (depth, holder) = (state.depth, state.holder);
            drop(state);
            protocol_violation!(
                "exit on {me:?} which does not hold the section (depth {depth}, holder {holder:?})"
            );
        }
    }

    /// Run `blocking_call` while letting the host dispatch thread nest on the
    /// current thread's ownership.
    ///
    /// The caller must hold the section. On return every borrowed nesting has
    /// exited and the caller is the driver again.
    pub fn lend<R>(&self, blocking_call: impl FnOnce() -> R) -> R {
        let me = thread::current().id();
        {
            let mut state = lock(&self.state);
            if state.holder != Some(me) {
                let holder = state.holder;
                drop(state);
                protocol_violation!("{me:?} lent a section held by {holder:?}");
            }
            state.lent += 1;
            // A parked dispatch thread may now borrow.
            self.condvar.notify_all();
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(blocking_call));

        {
            let mut state = lock(&self.state);
            state.lent -= 1;
            if state.lent == 0 {
                while state.borrowed > 0 {
                    state = wait(&self.condvar, state);
                }
            }
        }

        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn depth(&self) -> usize {
        lock(&self.state).depth
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        lock(&self.state).holder == Some(thread::current().id())
    }

    /// Mark the coordinator disposed. Later enters panic; threads parked in
    /// `enter` are woken and panic as well. Exits of sections still open are
    /// allowed to complete.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if !state.disposed {
            state.disposed = true;
            tracing::debug!(depth = state.depth, "exclusivity coordinator disposed");
        }
        self.condvar.notify_all();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }
}

/// Scoped ownership of the exclusive section.
///
/// Dropping the guard exits the section. The guard is `!Send`: the exit must
/// happen on the thread that entered.
#[must_use = "the section is exited as soon as the guard is dropped"]
pub struct Section<'a> {
    coordinator: &'a ExclusivityCoordinator,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Section<'a> {
    fn new(coordinator: &'a ExclusivityCoordinator) -> Self {
        Self {
            coordinator,
            _not_send: PhantomData,
        }
    }

    /// Exit explicitly.
    pub fn exit(self) {}
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}
