use crate::common::lock;
use crate::error::{CallbackFailure, FailureOrigin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type FailureHook = Arc<dyn Fn(&CallbackFailure) + Send + Sync>;

/// Collects failures caught at the pump boundary.
///
/// Every failure is logged; an optional hook lets the owner react to it.
#[derive(Default)]
pub struct ErrorReporter {
    hook: Mutex<Option<FailureHook>>,
    reported: AtomicUsize,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hook(&self, hook: Option<FailureHook>) {
        *lock(&self.hook) = hook;
    }

    pub fn report(&self, origin: FailureOrigin, message: String) {
        let failure = CallbackFailure { origin, message };
        self.reported.fetch_add(1, Ordering::SeqCst);
        tracing::error!(origin = ?failure.origin, message = %failure.message, "callback failed");
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(&failure);
        }
    }

    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::SeqCst)
    }
}
