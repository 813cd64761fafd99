use std::any::Any;
use thiserror::Error;

/// Panic with a protocol violation.
///
/// Protocol violations (unmatched exits, use after disposal, draining without
/// ownership) mean the calling code is broken. They are logged and then raised
/// as a panic so they surface during development instead of being masked.
macro_rules! protocol_violation {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!(thread = ?std::thread::current().id(), "protocol violation: {message}");
        panic!("ui protocol violation: {message}")
    }};
}

pub(crate) use protocol_violation;

/// Failure of a call that crosses threads synchronously.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The action returned an error.
    #[error("action failed: {0}")]
    Failed(#[source] anyhow::Error),
    /// The action panicked on the owning thread.
    #[error("action panicked: {0}")]
    Panicked(String),
    /// The display was disposed before the action could run.
    #[error("display is disposed")]
    Disposed,
}

/// Where a caught callback failure originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOrigin {
    WorkItem,
    Timer,
    /// A display listener handling an event of this kind.
    Event(crate::event::EventKind),
    /// A host listener outside the display's own listeners.
    Dispatch,
}

/// A failure caught at the pump boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub origin: FailureOrigin,
    pub message: String,
}

/// Turn a panic payload into a readable message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
