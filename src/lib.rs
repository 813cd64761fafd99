//! UI-thread rendezvous for an explicitly pumped toolkit running on top of a
//! host toolkit that owns its own dispatch thread.
//!
//! A [`Display`] owns three collaborators:
//!
//! - [`ExclusivityCoordinator`]: the reentrant exclusive section shared by the
//!   pump loop and host callbacks;
//! - [`SubstituteEventQueue`]: pushed over the host queue so events are pulled
//!   one at a time;
//! - [`CrossThreadSynchronizer`]: work submitted from other threads, deferred
//!   events and timers.

pub mod common;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod event;
pub mod host;
pub mod listeners;
pub mod logging;
pub mod pump;
pub mod queue;
pub mod report;
pub mod settings;
pub mod synchronizer;
pub mod timer;

pub use coordinator::{ExclusivityCoordinator, Section};
pub use display::Display;
pub use error::{CallbackFailure, FailureOrigin, SyncError};
pub use event::{Event, EventKind, MouseAction};
pub use host::HostToolkit;
pub use pump::PumpState;
pub use queue::SubstituteEventQueue;
pub use settings::Settings;
pub use synchronizer::CrossThreadSynchronizer;
pub use timer::TimerId;
