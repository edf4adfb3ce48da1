//! Scheduling primitives shared by the ideals server.
//!
//! - [`Scheduler`] owns the blocking worker pools (`rayon`) and a small tokio runtime used
//!   for timers and for the futures handed back to the protocol layer.
//! - [`CancellationToken`] is the cooperative, one-way cancellation signal threaded through
//!   every long-running call chain; [`Cancelled::check`] turns a fired token into an error
//!   that propagates with `?`.
//! - [`DelayedTask`] runs a job on a pool after a delay unless it is cancelled first. It is
//!   the building block for debounced, per-resource work.

mod delayed;
mod scheduler;
mod task;

use std::any::Any;

use thiserror::Error;

pub use delayed::DelayedTask;
pub use scheduler::{PoolKind, Scheduler, SchedulerConfig};
pub use task::BlockingTask;
pub use tokio_util::sync::CancellationToken;

/// Marker error for work that observed its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl Cancelled {
    /// Returns `Err(Cancelled)` once `token` has fired.
    #[inline]
    pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked,
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

/// Best-effort rendering of a `catch_unwind` payload for logs.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
