//! Debounced, per-resource diagnostics.
//!
//! [`DiagnosticsService`] keeps at most one session per resource. Launching a session for a
//! resource installs it and halts whichever session it replaced, so a newer edit always
//! wins. Sessions carry a generation number; a session whose generation is no longer the
//! registered one is *outdated* and may neither publish nor restart.

mod service;
mod session;
mod task;

pub use service::DiagnosticsService;
pub use session::SessionState;
