use std::sync::{Arc, OnceLock};

use ideals_core::LspPath;
use ideals_engine::AnalysisEngine;
use ideals_scheduler::{CancellationToken, DelayedTask};
use parking_lot::Mutex;

use crate::QuickFixRegistry;

/// Lifecycle of one analysis pass.
///
/// `Scheduled -> Running -> {Completed | Failed | CancelledAndRestarted | CancelledStale}`,
/// and `Halted` from `Scheduled` or `Running`. Every state but the first two is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Scheduled,
    Running,
    Completed,
    /// The engine or the pass itself failed; nothing was published.
    Failed,
    CancelledAndRestarted,
    CancelledStale,
    Halted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Scheduled | SessionState::Running)
    }
}

pub(crate) struct DiagnosticsSession {
    path: LspPath,
    generation: u64,
    attempt: u32,
    registry: Arc<QuickFixRegistry>,
    token: CancellationToken,
    state: Mutex<SessionState>,
    task: OnceLock<DelayedTask>,
}

impl DiagnosticsSession {
    pub(crate) fn new(path: LspPath, generation: u64, attempt: u32) -> Self {
        Self {
            path,
            generation,
            attempt,
            registry: Arc::new(QuickFixRegistry::new()),
            token: CancellationToken::new(),
            state: Mutex::new(SessionState::Scheduled),
            task: OnceLock::new(),
        }
    }

    pub(crate) fn path(&self) -> &LspPath {
        &self.path
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// How many restarts led to this session; `0` for sessions launched by an edit.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn registry(&self) -> Arc<QuickFixRegistry> {
        Arc::clone(&self.registry)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn attach(&self, task: DelayedTask) {
        if self.task.set(task).is_err() {
            tracing::error!(
                target = "ideals.lsp",
                path = %self.path,
                generation = self.generation,
                "diagnostics session already has a task"
            );
        }
    }

    /// `Scheduled -> Running`. Fails if the session was halted before it started.
    pub(crate) fn start(&self) -> bool {
        self.transition(SessionState::Scheduled, SessionState::Running)
    }

    /// `Running -> terminal`.
    pub(crate) fn finish(&self, to: SessionState) -> bool {
        debug_assert!(to.is_terminal() && to != SessionState::Halted);
        self.transition(SessionState::Running, to)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Stop this session. Idempotent.
    ///
    /// A running pass is additionally asked to abort inside the engine; in every case the
    /// session's token fires and a pending timer is dropped.
    pub(crate) fn halt(&self, engine: &dyn AnalysisEngine) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if !previous.is_terminal() {
                *state = SessionState::Halted;
            }
            previous
        };

        if previous == SessionState::Running {
            engine.restart(&self.path);
        }
        self.token.cancel();
        if let Some(task) = self.task.get() {
            task.cancel();
        }

        tracing::debug!(
            target = "ideals.lsp",
            path = %self.path,
            generation = self.generation,
            state = ?previous,
            "halted diagnostics session"
        );
    }
}
