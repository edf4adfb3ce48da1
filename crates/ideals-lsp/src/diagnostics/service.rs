use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ideals_config::DiagnosticsConfig;
use ideals_core::{LspPath, Range};
use ideals_engine::{AnalysisEngine, Fix, Workspace};
use ideals_scheduler::{PoolKind, Scheduler};
use parking_lot::RwLock;

use super::session::{DiagnosticsSession, SessionState};
use super::task::DiagnosticsTask;
use crate::LanguageClient;

/// Per-workspace registry of diagnostics sessions.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct DiagnosticsService {
    inner: Arc<ServiceInner>,
}

pub(super) struct ServiceInner {
    pub(super) workspace: Arc<dyn Workspace>,
    pub(super) engine: Arc<dyn AnalysisEngine>,
    pub(super) client: Arc<dyn LanguageClient>,
    scheduler: Scheduler,
    config: RwLock<DiagnosticsConfig>,
    sessions: DashMap<LspPath, Arc<DiagnosticsSession>>,
    next_generation: AtomicU64,
}

impl DiagnosticsService {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        engine: Arc<dyn AnalysisEngine>,
        client: Arc<dyn LanguageClient>,
        scheduler: Scheduler,
        config: DiagnosticsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                workspace,
                engine,
                client,
                scheduler,
                config: RwLock::new(config),
                sessions: DashMap::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Schedule a fresh analysis of `path` after the debounce delay, superseding any session
    /// already registered for it.
    ///
    /// Returns the new session's generation, or `None` if the resource (or its text) could
    /// not be resolved or diagnostics are disabled.
    pub fn launch_diagnostics(&self, path: &LspPath) -> Option<u64> {
        ServiceInner::launch(&self.inner, path, 0)
    }

    /// Remove and halt the session registered for `path`, if any.
    pub fn halt_diagnostics(&self, path: &LspPath) {
        if let Some((_, session)) = self.inner.sessions.remove(path) {
            session.halt(self.inner.engine.as_ref());
        }
    }

    /// Fixes of the current session for `path` whose range overlaps `range`.
    pub fn get_quick_fixes(&self, path: &LspPath, range: &Range) -> Vec<Fix> {
        // Clone the registry out so the map shard is not locked during the query.
        let registry = self
            .inner
            .sessions
            .get(path)
            .map(|session| session.registry());
        registry
            .map(|registry| registry.query(range))
            .unwrap_or_default()
    }

    /// Relaunch diagnostics for every resource that currently has a session.
    pub fn refresh_all(&self) {
        let mut paths: Vec<LspPath> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        for path in paths {
            self.launch_diagnostics(&path);
        }
    }

    pub fn config(&self) -> DiagnosticsConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration. Disabling diagnostics halts every session.
    pub fn set_config(&self, config: DiagnosticsConfig) {
        let enabled = config.enabled;
        *self.inner.config.write() = config;
        if !enabled {
            self.shutdown();
        }
    }

    pub fn session_state(&self, path: &LspPath) -> Option<SessionState> {
        self.inner.sessions.get(path).map(|session| session.state())
    }

    /// Generation of the session registered for `path`.
    pub fn generation(&self, path: &LspPath) -> Option<u64> {
        self.inner
            .sessions
            .get(path)
            .map(|session| session.generation())
    }

    /// Halt every session.
    pub fn shutdown(&self) {
        let paths: Vec<LspPath> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in paths {
            self.halt_diagnostics(&path);
        }
    }
}

impl ServiceInner {
    pub(super) fn launch(inner: &Arc<ServiceInner>, path: &LspPath, attempt: u32) -> Option<u64> {
        let (enabled, delay) = {
            let config = inner.config.read();
            (config.enabled, config.debounce())
        };
        if !enabled {
            return None;
        }

        let Some(state) = inner.workspace.resolve(path) else {
            tracing::error!(
                target = "ideals.lsp",
                path = %path,
                "cannot launch diagnostics: resource not found"
            );
            return None;
        };
        let Some(text) = state.text().cloned() else {
            tracing::error!(
                target = "ideals.lsp",
                path = %path,
                "cannot launch diagnostics: resource has no text"
            );
            return None;
        };

        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(DiagnosticsSession::new(path.clone(), generation, attempt));

        // Register before scheduling: with a zero delay the pass may start right away and
        // must already see itself as the current session.
        if let Some(previous) = inner.sessions.insert(path.clone(), session.clone()) {
            previous.halt(inner.engine.as_ref());
        }

        let task = DiagnosticsTask::new(Arc::downgrade(inner), session.clone(), state, text);
        let handle = inner.scheduler.schedule_after(
            delay,
            PoolKind::Background,
            session.token(),
            move |token| task.run(token),
        );
        session.attach(handle);

        tracing::debug!(
            target = "ideals.lsp",
            path = %path,
            generation,
            attempt,
            "scheduled diagnostics"
        );
        Some(generation)
    }

    /// A session is outdated once another session (or none) is registered for its resource.
    pub(super) fn is_outdated(&self, session: &DiagnosticsSession) -> bool {
        self.sessions
            .get(session.path())
            .map(|current| current.generation())
            != Some(session.generation())
    }

    pub(super) fn max_restarts(&self) -> u32 {
        self.config.read().max_restarts
    }
}
