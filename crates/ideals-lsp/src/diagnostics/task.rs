use std::sync::{Arc, Weak};

use ideals_engine::{AnalysisProgress, EngineError, Finding, ResourceState, TextSnapshot};
use ideals_scheduler::{panic_payload_to_str, CancellationToken, Cancelled};
use lsp_types::{Diagnostic, NumberOrString};

use super::service::ServiceInner;
use super::session::{DiagnosticsSession, SessionState};
use crate::progress::ProgressGuard;
use crate::to_lsp::to_lsp_diagnostic;

/// One analysis pass for one session.
pub(super) struct DiagnosticsTask {
    service: Weak<ServiceInner>,
    session: Arc<DiagnosticsSession>,
    state: ResourceState,
    text: TextSnapshot,
}

enum Outcome {
    Findings(Vec<Finding>),
    Cancelled,
    NotReady,
    Failed(String),
}

impl DiagnosticsTask {
    pub(super) fn new(
        service: Weak<ServiceInner>,
        session: Arc<DiagnosticsSession>,
        state: ResourceState,
        text: TextSnapshot,
    ) -> Self {
        Self {
            service,
            session,
            state,
            text,
        }
    }

    pub(super) fn run(self, token: CancellationToken) -> Result<(), Cancelled> {
        let Some(service) = self.service.upgrade() else {
            return Ok(());
        };
        if !self.session.start() {
            return Ok(());
        }

        let path = self.session.path();
        let progress_token =
            NumberOrString::String(format!("ideals/diagnostics/{}", self.session.generation()));
        let _progress = ProgressGuard::begin(
            service.client.clone(),
            progress_token,
            "Analyzing",
            Some(path.file_name().to_string()),
        );

        match self.analyze(&service, &token) {
            Outcome::Findings(findings) => {
                let diagnostics = self.collect(&findings);
                self.publish(&service, &token, diagnostics);
                self.session.finish(SessionState::Completed);
            }
            Outcome::NotReady => {
                tracing::warn!(
                    target = "ideals.lsp",
                    path = %path,
                    "engine not ready; publishing no diagnostics"
                );
                self.publish(&service, &token, Vec::new());
                self.session.finish(SessionState::Completed);
            }
            Outcome::Cancelled => self.on_cancelled(&service),
            Outcome::Failed(message) => {
                tracing::error!(
                    target = "ideals.lsp",
                    path = %path,
                    error = %message,
                    "diagnostics analysis failed"
                );
                self.session.finish(SessionState::Failed);
            }
        }
        Ok(())
    }

    fn analyze(&self, service: &ServiceInner, token: &CancellationToken) -> Outcome {
        let engine = service.engine.as_ref();
        let progress = AnalysisProgress::new(token.clone());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine
                .model_lock()
                .run(|| engine.analyze(&self.state, &self.text, &progress))
        }));

        match result {
            Ok(Ok(findings)) => Outcome::Findings(findings),
            Ok(Err(EngineError::Cancelled)) => Outcome::Cancelled,
            Ok(Err(EngineError::NotReady)) => Outcome::NotReady,
            Ok(Err(EngineError::Failed(message))) => Outcome::Failed(message),
            Err(panic) => Outcome::Failed(format!(
                "engine panicked: {}",
                panic_payload_to_str(&*panic)
            )),
        }
    }

    /// Convert findings and fill this session's quick-fix registry.
    fn collect(&self, findings: &[Finding]) -> Vec<Diagnostic> {
        let registry = self.session.registry();
        let mut diagnostics = Vec::with_capacity(findings.len());
        for finding in findings {
            let Some(diagnostic) = to_lsp_diagnostic(finding, &self.text) else {
                continue;
            };
            if let Some(fixes) = &finding.fixes {
                registry.register(self.text.range(finding.range), fixes.clone());
            }
            diagnostics.push(diagnostic);
        }
        diagnostics
    }

    fn publish(&self, service: &ServiceInner, token: &CancellationToken, diagnostics: Vec<Diagnostic>) {
        let path = self.session.path();
        if token.is_cancelled() || self.session.state() != SessionState::Running {
            tracing::debug!(
                target = "ideals.lsp",
                path = %path,
                generation = self.session.generation(),
                "session halted during analysis; not publishing"
            );
            return;
        }

        let Some(uri) = path.to_lsp_uri() else {
            tracing::error!(target = "ideals.lsp", path = %path, "cannot convert path to a URI");
            return;
        };
        let count = diagnostics.len();
        if let Err(err) = service
            .client
            .publish_diagnostics(uri, diagnostics, self.text.version())
        {
            tracing::warn!(
                target = "ideals.lsp",
                path = %path,
                error = %err,
                "failed to publish diagnostics"
            );
            return;
        }
        tracing::debug!(
            target = "ideals.lsp",
            path = %path,
            generation = self.session.generation(),
            diagnostics = count,
            "published diagnostics"
        );
    }

    /// The engine gave up on this pass. Relaunch unless a newer session already took over.
    fn on_cancelled(&self, service: &Arc<ServiceInner>) {
        let path = self.session.path();
        if service.is_outdated(&self.session) {
            self.session.finish(SessionState::CancelledStale);
            return;
        }

        let attempt = self.session.attempt() + 1;
        if attempt > service.max_restarts() {
            tracing::warn!(
                target = "ideals.lsp",
                path = %path,
                attempts = attempt - 1,
                "analysis keeps getting cancelled; giving up until the next edit"
            );
            self.session.finish(SessionState::Failed);
            return;
        }

        if self.session.finish(SessionState::CancelledAndRestarted) {
            tracing::debug!(
                target = "ideals.lsp",
                path = %path,
                attempt,
                "analysis cancelled; restarting"
            );
            ServiceInner::launch(service, path, attempt);
        }
    }
}
