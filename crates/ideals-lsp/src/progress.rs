use std::sync::Arc;

use lsp_types::{
    NumberOrString, WorkDoneProgress, WorkDoneProgressBegin, WorkDoneProgressEnd,
};

use crate::LanguageClient;

/// A work-done progress that reports `begin` on creation and `end` when dropped, so every
/// exit path (including unwinding) closes it.
///
/// When the editor does not acknowledge the token, nothing is reported on it at all.
pub(crate) struct ProgressGuard {
    client: Arc<dyn LanguageClient>,
    token: NumberOrString,
    active: bool,
}

impl ProgressGuard {
    pub(crate) fn begin(
        client: Arc<dyn LanguageClient>,
        token: NumberOrString,
        title: &str,
        message: Option<String>,
    ) -> Self {
        if let Err(err) = client.create_progress(token.clone()) {
            tracing::debug!(target = "ideals.lsp", error = %err, "failed to create progress");
            return Self {
                client,
                token,
                active: false,
            };
        }
        let begin = WorkDoneProgress::Begin(WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: Some(false),
            message,
            percentage: None,
        });
        if let Err(err) = client.progress(token.clone(), begin) {
            tracing::debug!(target = "ideals.lsp", error = %err, "failed to report progress");
        }
        Self {
            client,
            token,
            active: true,
        }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let end = WorkDoneProgress::End(WorkDoneProgressEnd { message: None });
        if let Err(err) = self.client.progress(self.token.clone(), end) {
            tracing::debug!(target = "ideals.lsp", error = %err, "failed to end progress");
        }
    }
}
