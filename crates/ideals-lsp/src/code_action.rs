use std::collections::HashMap;

use ideals_core::{LspPath, TextEdit};
use lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, OneOf, OptionalVersionedTextDocumentIdentifier,
    TextDocumentEdit, Uri, WorkspaceEdit,
};
use serde::{Deserialize, Serialize};

use crate::{Command, CommandError, DiagnosticsService, ExecutionContext};

/// Payload stored in `CodeAction.data` so `codeAction/resolve` can find the fix again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    pub uri: String,
    pub range: lsp_types::Range,
    pub title: String,
}

impl ActionData {
    pub fn from_action(action: &CodeAction) -> Result<Self, CommandError> {
        let data = action
            .data
            .clone()
            .ok_or_else(|| CommandError::InvalidParams("code action has no data".into()))?;
        serde_json::from_value(data).map_err(|err| CommandError::InvalidParams(err.to_string()))
    }
}

/// Unresolved quick-fix actions for `range`, taken from the current diagnostics session.
pub fn quick_fix_actions(
    service: &DiagnosticsService,
    uri: &Uri,
    path: &LspPath,
    range: lsp_types::Range,
) -> Vec<CodeActionOrCommand> {
    service
        .get_quick_fixes(path, &range.into())
        .into_iter()
        .map(|fix| {
            let data = ActionData {
                uri: uri.as_str().to_string(),
                range,
                title: fix.title().to_string(),
            };
            CodeActionOrCommand::CodeAction(CodeAction {
                title: fix.title().to_string(),
                kind: Some(CodeActionKind::QUICKFIX),
                data: serde_json::to_value(data).ok(),
                ..CodeAction::default()
            })
        })
        .collect()
}

/// Fill in the edit of a quick-fix action.
///
/// If the fix is gone (the session that found it was superseded), the action comes back
/// without an edit.
pub struct ResolveCodeActionCommand {
    action: CodeAction,
    data: ActionData,
    service: DiagnosticsService,
}

impl ResolveCodeActionCommand {
    pub fn new(action: CodeAction, data: ActionData, service: DiagnosticsService) -> Self {
        Self {
            action,
            data,
            service,
        }
    }
}

impl Command for ResolveCodeActionCommand {
    type Output = CodeAction;

    fn description(&self) -> String {
        format!("resolve code action `{}`", self.data.title)
    }

    fn is_cancellable(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<CodeAction, CommandError> {
        ctx.check_cancelled()?;
        let fix = self
            .service
            .get_quick_fixes(ctx.path(), &self.data.range.into())
            .into_iter()
            .find(|fix| fix.title() == self.data.title);
        let mut action = self.action.clone();
        let Some(fix) = fix else {
            tracing::debug!(
                target = "ideals.lsp",
                path = %ctx.path(),
                title = %self.data.title,
                "quick fix is no longer available"
            );
            return Ok(action);
        };

        let edits = ctx.engine().fix_edits(ctx.state(), &fix)?;
        ctx.check_cancelled()?;
        let version = ctx.state().text().and_then(|text| text.version());
        action.edit = document_edits(ctx.path(), version, edits)?;
        Ok(action)
    }
}

/// A `WorkspaceEdit` made of one `TextDocumentEdit` for `path`.
pub(crate) fn document_edits(
    path: &LspPath,
    version: Option<i32>,
    edits: Vec<TextEdit>,
) -> Result<Option<WorkspaceEdit>, CommandError> {
    if edits.is_empty() {
        return Ok(None);
    }
    let mut grouped = HashMap::new();
    grouped.insert(path.clone(), (version, edits));
    workspace_edit(grouped).map(Some)
}

pub(crate) fn workspace_edit(
    edits: HashMap<LspPath, (Option<i32>, Vec<TextEdit>)>,
) -> Result<WorkspaceEdit, CommandError> {
    let mut edits: Vec<_> = edits.into_iter().collect();
    edits.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut document_changes = Vec::with_capacity(edits.len());
    for (path, (version, edits)) in edits {
        let uri = path
            .to_lsp_uri()
            .ok_or_else(|| CommandError::Failed(format!("cannot convert {path} to a URI")))?;
        document_changes.push(TextDocumentEdit {
            text_document: OptionalVersionedTextDocumentIdentifier { uri, version },
            edits: edits
                .into_iter()
                .map(|edit| OneOf::Left(edit.into()))
                .collect(),
        });
    }

    Ok(WorkspaceEdit {
        document_changes: Some(lsp_types::DocumentChanges::Edits(document_changes)),
        ..WorkspaceEdit::default()
    })
}
