use std::collections::HashMap;

use ideals_core::{Position, TextEdit};
use lsp_types::WorkspaceEdit;

use crate::code_action::workspace_edit;
use crate::references::occurrences_at;
use crate::{Command, CommandError, ExecutionContext};

/// Rename the symbol at a position everywhere the engine finds it.
pub struct RenameCommand {
    position: Position,
    new_name: String,
}

impl RenameCommand {
    pub fn new(position: Position, new_name: impl Into<String>) -> Self {
        Self {
            position,
            new_name: new_name.into(),
        }
    }
}

impl Command for RenameCommand {
    /// `None` when there is no symbol at the position.
    type Output = Option<WorkspaceEdit>;

    fn description(&self) -> String {
        format!(
            "rename at {}:{} to `{}`",
            self.position.line, self.position.character, self.new_name
        )
    }

    fn is_cancellable(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Self::Output, CommandError> {
        if self.new_name.trim().is_empty() {
            return Err(CommandError::InvalidParams("new name must not be empty".into()));
        }
        let Some(occurrences) = occurrences_at(ctx, self.position)? else {
            return Ok(None);
        };
        let version = ctx.state().text().and_then(|text| text.version());

        let mut grouped: HashMap<_, (Option<i32>, Vec<TextEdit>)> = HashMap::new();
        for occurrence in occurrences {
            let version = if &occurrence.path == ctx.path() {
                version
            } else {
                None
            };
            grouped
                .entry(occurrence.path)
                .or_insert_with(|| (version, Vec::new()))
                .1
                .push(TextEdit::new(occurrence.range, self.new_name.clone()));
        }

        workspace_edit(grouped).map(Some)
    }
}
