use ideals_core::Range;
use ideals_engine::FormatOptions;

use crate::{Command, CommandError, ExecutionContext};

/// Format a whole document, or one range of it.
pub struct FormattingCommand {
    range: Option<Range>,
    options: FormatOptions,
}

impl FormattingCommand {
    pub fn new(range: Option<Range>, options: FormatOptions) -> Self {
        Self { range, options }
    }
}

impl Command for FormattingCommand {
    type Output = Vec<lsp_types::TextEdit>;

    fn description(&self) -> String {
        match self.range {
            Some(range) => format!(
                "format range {}:{}-{}:{}",
                range.start.line, range.start.character, range.end.line, range.end.character
            ),
            None => "format document".to_string(),
        }
    }

    fn is_cancellable(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Self::Output, CommandError> {
        let Some(text) = ctx.state().text() else {
            return Ok(Vec::new());
        };
        let range = match self.range {
            Some(range) => Some(
                text.text_range(range)
                    .ok_or_else(|| CommandError::InvalidParams("range is outside the document".into()))?,
            ),
            None => None,
        };

        let edits = ctx.engine().format(ctx.state(), range, &self.options)?;
        Ok(edits.into_iter().map(Into::into).collect())
    }
}
