use ideals_core::{Position, TextSize};
use ideals_engine::{EngineError, Occurrence};
use lsp_types::{DocumentHighlight, DocumentHighlightKind, Location};

use crate::{Command, CommandError, ExecutionContext};

/// Byte offset of `position` in the context's resource; `None` when it has no text.
fn offset_at(
    ctx: &ExecutionContext,
    position: Position,
) -> Result<Option<TextSize>, CommandError> {
    let Some(text) = ctx.state().text() else {
        return Ok(None);
    };
    text.offset(position).map(Some).ok_or_else(|| {
        CommandError::InvalidParams(format!(
            "position {}:{} is outside the document",
            position.line, position.character
        ))
    })
}

fn sorted(mut occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
    occurrences.sort_by(|a, b| {
        (&a.path, a.range.start, a.range.end).cmp(&(&b.path, b.range.start, b.range.end))
    });
    occurrences.dedup();
    occurrences
}

/// Occurrences of the symbol at `position`, ordered by path and range with duplicates
/// removed. `None` when the resource has no text or there is no symbol at `position`.
pub(crate) fn occurrences_at(
    ctx: &ExecutionContext,
    position: Position,
) -> Result<Option<Vec<Occurrence>>, CommandError> {
    let Some(offset) = offset_at(ctx, position)? else {
        return Ok(None);
    };
    Ok(ctx.engine().occurrences(ctx.state(), offset)?.map(sorted))
}

/// `textDocument/references`: every place the symbol at a position is used.
pub struct ReferencesCommand {
    position: Position,
}

impl ReferencesCommand {
    pub fn new(position: Position) -> Self {
        Self { position }
    }
}

impl Command for ReferencesCommand {
    type Output = Vec<Location>;

    fn description(&self) -> String {
        format!(
            "find references at {}:{}",
            self.position.line, self.position.character
        )
    }

    fn is_cancellable(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Self::Output, CommandError> {
        let Some(occurrences) = occurrences_at(ctx, self.position)? else {
            return Ok(Vec::new());
        };

        let mut locations = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            ctx.check_cancelled()?;
            match occurrence.path.to_lsp_uri() {
                Some(uri) => locations.push(Location {
                    uri,
                    range: occurrence.range.into(),
                }),
                None => tracing::debug!(
                    target = "ideals.lsp",
                    path = %occurrence.path,
                    "skipping reference without a URI"
                ),
            }
        }
        Ok(locations)
    }
}

/// `textDocument/documentHighlight`: occurrences of the symbol at a position within the
/// same document.
pub struct DocumentHighlightCommand {
    position: Position,
}

impl DocumentHighlightCommand {
    pub fn new(position: Position) -> Self {
        Self { position }
    }
}

impl Command for DocumentHighlightCommand {
    type Output = Vec<DocumentHighlight>;

    fn description(&self) -> String {
        format!(
            "document highlight at {}:{}",
            self.position.line, self.position.character
        )
    }

    fn is_cancellable(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<Self::Output, CommandError> {
        let Some(offset) = offset_at(ctx, self.position)? else {
            return Ok(Vec::new());
        };
        let occurrences = match ctx.engine().occurrences(ctx.state(), offset) {
            Ok(Some(occurrences)) => sorted(occurrences),
            // An engine that is still indexing highlights nothing.
            Ok(None) | Err(EngineError::NotReady) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        Ok(occurrences
            .into_iter()
            .filter(|occurrence| &occurrence.path == ctx.path())
            .map(|occurrence| DocumentHighlight {
                range: occurrence.range.into(),
                kind: Some(DocumentHighlightKind::TEXT),
            })
            .collect())
    }
}
