use std::sync::Arc;

use ideals_core::{LineIndex, Position, Range, TextRange, TextSize};
use thiserror::Error;

/// An LSP-style content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// The range of text to replace. If `None`, the entire document is replaced.
    pub range: Option<Range>,
    /// Replacement text.
    pub text: String,
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

#[cfg(feature = "lsp")]
impl From<lsp_types::TextDocumentContentChangeEvent> for ContentChange {
    fn from(value: lsp_types::TextDocumentContentChangeEvent) -> Self {
        Self {
            range: value.range.map(Into::into),
            text: value.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("document not open")]
    DocumentNotOpen,
    #[error("invalid range")]
    InvalidRange,
}

/// Immutable view of a document's text at one version.
///
/// Cheap to clone; analysis works on a snapshot so edits arriving meanwhile never change
/// the text under it.
#[derive(Debug, Clone)]
pub struct TextSnapshot {
    text: Arc<str>,
    version: Option<i32>,
    line_index: Arc<LineIndex>,
}

impl TextSnapshot {
    pub fn new(text: impl Into<Arc<str>>, version: Option<i32>) -> Self {
        let text = text.into();
        let line_index = Arc::new(LineIndex::new(&text));
        Self {
            text,
            version,
            line_index,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Editor version for open documents, `None` for text read from disk.
    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub fn len(&self) -> TextSize {
        self.line_index.text_len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn position(&self, offset: TextSize) -> Position {
        self.line_index.position(&self.text, offset)
    }

    pub fn offset(&self, position: Position) -> Option<TextSize> {
        self.line_index.offset(&self.text, position)
    }

    pub fn range(&self, range: TextRange) -> Range {
        self.line_index.range(&self.text, range)
    }

    pub fn text_range(&self, range: Range) -> Option<TextRange> {
        self.line_index.text_range(&self.text, range)
    }
}

/// An in-memory document with versioning and incremental edits.
#[derive(Debug, Clone)]
pub struct Document {
    snapshot: TextSnapshot,
}

impl Document {
    pub fn new(text: impl Into<String>, version: i32) -> Self {
        let text: String = text.into();
        Self {
            snapshot: TextSnapshot::new(text, Some(version)),
        }
    }

    pub fn text(&self) -> &str {
        self.snapshot.text()
    }

    pub fn version(&self) -> i32 {
        self.snapshot.version().unwrap_or_default()
    }

    pub fn snapshot(&self) -> TextSnapshot {
        self.snapshot.clone()
    }

    /// Applies a sequence of LSP changes in order. Each change is interpreted against the
    /// text produced by the previous one.
    pub fn apply_changes(
        &mut self,
        new_version: i32,
        changes: &[ContentChange],
    ) -> Result<(), DocumentError> {
        let mut text = self.snapshot.text().to_owned();

        for change in changes {
            match change.range {
                None => text.clone_from(&change.text),
                Some(range) => {
                    let index = LineIndex::new(&text);
                    let start = u32::from(index.offset_clamped(&text, range.start)) as usize;
                    let end = u32::from(index.offset_clamped(&text, range.end)) as usize;
                    if start > end {
                        return Err(DocumentError::InvalidRange);
                    }
                    text.replace_range(start..end, &change.text);
                }
            }
        }

        self.snapshot = TextSnapshot::new(text, Some(new_version));
        Ok(())
    }
}
