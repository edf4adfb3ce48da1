//! Core shared types for ideals.
//!
//! This crate is intentionally small: resource identities ([`LspPath`]) and the text
//! primitives (positions, ranges, line index) every other crate speaks.

mod path;
mod text;

pub use path::{LspPath, PathError};
pub use text::{LineIndex, TextRange, TextSize};

use serde::{Deserialize, Serialize};

/// A position in a text document expressed as (line, UTF-16 code unit offset).
///
/// This matches the Language Server Protocol definition. Ordering is line-major.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[inline]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open range `[start, end)` in a text document expressed with LSP positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[inline]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn point(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns `true` if `pos` lies in `[start, end]`.
    #[inline]
    fn touches(&self, pos: Position) -> bool {
        self.start <= pos && pos <= self.end
    }

    /// Overlap test used for quick-fix lookup.
    ///
    /// Non-empty ranges that only touch at a single point do not overlap. An empty range (a
    /// cursor) overlaps a non-empty range when it lies inside it or on either endpoint, so a
    /// cursor placed right after a word still hits that word. Two empty ranges overlap only
    /// when they are the same point.
    pub fn overlaps(&self, other: &Range) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => self.start == other.start,
            (true, false) => other.touches(self.start),
            (false, true) => self.touches(other.start),
            (false, false) => self.start < other.end && other.start < self.end,
        }
    }
}

/// A textual edit described by a range replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    #[inline]
    pub fn new(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }
}

#[cfg(feature = "lsp")]
mod lsp_compat {
    use super::{Position, Range, TextEdit};

    impl From<Position> for lsp_types::Position {
        fn from(value: Position) -> Self {
            lsp_types::Position {
                line: value.line,
                character: value.character,
            }
        }
    }

    impl From<lsp_types::Position> for Position {
        fn from(value: lsp_types::Position) -> Self {
            Position {
                line: value.line,
                character: value.character,
            }
        }
    }

    impl From<Range> for lsp_types::Range {
        fn from(value: Range) -> Self {
            lsp_types::Range {
                start: value.start.into(),
                end: value.end.into(),
            }
        }
    }

    impl From<lsp_types::Range> for Range {
        fn from(value: lsp_types::Range) -> Self {
            Range {
                start: value.start.into(),
                end: value.end.into(),
            }
        }
    }

    impl From<TextEdit> for lsp_types::TextEdit {
        fn from(value: TextEdit) -> Self {
            lsp_types::TextEdit {
                range: value.range.into(),
                new_text: value.new_text,
            }
        }
    }
}
