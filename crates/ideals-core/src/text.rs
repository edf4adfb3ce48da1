//! Line index: byte offsets to LSP positions and back.

pub use text_size::{TextRange, TextSize};

use crate::{Position, Range};

/// Pre-computed line start offsets for a particular text snapshot.
///
/// Lines are terminated by `\n`, `\r\n` or a lone `\r`. Columns are reported in UTF-16
/// code units, matching the Language Server Protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineIndex {
    line_starts: Vec<TextSize>,
    line_ends: Vec<TextSize>,
    text_len: TextSize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut line_starts = Vec::with_capacity(64);
        let mut line_ends = Vec::with_capacity(64);
        line_starts.push(TextSize::from(0));

        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    line_ends.push(TextSize::from(i as u32));
                    line_starts.push(TextSize::from((i + 1) as u32));
                    i += 1;
                }
                b'\r' => {
                    line_ends.push(TextSize::from(i as u32));
                    if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                        line_starts.push(TextSize::from((i + 2) as u32));
                        i += 2;
                    } else {
                        line_starts.push(TextSize::from((i + 1) as u32));
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }

        line_ends.push(TextSize::from(text.len() as u32));

        Self {
            line_starts,
            line_ends,
            text_len: TextSize::from(text.len() as u32),
        }
    }

    #[inline]
    pub fn text_len(&self) -> TextSize {
        self.text_len
    }

    #[inline]
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }

    #[inline]
    pub fn line_start(&self, line: u32) -> Option<TextSize> {
        self.line_starts.get(line as usize).copied()
    }

    /// Offset of the end of `line`, excluding the line terminator.
    #[inline]
    pub fn line_end(&self, line: u32) -> Option<TextSize> {
        self.line_ends.get(line as usize).copied()
    }

    fn line_of(&self, offset: TextSize) -> usize {
        // Offsets past the end are clamped; callers pass `text_len` to mean EOF.
        let offset = offset.min(self.text_len);
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(insert) => insert.saturating_sub(1),
        }
    }

    /// Convert a byte offset to an LSP-compatible UTF-16 position.
    ///
    /// `text` must be the same snapshot used to construct this [`LineIndex`].
    pub fn position(&self, text: &str, offset: TextSize) -> Position {
        debug_assert_eq!(TextSize::from(text.len() as u32), self.text_len);
        let offset = offset.min(self.text_len);
        let line = self.line_of(offset);
        let line_start = self.line_starts[line];
        let offset = offset.min(self.line_ends[line]);
        let start = u32::from(line_start) as usize;
        let end = u32::from(offset) as usize;
        let character = text
            .get(start..end)
            .map(|s| s.chars().map(|c| c.len_utf16() as u32).sum())
            .unwrap_or(0);

        Position {
            line: line as u32,
            character,
        }
    }

    /// Convert an LSP-compatible UTF-16 position into a byte offset.
    ///
    /// Returns `None` if the line is out of bounds, the character is past the end of the
    /// line, or the character points inside a surrogate pair.
    pub fn offset(&self, text: &str, position: Position) -> Option<TextSize> {
        debug_assert_eq!(TextSize::from(text.len() as u32), self.text_len);
        let line_start = self.line_start(position.line)?;
        let line_end = self.line_end(position.line)?;
        if position.character == 0 {
            return Some(line_start);
        }

        let line_text = text.get(u32::from(line_start) as usize..u32::from(line_end) as usize)?;
        let mut utf16 = 0u32;
        for (byte_idx, ch) in line_text.char_indices() {
            if utf16 == position.character {
                return Some(line_start + TextSize::from(byte_idx as u32));
            }
            utf16 += ch.len_utf16() as u32;
            if utf16 > position.character {
                return None;
            }
        }

        (utf16 == position.character).then_some(line_end)
    }

    /// Like [`LineIndex::offset`] but clamps out-of-range positions to the nearest valid
    /// offset instead of failing. Editors occasionally send positions one past the end.
    pub fn offset_clamped(&self, text: &str, position: Position) -> TextSize {
        if position.line >= self.line_count() {
            return self.text_len;
        }
        if let Some(offset) = self.offset(text, position) {
            return offset;
        }
        let line_start = self.line_starts[position.line as usize];
        let line_end = self.line_ends[position.line as usize];
        let line_text = &text[u32::from(line_start) as usize..u32::from(line_end) as usize];
        let mut utf16 = 0u32;
        for (byte_idx, ch) in line_text.char_indices() {
            utf16 += ch.len_utf16() as u32;
            if utf16 > position.character {
                return line_start + TextSize::from(byte_idx as u32);
            }
        }
        line_end
    }

    /// Convert a byte range to an LSP-compatible range.
    pub fn range(&self, text: &str, range: TextRange) -> Range {
        Range {
            start: self.position(text, range.start()),
            end: self.position(text, range.end()),
        }
    }

    /// Convert an LSP-compatible range into a byte range.
    pub fn text_range(&self, text: &str, range: Range) -> Option<TextRange> {
        let start = self.offset(text, range.start)?;
        let end = self.offset(text, range.end)?;
        (start <= end).then(|| TextRange::new(start, end))
    }
}
