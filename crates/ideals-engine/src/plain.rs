use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use ideals_core::{LspPath, Range, TextEdit, TextRange, TextSize};
use parking_lot::Mutex;

use crate::{
    AnalysisEngine, AnalysisProgress, EngineError, Finding, Fix, FixDescriptor, FormatOptions,
    ModelLock, Occurrence, ResourceState, Severity, TextSnapshot,
};

const DEFAULT_MAX_LINE_LENGTH: usize = 120;
const TAB_WIDTH: usize = 4;

/// A line-based engine for plain text.
///
/// Reports trailing whitespace, tab indentation, over-long lines and `TODO` markers, formats
/// whitespace, and renames whole words within one document.
#[derive(Debug)]
pub struct PlainTextEngine {
    lock: ModelLock,
    max_line_length: usize,
    /// Bumped by [`AnalysisEngine::restart`]; a running pass that sees its epoch change aborts.
    epochs: Mutex<HashMap<LspPath, u64>>,
}

impl Default for PlainTextEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainTextEngine {
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            lock: ModelLock::new(),
            max_line_length,
            epochs: Mutex::new(HashMap::new()),
        }
    }

    fn epoch(&self, path: &LspPath) -> u64 {
        self.epochs.lock().get(path).copied().unwrap_or_default()
    }

    fn lines(text: &TextSnapshot) -> impl Iterator<Item = TextRange> + '_ {
        let index = text.line_index();
        (0..index.line_count()).filter_map(move |line| {
            Some(TextRange::new(index.line_start(line)?, index.line_end(line)?))
        })
    }

    fn line_findings(&self, text: &TextSnapshot, line: TextRange, out: &mut Vec<Finding>) {
        let line_text = &text.text()[line];
        let start = line.start();

        let trimmed = line_text.trim_end_matches([' ', '\t']);
        if trimmed.len() < line_text.len() {
            let range = TextRange::new(start + TextSize::of(trimmed), line.end());
            let fix = PlainFix::new(FixKind::TrimTrailingWhitespace, range, text.version());
            out.push(Finding::new(Severity::Warning, range, "Trailing whitespace").with_fix(fix));
        }

        let indent = &line_text[..line_text.len() - line_text.trim_start_matches([' ', '\t']).len()];
        if indent.contains('\t') && !trimmed.is_empty() {
            let range = TextRange::at(start, TextSize::of(indent));
            let fix = PlainFix::new(FixKind::ExpandTabs, range, text.version());
            out.push(
                Finding::new(
                    Severity::Custom("style".into()),
                    range,
                    "Indentation contains tabs",
                )
                .with_fix(fix),
            );
        }

        let width: usize = line_text.chars().map(char::len_utf16).sum();
        if width > self.max_line_length {
            out.push(Finding::new(
                Severity::WeakWarning,
                line,
                format!("Line is longer than {} characters", self.max_line_length),
            ));
        }

        if let Some(idx) = line_text.find("TODO") {
            let marker = TextRange::at(start + TextSize::from(idx as u32), TextSize::of("TODO"));
            out.push(Finding::new(
                Severity::Information,
                marker,
                line_text[idx..].trim_end(),
            ));
        }
    }

    fn normalize_line(line_text: &str, options: &FormatOptions) -> String {
        let trimmed = line_text.trim_end_matches([' ', '\t']);
        if !options.insert_spaces {
            return trimmed.to_owned();
        }
        let body = trimmed.trim_start_matches([' ', '\t']);
        let indent = &trimmed[..trimmed.len() - body.len()];
        let tab = " ".repeat(options.tab_size.max(1) as usize);
        format!("{}{body}", indent.replace('\t', &tab))
    }
}

impl AnalysisEngine for PlainTextEngine {
    fn analyze(
        &self,
        state: &ResourceState,
        text: &TextSnapshot,
        progress: &AnalysisProgress,
    ) -> Result<Vec<Finding>, EngineError> {
        let path = state.path();
        let epoch = self.epoch(path);
        let mut findings = Vec::new();

        for line in Self::lines(text) {
            progress.check()?;
            if self.epoch(path) != epoch {
                return Err(EngineError::Cancelled);
            }
            self.line_findings(text, line, &mut findings);
        }

        tracing::debug!(
            target = "ideals.engine",
            path = %path,
            findings = findings.len(),
            "plain text analysis finished"
        );
        Ok(findings)
    }

    fn restart(&self, path: &LspPath) {
        *self.epochs.lock().entry(path.clone()).or_default() += 1;
    }

    fn model_lock(&self) -> &ModelLock {
        &self.lock
    }

    fn occurrences(
        &self,
        state: &ResourceState,
        offset: TextSize,
    ) -> Result<Option<Vec<Occurrence>>, EngineError> {
        let Some(text) = state.text() else {
            return Ok(None);
        };
        let Some(word) = word_at(text.text(), offset) else {
            return Ok(None);
        };
        let word = &text.text()[word];

        let occurrences = whole_word_matches(text.text(), word)
            .map(|range| Occurrence {
                path: state.path().clone(),
                range: text.range(range),
            })
            .collect();
        Ok(Some(occurrences))
    }

    fn format(
        &self,
        state: &ResourceState,
        range: Option<TextRange>,
        options: &FormatOptions,
    ) -> Result<Vec<TextEdit>, EngineError> {
        let Some(text) = state.text() else {
            return Err(EngineError::Failed(format!("{} has no text", state.path())));
        };

        let mut edits = Vec::new();
        for line in Self::lines(text) {
            if let Some(range) = range {
                let touches = line.start() < range.end() && range.start() <= line.end();
                if !touches {
                    continue;
                }
            }
            let line_text = &text.text()[line];
            let normalized = Self::normalize_line(line_text, options);
            if normalized != line_text {
                edits.push(TextEdit::new(text.range(line), normalized));
            }
        }

        if range.is_none() && !text.is_empty() && !text.text().ends_with(['\n', '\r']) {
            edits.push(TextEdit::new(Range::point(text.position(text.len())), "\n"));
        }

        Ok(edits)
    }

    fn fix_edits(&self, state: &ResourceState, fix: &Fix) -> Result<Vec<TextEdit>, EngineError> {
        let Some(fix) = fix.as_any().downcast_ref::<PlainFix>() else {
            return Err(EngineError::Failed(format!(
                "fix `{}` was not produced by the plain text engine",
                fix.title()
            )));
        };
        let Some(text) = state.text() else {
            return Err(EngineError::Failed(format!("{} has no text", state.path())));
        };
        if text.version() != fix.version || fix.range.end() > text.len() {
            return Err(EngineError::Failed(
                "document changed since the fix was computed".into(),
            ));
        }

        let new_text = match fix.kind {
            FixKind::TrimTrailingWhitespace => String::new(),
            FixKind::ExpandTabs => {
                text.text()[fix.range].replace('\t', &" ".repeat(TAB_WIDTH))
            }
        };
        Ok(vec![TextEdit::new(text.range(fix.range), new_text)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixKind {
    TrimTrailingWhitespace,
    ExpandTabs,
}

#[derive(Debug)]
struct PlainFix {
    kind: FixKind,
    range: TextRange,
    version: Option<i32>,
}

impl PlainFix {
    fn new(kind: FixKind, range: TextRange, version: Option<i32>) -> Fix {
        Arc::new(Self {
            kind,
            range,
            version,
        })
    }
}

impl FixDescriptor for PlainFix {
    fn title(&self) -> &str {
        match self.kind {
            FixKind::TrimTrailingWhitespace => "Remove trailing whitespace",
            FixKind::ExpandTabs => "Replace tabs with spaces",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// The word touching `offset`, including a word that ends exactly at `offset`.
fn word_at(text: &str, offset: TextSize) -> Option<TextRange> {
    let offset = u32::from(offset) as usize;
    if offset > text.len() || !text.is_char_boundary(offset) {
        return None;
    }

    let start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|(_, ch)| is_word_char(*ch))
        .last()
        .map_or(offset, |(idx, _)| idx);
    let end = text[offset..]
        .char_indices()
        .find(|(_, ch)| !is_word_char(*ch))
        .map_or(text.len(), |(idx, _)| offset + idx);

    (start < end).then(|| {
        TextRange::new(
            TextSize::from(start as u32),
            TextSize::from(end as u32),
        )
    })
}

fn whole_word_matches<'a>(text: &'a str, word: &'a str) -> impl Iterator<Item = TextRange> + 'a {
    text.match_indices(word).filter_map(move |(idx, _)| {
        let end = idx + word.len();
        let before = text[..idx].chars().next_back();
        let after = text[end..].chars().next();
        let bounded = !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);
        bounded.then(|| TextRange::new(TextSize::from(idx as u32), TextSize::from(end as u32)))
    })
}
