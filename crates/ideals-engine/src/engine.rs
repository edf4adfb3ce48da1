use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ideals_core::{LspPath, Range, TextEdit, TextRange, TextSize};
use ideals_scheduler::{CancellationToken, Cancelled};
use parking_lot::ReentrantMutex;
use thiserror::Error;

use crate::{ResourceState, TextSnapshot};

/// An engine-provided fix attached to a finding.
///
/// The server treats fixes as opaque: it stores them, shows their title, and hands them
/// back to [`AnalysisEngine::fix_edits`] when the user picks one.
pub trait FixDescriptor: Send + Sync + fmt::Debug {
    fn title(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

pub type Fix = Arc<dyn FixDescriptor>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    WeakWarning,
    Information,
    /// Engine-specific severity with no direct protocol equivalent.
    Custom(String),
}

/// One problem reported by an analysis pass.
#[derive(Debug, Clone)]
pub struct Finding {
    /// Findings without a message are not shown to the user.
    pub message: Option<String>,
    pub severity: Severity,
    pub range: TextRange,
    pub fixes: Option<Vec<Fix>>,
}

impl Finding {
    pub fn new(severity: Severity, range: TextRange, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            severity,
            range,
            fixes: None,
        }
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fixes.get_or_insert_with(Vec::new).push(fix);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("analysis cancelled")]
    Cancelled,
    #[error("engine is not ready (indexing in progress)")]
    NotReady,
    #[error("{0}")]
    Failed(String),
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Cancelled
    }
}

/// Cancellation checkpoint handed to [`AnalysisEngine::analyze`].
#[derive(Debug, Clone)]
pub struct AnalysisProgress {
    token: CancellationToken,
}

impl AnalysisProgress {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        Cancelled::check(&self.token)
    }
}

/// Exclusive access to the engine's model.
///
/// Re-entrant, so a command body that calls back into the engine from inside [`ModelLock::run`]
/// does not deadlock. The guard is released on every exit path including unwinding.
#[derive(Default)]
pub struct ModelLock {
    inner: ReentrantMutex<()>,
}

impl ModelLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.lock();
        f()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl fmt::Debug for ModelLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// A place where the symbol under the cursor occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub path: LspPath,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub tab_size: u32,
    pub insert_spaces: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            tab_size: 4,
            insert_spaces: true,
        }
    }
}

/// The semantic analysis engine.
///
/// Every call must happen while holding [`AnalysisEngine::model_lock`]; callers in
/// `ideals-lsp` take care of that.
pub trait AnalysisEngine: Send + Sync {
    /// Run the full analysis pass over one resource.
    ///
    /// Long passes must call [`AnalysisProgress::check`] regularly and return
    /// [`EngineError::Cancelled`] once it fails.
    fn analyze(
        &self,
        state: &ResourceState,
        text: &TextSnapshot,
        progress: &AnalysisProgress,
    ) -> Result<Vec<Finding>, EngineError>;

    /// Ask the engine to abort any in-progress analysis of `path`. Best effort.
    fn restart(&self, path: &LspPath);

    fn model_lock(&self) -> &ModelLock;

    /// All occurrences of the symbol at `offset`, or `None` if there is no symbol there.
    fn occurrences(
        &self,
        _state: &ResourceState,
        _offset: TextSize,
    ) -> Result<Option<Vec<Occurrence>>, EngineError> {
        Ok(None)
    }

    /// Edits that format the document, or only `range` of it.
    fn format(
        &self,
        _state: &ResourceState,
        _range: Option<TextRange>,
        _options: &FormatOptions,
    ) -> Result<Vec<TextEdit>, EngineError> {
        Ok(Vec::new())
    }

    /// Edits applying `fix` to the resource it was reported for.
    fn fix_edits(&self, _state: &ResourceState, fix: &Fix) -> Result<Vec<TextEdit>, EngineError> {
        Err(EngineError::Failed(format!(
            "fix `{}` cannot be applied by this engine",
            fix.title()
        )))
    }
}
