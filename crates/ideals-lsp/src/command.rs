use std::fmt;
use std::sync::Arc;

use ideals_core::LspPath;
use ideals_engine::{AnalysisEngine, EngineError, ResourceState, Workspace};
use ideals_scheduler::{BlockingTask, CancellationToken, Cancelled, Scheduler, TaskError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
    #[error("command panicked")]
    Panicked,
}

impl From<Cancelled> for CommandError {
    fn from(_: Cancelled) -> Self {
        CommandError::Cancelled
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => CommandError::Cancelled,
            other => CommandError::Failed(other.to_string()),
        }
    }
}

impl From<TaskError> for CommandError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Cancelled => CommandError::Cancelled,
            TaskError::Panicked => CommandError::Panicked,
        }
    }
}

/// Everything a command body may look at. Built per invocation, never mutated.
pub struct ExecutionContext {
    path: LspPath,
    state: ResourceState,
    engine: Arc<dyn AnalysisEngine>,
    cancel: Option<CancellationToken>,
}

impl ExecutionContext {
    pub fn new(
        path: LspPath,
        state: ResourceState,
        engine: Arc<dyn AnalysisEngine>,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            path,
            state,
            engine,
            cancel,
        }
    }

    pub fn path(&self) -> &LspPath {
        &self.path
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn engine(&self) -> &dyn AnalysisEngine {
        self.engine.as_ref()
    }

    /// `None` for commands that are not cancellable.
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Checkpoint for command bodies; always passes for non-cancellable commands.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        match &self.cancel {
            Some(token) => Cancelled::check(token),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("path", &self.path)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

/// A unit of protocol-facing work over one resource.
pub trait Command: Send + 'static {
    type Output: Send + 'static;

    /// Human-readable summary for logs.
    fn description(&self) -> String;

    fn is_cancellable(&self) -> bool;

    fn execute(&self, ctx: &ExecutionContext) -> Result<Self::Output, CommandError>;
}

/// Pending result of [`CommandRunner::run`].
pub struct CommandTask<T> {
    task: BlockingTask<Result<Option<T>, CommandError>>,
}

impl<T> CommandTask<T> {
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// `Ok(None)` when the resource could not be resolved.
    pub async fn join(self) -> Result<Option<T>, CommandError> {
        match self.task.join().await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Runs [`Command`]s on the compute pool under the engine's [`ideals_engine::ModelLock`].
#[derive(Clone)]
pub struct CommandRunner {
    workspace: Arc<dyn Workspace>,
    engine: Arc<dyn AnalysisEngine>,
    scheduler: Scheduler,
}

impl CommandRunner {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        engine: Arc<dyn AnalysisEngine>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            workspace,
            engine,
            scheduler,
        }
    }

    /// Resolve `path` and run `command` against it.
    ///
    /// `request_token` is the token registered for the protocol request; it only reaches
    /// the command (and can only cancel the returned task) if the command is cancellable.
    pub fn run<C: Command>(
        &self,
        command: C,
        path: &LspPath,
        request_token: CancellationToken,
    ) -> CommandTask<C::Output> {
        let Some(state) = self.workspace.resolve(path) else {
            tracing::info!(
                target = "ideals.lsp",
                path = %path,
                command = %command.description(),
                "resource not found; skipping command"
            );
            return CommandTask {
                task: BlockingTask::ready(Ok(Ok(None))),
            };
        };

        tracing::info!(
            target = "ideals.lsp",
            path = %path,
            "{}",
            command.description()
        );

        let (token, cancel) = if command.is_cancellable() {
            (request_token.clone(), Some(request_token))
        } else {
            (CancellationToken::new(), None)
        };
        let ctx = ExecutionContext::new(path.clone(), state, self.engine.clone(), cancel);
        let engine = self.engine.clone();

        let task = self.scheduler.spawn_compute_with_token(token, move |_token| {
            match engine.model_lock().run(|| command.execute(&ctx)) {
                Err(CommandError::Cancelled) => Err(Cancelled),
                other => Ok(other.map(Some)),
            }
        });
        CommandTask { task }
    }
}
