use std::sync::Arc;

use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender};
use ideals_config::IdealsConfig;
use ideals_core::LspPath;
use ideals_engine::{AnalysisEngine, ContentChange, FormatOptions, MemoryWorkspace};
use ideals_scheduler::{panic_payload_to_str, CancellationToken, Scheduler, SchedulerConfig};
use lsp_server::{Connection, ErrorCode, Message, Notification, Request, RequestId, Response};
use lsp_types::notification::{self, Notification as _};
use lsp_types::request::{self, Request as _};
use lsp_types::{
    CodeAction, CodeActionKind, CodeActionOptions, CodeActionParams,
    CodeActionProviderCapability, DidChangeConfigurationParams, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentFormattingParams, DocumentHighlightParams, DocumentRangeFormattingParams,
    InitializeParams, InitializeResult, NumberOrString, OneOf, ReferenceParams, RenameParams,
    ServerCapabilities, ServerInfo,
    TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, Uri,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cancellation::cancel_id_from_request_id;
use crate::{
    quick_fix_actions, ActionData, Command, CommandError, CommandRunner, DiagnosticsService,
    DocumentHighlightCommand, FormattingCommand, LspClient, ReferencesCommand, RenameCommand,
    RequestCancellation, ResolveCodeActionCommand,
};

pub fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(TextDocumentSyncKind::INCREMENTAL),
            save: Some(TextDocumentSyncSaveOptions::Supported(true)),
            ..TextDocumentSyncOptions::default()
        })),
        code_action_provider: Some(CodeActionProviderCapability::Options(CodeActionOptions {
            code_action_kinds: Some(vec![CodeActionKind::QUICKFIX]),
            resolve_provider: Some(true),
            ..CodeActionOptions::default()
        })),
        document_formatting_provider: Some(OneOf::Left(true)),
        document_range_formatting_provider: Some(OneOf::Left(true)),
        rename_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        document_highlight_provider: Some(OneOf::Left(true)),
        ..ServerCapabilities::default()
    }
}

/// Run the initialize handshake on `connection`, then serve until `exit` or until the
/// client disconnects.
pub fn serve(
    connection: &Connection,
    mut config: IdealsConfig,
    engine: Arc<dyn AnalysisEngine>,
) -> anyhow::Result<()> {
    let (id, params) = connection
        .initialize_start()
        .context("waiting for initialize")?;
    let params: InitializeParams =
        serde_json::from_value(params).context("decoding initialize params")?;

    if let Some(overrides) = params
        .initialization_options
        .as_ref()
        .and_then(|options| options.get("diagnostics"))
    {
        if let Err(err) = config.diagnostics.apply_overrides(overrides) {
            tracing::warn!(target = "ideals.lsp", error = %err, "ignoring initializationOptions");
        }
    }
    let work_done_progress = params
        .capabilities
        .window
        .as_ref()
        .and_then(|window| window.work_done_progress)
        .unwrap_or(false);

    let result = InitializeResult {
        capabilities: server_capabilities(),
        server_info: Some(ServerInfo {
            name: "ideals-lsp".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
    };
    connection
        .initialize_finish(id, serde_json::to_value(result)?)
        .context("finishing initialize")?;
    tracing::info!(target = "ideals.lsp", work_done_progress, "initialized");

    let server = Server::new(connection.sender.clone(), config, engine, work_done_progress);
    server.run(connection.receiver.clone())
}

enum IncomingMessage {
    Request {
        request: Request,
        cancel_id: NumberOrString,
        cancel_token: CancellationToken,
    },
    Notification(Notification),
}

fn message_router(
    receiver: Receiver<Message>,
    sender: Sender<IncomingMessage>,
    request_cancellation: RequestCancellation,
    client: Arc<LspClient>,
) {
    for message in receiver {
        match message {
            Message::Notification(notification)
                if notification.method == notification::Cancel::METHOD =>
            {
                match serde_json::from_value::<lsp_types::CancelParams>(notification.params) {
                    Ok(params) => {
                        let cancelled = request_cancellation.cancel(params.id.clone());
                        tracing::debug!(
                            target = "ideals.lsp",
                            cancel_id = ?params.id,
                            cancelled,
                            "$/cancelRequest"
                        );
                    }
                    Err(err) => {
                        tracing::debug!(
                            target = "ideals.lsp",
                            error = %err,
                            "received malformed $/cancelRequest params; ignoring"
                        );
                    }
                }
            }
            Message::Request(request) => {
                let cancel_id = cancel_id_from_request_id(&request.id);
                let cancel_token = request_cancellation.register(cancel_id.clone());
                if sender
                    .send(IncomingMessage::Request {
                        request,
                        cancel_id,
                        cancel_token,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Message::Notification(notification) => {
                let is_exit = notification.method == notification::Exit::METHOD;
                if sender
                    .send(IncomingMessage::Notification(notification))
                    .is_err()
                    || is_exit
                {
                    break;
                }
            }
            // Replies to server-initiated requests such as `window/workDoneProgress/create`.
            // They are routed here so a waiting pass wakes up even while the main loop is busy.
            Message::Response(response) => {
                let id = response.id.clone();
                if !client.complete(response) {
                    tracing::debug!(
                        target = "ideals.lsp",
                        id = ?id,
                        "response to unknown or expired request"
                    );
                }
            }
        }
    }
}

struct Server {
    client: Arc<LspClient>,
    workspace: Arc<MemoryWorkspace>,
    engine: Arc<dyn AnalysisEngine>,
    scheduler: Scheduler,
    diagnostics: DiagnosticsService,
    runner: CommandRunner,
    cancellation: RequestCancellation,
    shutdown_requested: bool,
}

impl Server {
    fn new(
        sender: Sender<Message>,
        config: IdealsConfig,
        engine: Arc<dyn AnalysisEngine>,
        work_done_progress: bool,
    ) -> Self {
        let mut scheduler_config = SchedulerConfig::default();
        if let Some(threads) = config.scheduler.compute_threads {
            scheduler_config.compute_threads = threads;
        }
        if let Some(threads) = config.scheduler.background_threads {
            scheduler_config.background_threads = threads;
        }
        let scheduler = Scheduler::new(scheduler_config);

        let client = Arc::new(LspClient::new(sender, work_done_progress));
        let workspace = Arc::new(MemoryWorkspace::new());
        let diagnostics = DiagnosticsService::new(
            workspace.clone(),
            engine.clone(),
            client.clone(),
            scheduler.clone(),
            config.diagnostics,
        );
        let runner = CommandRunner::new(workspace.clone(), engine.clone(), scheduler.clone());

        Self {
            client,
            workspace,
            engine,
            scheduler,
            diagnostics,
            runner,
            cancellation: RequestCancellation::new(),
            shutdown_requested: false,
        }
    }

    fn run(mut self, receiver: Receiver<Message>) -> anyhow::Result<()> {
        let (sender, incoming) = crossbeam_channel::unbounded();
        let cancellation = self.cancellation.clone();
        let client = self.client.clone();
        std::thread::Builder::new()
            .name("ideals-router".to_string())
            .spawn(move || message_router(receiver, sender, cancellation, client))
            .context("spawning message router")?;

        for message in incoming {
            match message {
                IncomingMessage::Request {
                    request,
                    cancel_id,
                    cancel_token,
                } => {
                    let id = request.id.clone();
                    let method = request.method.clone();
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        self.handle_request(request, cancel_id.clone(), cancel_token)
                    }));
                    if let Err(panic) = result {
                        tracing::error!(
                            target = "ideals.lsp",
                            method,
                            panic = %panic_payload_to_str(&*panic),
                            "panic while handling request"
                        );
                        self.cancellation.finish(&cancel_id);
                        self.send(Response::new_err(
                            id,
                            ErrorCode::InternalError as i32,
                            "Internal error (panic)".to_string(),
                        ));
                    }
                }
                IncomingMessage::Notification(notification) => {
                    if notification.method == notification::Exit::METHOD {
                        if !self.shutdown_requested {
                            tracing::warn!(target = "ideals.lsp", "exit without shutdown");
                        }
                        break;
                    }
                    let method = notification.method.clone();
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        self.handle_notification(notification)
                    }));
                    if let Err(panic) = result {
                        tracing::error!(
                            target = "ideals.lsp",
                            method,
                            panic = %panic_payload_to_str(&*panic),
                            "panic while handling notification"
                        );
                    }
                }
            }
        }

        self.diagnostics.shutdown();
        Ok(())
    }

    fn send(&self, response: Response) {
        if let Err(err) = self.client.respond(response) {
            tracing::debug!(target = "ideals.lsp", error = %err, "failed to send response");
        }
    }

    fn handle_request(
        &mut self,
        request: Request,
        cancel_id: NumberOrString,
        token: CancellationToken,
    ) {
        let Request { id, method, params } = request;
        if self.shutdown_requested {
            self.cancellation.finish(&cancel_id);
            self.send(Response::new_err(
                id,
                ErrorCode::InvalidRequest as i32,
                "server is shutting down".to_string(),
            ));
            return;
        }

        let pending = match method.as_str() {
            request::Shutdown::METHOD => {
                self.shutdown_requested = true;
                self.diagnostics.shutdown();
                Ok(Some(Value::Null))
            }
            request::CodeActionRequest::METHOD => parse::<CodeActionParams>(params)
                .and_then(|params| {
                    let uri = params.text_document.uri;
                    let path = path_from_uri(&uri)?;
                    let actions = quick_fix_actions(&self.diagnostics, &uri, &path, params.range);
                    Ok(Some(to_value(actions)))
                }),
            request::CodeActionResolveRequest::METHOD => {
                parse::<CodeAction>(params).and_then(|action| {
                    let data = ActionData::from_action(&action).map_err(invalid_params)?;
                    let uri: Uri = data
                        .uri
                        .parse()
                        .map_err(|_| invalid_params(format!("invalid uri {}", data.uri)))?;
                    let path = path_from_uri(&uri)?;
                    let original = action.clone();
                    let command =
                        ResolveCodeActionCommand::new(action, data, self.diagnostics.clone());
                    self.spawn(id.clone(), cancel_id.clone(), token, &path, command, |output| {
                        to_value(output.unwrap_or(original))
                    });
                    Ok(None)
                })
            }
            request::Formatting::METHOD => {
                parse::<DocumentFormattingParams>(params).and_then(|params| {
                    let path = path_from_uri(&params.text_document.uri)?;
                    let command = FormattingCommand::new(None, format_options(&params.options));
                    self.spawn(id.clone(), cancel_id.clone(), token, &path, command, to_value);
                    Ok(None)
                })
            }
            request::RangeFormatting::METHOD => {
                parse::<DocumentRangeFormattingParams>(params).and_then(|params| {
                    let path = path_from_uri(&params.text_document.uri)?;
                    let command = FormattingCommand::new(
                        Some(params.range.into()),
                        format_options(&params.options),
                    );
                    self.spawn(id.clone(), cancel_id.clone(), token, &path, command, to_value);
                    Ok(None)
                })
            }
            request::Rename::METHOD => parse::<RenameParams>(params).and_then(|params| {
                let position = params.text_document_position;
                let path = path_from_uri(&position.text_document.uri)?;
                let command = RenameCommand::new(position.position.into(), params.new_name);
                self.spawn(id.clone(), cancel_id.clone(), token, &path, command, |output| {
                    to_value(output.flatten())
                });
                Ok(None)
            }),
            request::References::METHOD => parse::<ReferenceParams>(params).and_then(|params| {
                let position = params.text_document_position;
                let path = path_from_uri(&position.text_document.uri)?;
                let command = ReferencesCommand::new(position.position.into());
                self.spawn(id.clone(), cancel_id.clone(), token, &path, command, to_value);
                Ok(None)
            }),
            request::DocumentHighlightRequest::METHOD => parse::<DocumentHighlightParams>(params)
                .and_then(|params| {
                    let position = params.text_document_position_params;
                    let path = path_from_uri(&position.text_document.uri)?;
                    let command = DocumentHighlightCommand::new(position.position.into());
                    self.spawn(id.clone(), cancel_id.clone(), token, &path, command, to_value);
                    Ok(None)
                }),
            _ => Err(ResponseError::new(
                ErrorCode::MethodNotFound,
                format!("method not found: {method}"),
            )),
        };

        match pending {
            // Answered later by the spawned command.
            Ok(None) => {}
            Ok(Some(result)) => {
                self.cancellation.finish(&cancel_id);
                self.send(Response::new_ok(id, result));
            }
            Err(err) => {
                self.cancellation.finish(&cancel_id);
                self.send(Response::new_err(id, err.code as i32, err.message));
            }
        }
    }

    /// Run `command` and answer `id` once it completes.
    fn spawn<C: Command>(
        &self,
        id: RequestId,
        cancel_id: NumberOrString,
        token: CancellationToken,
        path: &LspPath,
        command: C,
        to_result: impl FnOnce(Option<C::Output>) -> Value + Send + 'static,
    ) {
        let task = self.runner.run(command, path, token);
        let client = self.client.clone();
        let cancellation = self.cancellation.clone();
        self.scheduler.io_handle().spawn(async move {
            let response = match task.join().await {
                Ok(output) => Response::new_ok(id, to_result(output)),
                Err(err) => {
                    let err = ResponseError::from(err);
                    Response::new_err(id, err.code as i32, err.message)
                }
            };
            cancellation.finish(&cancel_id);
            if let Err(err) = client.respond(response) {
                tracing::debug!(target = "ideals.lsp", error = %err, "failed to send response");
            }
        });
    }

    fn handle_notification(&mut self, notification: Notification) {
        let Notification { method, params } = notification;
        match method.as_str() {
            notification::DidOpenTextDocument::METHOD => {
                let Some(params) = parse_notification::<DidOpenTextDocumentParams>(&method, params)
                else {
                    return;
                };
                let document = params.text_document;
                let Some(path) = notification_path(&document.uri) else {
                    return;
                };
                self.engine.model_lock().run(|| {
                    self.workspace
                        .open(path.clone(), document.text, document.version)
                });
                self.diagnostics.launch_diagnostics(&path);
            }
            notification::DidChangeTextDocument::METHOD => {
                let Some(params) =
                    parse_notification::<DidChangeTextDocumentParams>(&method, params)
                else {
                    return;
                };
                let Some(path) = notification_path(&params.text_document.uri) else {
                    return;
                };
                // Stop the pass over the old text first so it releases the model lock.
                self.diagnostics.halt_diagnostics(&path);
                let changes: Vec<ContentChange> = params
                    .content_changes
                    .into_iter()
                    .map(ContentChange::from)
                    .collect();
                let version = params.text_document.version;
                let applied = self
                    .engine
                    .model_lock()
                    .run(|| self.workspace.change(&path, version, &changes));
                if let Err(err) = applied {
                    tracing::warn!(
                        target = "ideals.lsp",
                        path = %path,
                        error = %err,
                        "failed to apply document change"
                    );
                }
                self.diagnostics.launch_diagnostics(&path);
            }
            notification::DidSaveTextDocument::METHOD => {
                let Some(params) = parse_notification::<DidSaveTextDocumentParams>(&method, params)
                else {
                    return;
                };
                let Some(path) = notification_path(&params.text_document.uri) else {
                    return;
                };
                if let Some(text) = params.text {
                    if let Some(version) = self.workspace.document_version(&path) {
                        let applied = self.engine.model_lock().run(|| {
                            self.workspace
                                .change(&path, version, &[ContentChange::full(text)])
                        });
                        if let Err(err) = applied {
                            tracing::warn!(
                                target = "ideals.lsp",
                                path = %path,
                                error = %err,
                                "failed to sync saved document"
                            );
                        }
                    }
                }
                self.diagnostics.launch_diagnostics(&path);
            }
            notification::DidCloseTextDocument::METHOD => {
                let Some(params) =
                    parse_notification::<DidCloseTextDocumentParams>(&method, params)
                else {
                    return;
                };
                let Some(path) = notification_path(&params.text_document.uri) else {
                    return;
                };
                self.diagnostics.halt_diagnostics(&path);
                self.engine
                    .model_lock()
                    .run(|| self.workspace.close(&path));
            }
            notification::DidChangeConfiguration::METHOD => {
                let Some(params) =
                    parse_notification::<DidChangeConfigurationParams>(&method, params)
                else {
                    return;
                };
                self.apply_settings(&params.settings);
            }
            notification::Initialized::METHOD | notification::SetTrace::METHOD => {}
            _ => {
                tracing::debug!(target = "ideals.lsp", method, "ignoring notification");
            }
        }
    }

    /// Apply `workspace/didChangeConfiguration` settings. Both `{"ideals": {"diagnostics":
    /// ...}}` and a bare `{"diagnostics": ...}` are accepted.
    fn apply_settings(&mut self, settings: &Value) {
        let section = settings.get("ideals").unwrap_or(settings);
        let was_enabled = self.diagnostics.config().enabled;
        if let Some(overrides) = section.get("diagnostics") {
            let mut config = self.diagnostics.config();
            match config.apply_overrides(overrides) {
                Ok(()) => self.diagnostics.set_config(config),
                Err(err) => {
                    tracing::warn!(target = "ideals.lsp", error = %err, "ignoring settings");
                    return;
                }
            }
        }

        if !was_enabled && self.diagnostics.config().enabled {
            for path in self.workspace.open_paths() {
                self.diagnostics.launch_diagnostics(&path);
            }
        } else {
            self.diagnostics.refresh_all();
        }
    }
}

struct ResponseError {
    code: ErrorCode,
    message: String,
}

impl ResponseError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CommandError> for ResponseError {
    fn from(err: CommandError) -> Self {
        let code = match err {
            CommandError::Cancelled => ErrorCode::RequestCanceled,
            CommandError::InvalidParams(_) => ErrorCode::InvalidParams,
            CommandError::Failed(_) | CommandError::Panicked => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

fn invalid_params(err: impl ToString) -> ResponseError {
    ResponseError::new(ErrorCode::InvalidParams, err.to_string())
}

fn parse<P: DeserializeOwned>(params: Value) -> Result<P, ResponseError> {
    serde_json::from_value(params).map_err(invalid_params)
}

fn parse_notification<P: DeserializeOwned>(method: &str, params: Value) -> Option<P> {
    match serde_json::from_value(params) {
        Ok(params) => Some(params),
        Err(err) => {
            tracing::warn!(
                target = "ideals.lsp",
                method,
                error = %err,
                "malformed notification params"
            );
            None
        }
    }
}

fn path_from_uri(uri: &Uri) -> Result<LspPath, ResponseError> {
    LspPath::try_from(uri).map_err(invalid_params)
}

fn notification_path(uri: &Uri) -> Option<LspPath> {
    match LspPath::try_from(uri) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::warn!(target = "ideals.lsp", error = %err, "ignoring document");
            None
        }
    }
}

fn format_options(options: &lsp_types::FormattingOptions) -> FormatOptions {
    FormatOptions {
        tab_size: options.tab_size,
        insert_spaces: options.insert_spaces,
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
