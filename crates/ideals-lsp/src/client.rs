use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use lsp_server::{Message, Notification, Request, RequestId, Response};
use lsp_types::notification::Notification as _;
use lsp_types::request::Request as _;
use lsp_types::{
    Diagnostic, NumberOrString, ProgressParams, ProgressParamsValue, PublishDiagnosticsParams,
    Uri, WorkDoneProgress, WorkDoneProgressCreateParams,
};
use parking_lot::Mutex;

/// How long a server-to-client request waits for its reply.
const CLIENT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages the server pushes to the editor outside of request/response pairs.
pub trait LanguageClient: Send + Sync {
    fn publish_diagnostics(
        &self,
        uri: Uri,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) -> io::Result<()>;

    /// Ask the editor to create a work-done progress token and wait until it acknowledged
    /// it. Progress must not be reported on the token when this fails.
    fn create_progress(&self, token: NumberOrString) -> io::Result<()>;

    fn progress(&self, token: NumberOrString, value: WorkDoneProgress) -> io::Result<()>;
}

/// [`LanguageClient`] backed by the `lsp-server` outgoing channel.
pub struct LspClient {
    sender: Sender<Message>,
    work_done_progress: bool,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Sender<Response>>>,
    request_timeout: Duration,
}

impl LspClient {
    /// `work_done_progress` mirrors the client's `window.workDoneProgress` capability;
    /// without it progress messages are not sent at all.
    pub fn new(sender: Sender<Message>, work_done_progress: bool) -> Self {
        Self {
            sender,
            work_done_progress,
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            request_timeout: CLIENT_REQUEST_TIMEOUT,
        }
    }

    /// Hand a client reply to the request waiting for it. Returns `false` if nothing waits
    /// on `response.id` (unknown id, or the request already timed out).
    pub fn complete(&self, response: Response) -> bool {
        match self.pending.lock().remove(&response.id) {
            Some(waiter) => {
                let _ = waiter.send(response);
                true
            }
            None => false,
        }
    }

    fn send(&self, message: Message) -> io::Result<()> {
        self.sender
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "LSP channel closed"))
    }

    pub fn respond(&self, response: Response) -> io::Result<()> {
        self.send(Message::Response(response))
    }

    fn notify(&self, method: &str, params: impl serde::Serialize) -> io::Result<()> {
        let params = serde_json::to_value(params).map_err(io::Error::other)?;
        self.send(Message::Notification(Notification {
            method: method.to_string(),
            params,
        }))
    }

    /// Send a request to the editor and block until its reply arrives through
    /// [`LspClient::complete`].
    fn request(&self, method: &str, params: impl serde::Serialize) -> io::Result<Response> {
        let params = serde_json::to_value(params).map_err(io::Error::other)?;
        let id = RequestId::from(format!(
            "ideals:{}",
            self.next_request_id.fetch_add(1, Ordering::Relaxed)
        ));
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending.lock().insert(id.clone(), tx);

        let sent = self.send(Message::Request(Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        }));
        if let Err(err) = sent {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        match rx.recv_timeout(self.request_timeout) {
            Ok(response) => Ok(response),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply to {method}"),
                ))
            }
        }
    }
}

impl LanguageClient for LspClient {
    fn publish_diagnostics(
        &self,
        uri: Uri,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    ) -> io::Result<()> {
        self.notify(
            lsp_types::notification::PublishDiagnostics::METHOD,
            PublishDiagnosticsParams {
                uri,
                diagnostics,
                version,
            },
        )
    }

    fn create_progress(&self, token: NumberOrString) -> io::Result<()> {
        if !self.work_done_progress {
            return Ok(());
        }
        let response = self.request(
            lsp_types::request::WorkDoneProgressCreate::METHOD,
            WorkDoneProgressCreateParams { token },
        )?;
        match response.error {
            Some(error) => Err(io::Error::other(format!(
                "client rejected progress token: {}",
                error.message
            ))),
            None => Ok(()),
        }
    }

    fn progress(&self, token: NumberOrString, value: WorkDoneProgress) -> io::Result<()> {
        if !self.work_done_progress {
            return Ok(());
        }
        self.notify(
            lsp_types::notification::Progress::METHOD,
            ProgressParams {
                token,
                value: ProgressParamsValue::WorkDone(value),
            },
        )
    }
}
