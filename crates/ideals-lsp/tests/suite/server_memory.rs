use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ideals_config::IdealsConfig;
use ideals_engine::{AnalysisEngine, PlainTextEngine};
use lsp_server::{Connection, ErrorCode, Message, Notification, Request, RequestId, Response};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::support::TIMEOUT;

const URI: &str = "file:///ws/Notes.txt";

struct TestClient {
    connection: Connection,
    server: Option<JoinHandle<anyhow::Result<()>>>,
    next_id: i32,
}

impl TestClient {
    fn start() -> Self {
        Self::start_with(Arc::new(PlainTextEngine::new()), json!({}))
    }

    fn start_with(engine: Arc<dyn AnalysisEngine>, capabilities: Value) -> Self {
        let (server, connection) = Connection::memory();
        let handle = std::thread::spawn(move || {
            ideals_lsp::serve(&server, IdealsConfig::default(), engine)
        });
        let mut client = Self {
            connection,
            server: Some(handle),
            next_id: 0,
        };

        let response = client.request(
            "initialize",
            json!({
                "processId": null,
                "capabilities": capabilities,
                "initializationOptions": { "diagnostics": { "debounce_ms": 10 } }
            }),
        );
        let result = response.result.expect("initialize result");
        assert_eq!(result["serverInfo"]["name"], "ideals-lsp");
        assert_eq!(
            result["capabilities"]["codeActionProvider"]["resolveProvider"],
            true
        );
        assert_eq!(result["capabilities"]["renameProvider"], true);
        assert_eq!(result["capabilities"]["referencesProvider"], true);
        assert_eq!(result["capabilities"]["documentHighlightProvider"], true);
        client.notify("initialized", json!({}));
        client
    }

    fn send(&self, message: Message) {
        self.connection.sender.send(message).expect("server is running");
    }

    fn notify(&self, method: &str, params: Value) {
        self.send(Message::Notification(Notification {
            method: method.to_string(),
            params,
        }));
    }

    fn send_request(&mut self, method: &str, params: Value) -> RequestId {
        self.next_id += 1;
        let id = RequestId::from(self.next_id);
        self.send(Message::Request(Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        }));
        id
    }

    fn request(&mut self, method: &str, params: Value) -> Response {
        let id = self.send_request(method, params);
        self.response_for(&id)
    }

    fn response_for(&self, id: &RequestId) -> Response {
        loop {
            match self.connection.receiver.recv_timeout(TIMEOUT) {
                Ok(Message::Response(response)) if &response.id == id => return response,
                Ok(_) => continue,
                Err(err) => panic!("no response for {id:?}: {err}"),
            }
        }
    }

    fn next_message(&self) -> Message {
        self.connection
            .receiver
            .recv_timeout(TIMEOUT)
            .expect("message from server")
    }

    fn next_publish(&self) -> Value {
        loop {
            match self.connection.receiver.recv_timeout(TIMEOUT) {
                Ok(Message::Notification(notification))
                    if notification.method == "textDocument/publishDiagnostics" =>
                {
                    return notification.params;
                }
                Ok(_) => continue,
                Err(err) => panic!("no publishDiagnostics: {err}"),
            }
        }
    }

    fn open(&self, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": URI,
                    "languageId": "plaintext",
                    "version": 1,
                    "text": text
                }
            }),
        );
    }

    fn shutdown(mut self) {
        let response = self.request("shutdown", Value::Null);
        assert!(response.error.is_none());

        let late = self.request("textDocument/formatting", json!({}));
        assert_eq!(
            late.error.expect("error").code,
            lsp_server::ErrorCode::InvalidRequest as i32
        );

        self.notify("exit", Value::Null);
        let server = self.server.take().expect("server thread");
        server
            .join()
            .expect("server thread panicked")
            .expect("server exited cleanly");
    }
}

#[test]
fn open_publishes_diagnostics_once_and_edits_republish() {
    let client = TestClient::start();
    client.open("done   \nnext\n");

    let published = client.next_publish();
    assert_eq!(published["uri"], URI);
    assert_eq!(published["version"], 1);
    let diagnostics = published["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "Trailing whitespace");
    assert_eq!(diagnostics[0]["source"], "ideals");

    client.notify(
        "textDocument/didChange",
        json!({
            "textDocument": { "uri": URI, "version": 2 },
            "contentChanges": [{
                "range": {
                    "start": { "line": 0, "character": 4 },
                    "end": { "line": 0, "character": 7 }
                },
                "text": ""
            }]
        }),
    );
    let published = client.next_publish();
    assert_eq!(published["version"], 2);
    assert_eq!(published["diagnostics"], json!([]));

    client.shutdown();
}

#[test]
fn code_actions_resolve_through_the_current_session() {
    let mut client = TestClient::start();
    client.open("done   \nnext\n");
    client.next_publish();

    let range = json!({
        "start": { "line": 0, "character": 0 },
        "end": { "line": 0, "character": 7 }
    });
    let response = client.request(
        "textDocument/codeAction",
        json!({
            "textDocument": { "uri": URI },
            "range": range,
            "context": { "diagnostics": [] }
        }),
    );
    let actions = response.result.expect("actions");
    let actions = actions.as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["title"], "Remove trailing whitespace");
    assert_eq!(actions[0]["kind"], "quickfix");

    let response = client.request("codeAction/resolve", actions[0].clone());
    let resolved = response.result.expect("resolved action");
    let change = &resolved["edit"]["documentChanges"][0];
    assert_eq!(change["textDocument"]["uri"], URI);
    assert_eq!(change["textDocument"]["version"], 1);
    assert_eq!(change["edits"][0]["newText"], "");

    client.shutdown();
}

#[test]
fn rename_and_formatting_requests_are_answered() {
    let mut client = TestClient::start();
    client.open("foo\tbar foo");
    client.next_publish();

    let response = client.request(
        "textDocument/rename",
        json!({
            "textDocument": { "uri": URI },
            "position": { "line": 0, "character": 9 },
            "newName": "qux"
        }),
    );
    let edit = response.result.expect("rename result");
    let edits = edit["documentChanges"][0]["edits"].as_array().unwrap();
    assert_eq!(edits.len(), 2);

    let response = client.request(
        "textDocument/formatting",
        json!({
            "textDocument": { "uri": URI },
            "options": { "tabSize": 4, "insertSpaces": true }
        }),
    );
    let edits = response.result.expect("formatting result");
    let new_texts: Vec<_> = edits
        .as_array()
        .unwrap()
        .iter()
        .map(|edit| edit["newText"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(new_texts, vec!["\n"]);

    let response = client.request(
        "textDocument/rename",
        json!({
            "textDocument": { "uri": URI },
            "position": { "line": 0, "character": 1 },
            "newName": ""
        }),
    );
    assert_eq!(
        response.error.expect("error").code,
        lsp_server::ErrorCode::InvalidParams as i32
    );

    client.shutdown();
}

#[test]
fn unknown_requests_and_unopened_documents() {
    let mut client = TestClient::start();

    let response = client.request("ideals/unknown", json!({}));
    assert_eq!(
        response.error.expect("error").code,
        lsp_server::ErrorCode::MethodNotFound as i32
    );

    // Neither open nor on disk: the command has nothing to run against.
    let response = client.request(
        "textDocument/formatting",
        json!({
            "textDocument": { "uri": "file:///ws/Missing.txt" },
            "options": { "tabSize": 4, "insertSpaces": true }
        }),
    );
    assert!(response.error.is_none());
    assert_eq!(response.result, Some(Value::Null));

    client.shutdown();
}

#[test]
fn closing_a_document_stops_its_diagnostics() {
    let client = TestClient::start();
    client.notify(
        "workspace/didChangeConfiguration",
        json!({ "settings": { "ideals": { "diagnostics": { "debounce_ms": 300 } } } }),
    );
    client.open("trailing  \n");
    client.notify(
        "textDocument/didClose",
        json!({ "textDocument": { "uri": URI } }),
    );

    let quiet = std::time::Duration::from_millis(600);
    while let Ok(message) = client.connection.receiver.recv_timeout(quiet) {
        if let Message::Notification(notification) = message {
            assert_ne!(notification.method, "textDocument/publishDiagnostics");
        }
    }

    client.shutdown();
}

#[test]
fn references_and_highlights_are_answered() {
    let mut client = TestClient::start();
    client.open("foo bar\nfoo\n");
    client.next_publish();

    let response = client.request(
        "textDocument/references",
        json!({
            "textDocument": { "uri": URI },
            "position": { "line": 1, "character": 1 },
            "context": { "includeDeclaration": true }
        }),
    );
    let locations = response.result.expect("references");
    assert_eq!(
        locations,
        json!([
            {
                "uri": URI,
                "range": {
                    "start": { "line": 0, "character": 0 },
                    "end": { "line": 0, "character": 3 }
                }
            },
            {
                "uri": URI,
                "range": {
                    "start": { "line": 1, "character": 0 },
                    "end": { "line": 1, "character": 3 }
                }
            }
        ])
    );

    let response = client.request(
        "textDocument/documentHighlight",
        json!({
            "textDocument": { "uri": URI },
            "position": { "line": 0, "character": 5 }
        }),
    );
    let highlights = response.result.expect("highlights");
    assert_eq!(
        highlights,
        json!([{
            "range": {
                "start": { "line": 0, "character": 4 },
                "end": { "line": 0, "character": 7 }
            },
            "kind": 1
        }])
    );

    client.shutdown();
}

#[test]
fn cancel_request_answers_an_in_flight_command_with_request_canceled() {
    let engine = Arc::new(PlainTextEngine::new());
    let mut client = TestClient::start_with(engine.clone(), json!({}));
    client.open("done   \nnext\n");
    client.next_publish();

    let response = client.request(
        "textDocument/codeAction",
        json!({
            "textDocument": { "uri": URI },
            "range": {
                "start": { "line": 0, "character": 0 },
                "end": { "line": 0, "character": 7 }
            },
            "context": { "diagnostics": [] }
        }),
    );
    let action = response.result.expect("actions")[0].clone();

    // Holding the model lock keeps the resolve command queued behind it.
    let response = engine.model_lock().run(|| {
        let id = client.send_request("codeAction/resolve", action.clone());
        client.notify("$/cancelRequest", json!({ "id": id }));
        client.response_for(&id)
    });
    assert!(response.result.is_none());
    assert_eq!(
        response.error.expect("error").code,
        ErrorCode::RequestCanceled as i32
    );

    // The request is forgotten; the same action resolves normally afterwards.
    let response = client.request("codeAction/resolve", action);
    assert!(response.error.is_none());

    client.shutdown();
}

#[test]
fn progress_begins_only_after_the_client_acknowledges_its_token() {
    let client = TestClient::start_with(
        Arc::new(PlainTextEngine::new()),
        json!({ "window": { "workDoneProgress": true } }),
    );
    client.open("done   \n");

    let create = loop {
        match client.next_message() {
            Message::Request(request) if request.method == "window/workDoneProgress/create" => {
                break request;
            }
            Message::Request(request) => panic!("unexpected request {}", request.method),
            _ => continue,
        }
    };
    let token = create.params["token"].clone();

    // Nothing is reported on the token before it is acknowledged.
    while let Ok(message) = client
        .connection
        .receiver
        .recv_timeout(Duration::from_millis(200))
    {
        if let Message::Notification(notification) = message {
            assert_ne!(notification.method, "$/progress");
            assert_ne!(notification.method, "textDocument/publishDiagnostics");
        }
    }

    client.send(Message::Response(Response::new_ok(create.id, Value::Null)));

    let mut kinds = Vec::new();
    let mut published = false;
    while kinds.len() < 2 {
        if let Message::Notification(notification) = client.next_message() {
            match notification.method.as_str() {
                "$/progress" => {
                    assert_eq!(notification.params["token"], token);
                    kinds.push(notification.params["value"]["kind"].clone());
                }
                "textDocument/publishDiagnostics" => {
                    assert_eq!(kinds.len(), 1, "publish comes between begin and end");
                    published = true;
                }
                _ => {}
            }
        }
    }
    assert_eq!(kinds, vec![json!("begin"), json!("end")]);
    assert!(published);

    client.shutdown();
}
