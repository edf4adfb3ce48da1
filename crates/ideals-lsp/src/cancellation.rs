use std::collections::HashMap;
use std::sync::Arc;

use ideals_scheduler::CancellationToken;
use lsp_server::RequestId;
use lsp_types::NumberOrString;
use parking_lot::Mutex;

/// Tracks one cancellation token per in-flight request so `$/cancelRequest` can reach the
/// work started for it.
#[derive(Clone, Default)]
pub struct RequestCancellation {
    tokens: Arc<Mutex<HashMap<NumberOrString, CancellationToken>>>,
}

impl RequestCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: NumberOrString) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.lock().insert(id, token.clone()) {
            // Request ids are unique per session; a clash means the client reused one.
            previous.cancel();
        }
        token
    }

    /// Fire the token registered for `id`. Returns `false` if the request is unknown or
    /// already finished.
    pub fn cancel(&self, id: NumberOrString) -> bool {
        match self.tokens.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the token once the response has been sent.
    pub fn finish(&self, id: &NumberOrString) {
        self.tokens.lock().remove(id);
    }
}

pub fn cancel_id_from_request_id(id: &RequestId) -> NumberOrString {
    let value = match serde_json::to_value(id) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(
                target = "ideals.lsp",
                err = %err,
                "failed to serialize request id for cancellation"
            );
            return NumberOrString::String("<invalid-request-id>".to_string());
        }
    };
    match serde_json::from_value(value) {
        Ok(id) => id,
        Err(err) => {
            tracing::debug!(
                target = "ideals.lsp",
                err = %err,
                "failed to decode request id for cancellation"
            );
            NumberOrString::String("<invalid-request-id>".to_string())
        }
    }
}
