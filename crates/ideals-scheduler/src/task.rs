use tokio::sync::oneshot;

use crate::{CancellationToken, TaskError};

/// Handle to a job running on one of the blocking pools.
pub struct BlockingTask<T> {
    token: CancellationToken,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> BlockingTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        rx: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, rx }
    }

    /// A task that has already finished with `result`.
    pub fn ready(result: Result<T, TaskError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self::new(CancellationToken::new(), rx)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the job. Resolves to [`TaskError::Cancelled`] as soon as the token fires,
    /// even if the job is still winding down on its worker.
    pub async fn join(self) -> Result<T, TaskError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TaskError::Cancelled),
            result = self.rx => match result {
                Ok(result) => result,
                Err(_) => Err(TaskError::Panicked),
            }
        }
    }
}
