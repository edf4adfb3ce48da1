use std::time::Duration;

use crate::{CancellationToken, Cancelled, PoolKind, Scheduler};

/// A job that runs on a worker pool after a delay.
///
/// Cancelling before the delay elapses drops the job without running it. Cancelling
/// afterwards fires the token the job was handed; the job is expected to observe it at
/// its next checkpoint.
pub struct DelayedTask {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl DelayedTask {
    pub(crate) fn spawn<F>(
        scheduler: Scheduler,
        delay: Duration,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Result<(), Cancelled> + Send + 'static,
    {
        let token_for_task = token.clone();
        let io = scheduler.io_handle();
        let handle = io.spawn(async move {
            tokio::select! {
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let task = scheduler.spawn_blocking_on(pool, token_for_task, f);
                    let _ = task.join().await;
                }
            }
        });
        Self { token, handle }
    }

    /// Cancel the job. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        // Aborting the timer only matters while the job has not been handed to a pool yet;
        // a job already on a worker keeps running until it observes the token.
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
