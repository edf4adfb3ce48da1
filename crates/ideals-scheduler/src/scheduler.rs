use std::{sync::Arc, time::Duration};

use rayon::ThreadPool;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

use crate::{
    delayed::DelayedTask, panic_payload_to_str, task::BlockingTask, CancellationToken, Cancelled,
    TaskError,
};

enum BlockingPool {
    Rayon(ThreadPool),
    Inline,
}

impl BlockingPool {
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            BlockingPool::Rayon(pool) => pool.spawn(job),
            BlockingPool::Inline => job(),
        }
    }
}

fn build_rayon_pool(prefix: &'static str, threads: usize) -> BlockingPool {
    // Thread creation can fail in constrained environments (low RLIMIT_NPROC, `EAGAIN`).
    // Halve the pool until it fits instead of failing startup.
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return BlockingPool::Rayon(pool),
            Err(_) if threads > 1 => {
                threads = (threads / 2).max(1);
            }
            Err(err) => {
                tracing::warn!(
                    target = "ideals.scheduler",
                    pool = prefix,
                    error = %err,
                    "failed to start worker threads; running jobs inline"
                );
                return BlockingPool::Inline;
            }
        }
    }
}

fn build_io_runtime(threads: usize) -> Runtime {
    let mut threads = threads.max(1);
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_time()
            .thread_name("ideals-io")
            .build()
        {
            Ok(rt) => return rt,
            Err(_) if threads > 1 => {
                threads = 1;
            }
            Err(err) => {
                // A current-thread runtime needs no extra OS threads.
                return tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap_or_else(|_| panic!("failed to build IO runtime: {err}"));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Latency-sensitive request handling (commands).
    Compute,
    /// Analysis passes that may run for a while (diagnostics).
    Background,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub compute_threads: usize,
    pub background_threads: usize,
    pub io_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            // `available_parallelism()` can report the host CPU count inside containers; keep
            // defaults conservative and let the config file raise them.
            compute_threads: available.saturating_sub(1).clamp(1, 8),
            background_threads: available.clamp(1, 2),
            io_threads: 1,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    compute_pool: BlockingPool,
    background_pool: BlockingPool,
    io_runtime: Option<Runtime>,
    io_handle: tokio::runtime::Handle,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let io_runtime = build_io_runtime(config.io_threads);
        let io_handle = io_runtime.handle().clone();
        let compute_pool = build_rayon_pool("ideals-compute", config.compute_threads);
        let background_pool = build_rayon_pool("ideals-background", config.background_threads);
        Self {
            inner: Arc::new(SchedulerInner {
                compute_pool,
                background_pool,
                io_runtime: Some(io_runtime),
                io_handle,
            }),
        }
    }

    pub fn io_handle(&self) -> tokio::runtime::Handle {
        self.inner.io_handle.clone()
    }

    /// Run `f` on the given pool. A panic inside `f` is caught and reported as
    /// [`TaskError::Panicked`]; it never tears down the worker thread.
    pub fn spawn_blocking_on<T, F>(
        &self,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BlockingTask::new(token, rx);
        }

        let token_for_job = token.clone();
        let job = move || {
            let result =
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job))) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::from(err)),
                    Err(panic) => {
                        let message = panic_payload_to_str(&*panic);
                        tracing::error!(
                            target = "ideals.scheduler",
                            pool = ?pool,
                            panic = %message,
                            "task panicked"
                        );
                        Err(TaskError::Panicked)
                    }
                };
            let _ = tx.send(result);
        };

        match pool {
            PoolKind::Compute => self.inner.compute_pool.spawn(job),
            PoolKind::Background => self.inner.background_pool.spawn(job),
        }

        BlockingTask::new(token, rx)
    }

    pub fn spawn_compute_with_token<T, F>(&self, token: CancellationToken, f: F) -> BlockingTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_blocking_on(PoolKind::Compute, token, f)
    }

    /// Run `f` on `pool` once `delay` has elapsed, unless the returned handle (or `token`)
    /// is cancelled first. Cancelling after the job started only fires its token.
    pub fn schedule_after<F>(
        &self,
        delay: Duration,
        pool: PoolKind,
        token: CancellationToken,
        f: F,
    ) -> DelayedTask
    where
        F: FnOnce(CancellationToken) -> Result<(), Cancelled> + Send + 'static,
    {
        DelayedTask::spawn(self.clone(), delay, pool, token, f)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
    }
}
