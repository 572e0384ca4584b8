//! Fixed-size worker pool over bounded channels
//!
//! A [`WorkerPool`] owns an input channel of tasks, an output channel of
//! [`TaskOutput`]s and a [`WaitGroup`] tracking worker termination. Each worker
//! loops: take an input, run the task function, publish the result. Publishing
//! may block when the output is full, which pushes back on producers.
//!
//! Teardown is explicit. [`WorkerPool::shutdown`] closes the input, waits for
//! every worker to drain it and exit, then closes the output, so consumers see
//! end-of-stream only after every result was delivered. Dropping the last pool
//! handle without a shutdown leaves idle workers parked on the input.

use crate::barrier::{DoneGuard, WaitGroup};
use crate::cancel::CancellationToken;
use crate::channel::BoundedChannel;
use crate::config::{PanicPolicy, PoolConfig};
use crate::task::{run_guarded, task_fn, Completion, TaskFn, TaskId, TaskOutput};
use conveyor_common::{Error, ErrorKind, LoggingTransformer, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SLOW_SHUTDOWN: Duration = Duration::from_secs(5);

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Tasks accepted through [`WorkerPool::submit`]
    pub submitted: u64,
    /// Tasks taken by a worker
    pub started: u64,
    /// Tasks whose function returned an output
    pub succeeded: u64,
    /// Tasks whose function returned an error
    pub failed: u64,
    /// Tasks whose function panicked
    pub panicked: u64,
    /// Tasks dropped without a delivered result
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Acquire),
            started: self.started.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            panicked: self.panicked.load(Ordering::Acquire),
            abandoned: self.abandoned.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug)]
enum WorkerExit {
    Drained,
    Interrupted(Error),
    Undeliverable(Error),
    Restarted,
    Retired,
}

struct PoolInner<I, O> {
    config: PoolConfig,
    input: BoundedChannel<I>,
    output: BoundedChannel<TaskOutput<O>>,
    task: TaskFn<I, O>,
    workers: WaitGroup,
    token: CancellationToken,
    next_task: AtomicU64,
    next_worker: AtomicUsize,
    live: AtomicUsize,
    degraded: AtomicBool,
    counters: PoolCounters,
}

/// Fixed set of concurrent executors between two bounded channels
pub struct WorkerPool<I, O> {
    inner: Arc<PoolInner<I, O>>,
}

impl<I, O> Clone for WorkerPool<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start a pool with fresh channels and its own root token
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid config or when called outside a
    /// Tokio runtime.
    pub fn start<F, Fut>(config: PoolConfig, f: F) -> Result<Self>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::start_with(config, &CancellationToken::new(), f)
    }

    /// Start a pool whose workers stop when `token` fires
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::start`].
    pub fn start_with<F, Fut>(config: PoolConfig, token: &CancellationToken, f: F) -> Result<Self>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        config.validate()?;
        let input = BoundedChannel::new(config.input_capacity)?;
        let output = BoundedChannel::new(config.output_capacity)?;
        Self::with_channels(config, input, output, task_fn(f), token)
    }

    /// Start `config.workers` workers draining `input` into `output`
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::start`].
    pub fn with_channels(
        config: PoolConfig,
        input: BoundedChannel<I>,
        output: BoundedChannel<TaskOutput<O>>,
        task: TaskFn<I, O>,
        token: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| Error::with_source(ErrorKind::Configuration, e))?;

        let workers = config.workers;
        let inner = Arc::new(PoolInner {
            config,
            input,
            output,
            task,
            workers: WaitGroup::new(),
            token: token.child(),
            next_task: AtomicU64::new(0),
            next_worker: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            counters: PoolCounters::default(),
        });

        for _ in 0..workers {
            PoolInner::spawn_worker(&inner)?;
        }

        info!(
            pool = %inner.config.name,
            workers,
            input_capacity = inner.input.capacity(),
            output_capacity = inner.output.capacity(),
            panic_policy = ?inner.config.panic_policy,
            "worker pool started"
        );

        Ok(Self { inner })
    }

    /// Queue a task, waiting while the input is full
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` after shutdown (or once every worker retired),
    /// `Cancelled` / `DeadlineExceeded` once the pool token fired.
    pub async fn submit(&self, item: I) -> Result<()> {
        self.inner.input.put_with(item, &self.inner.token).await?;
        self.inner.counters.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Queue a task, also giving up when the caller's `token` fires
    ///
    /// # Errors
    ///
    /// Same as [`WorkerPool::submit`].
    pub async fn submit_with(&self, item: I, token: &CancellationToken) -> Result<()> {
        token.run_until(self.submit(item)).await?
    }

    /// Result channel; closed once shutdown completes
    #[must_use]
    pub fn results(&self) -> BoundedChannel<TaskOutput<O>> {
        self.inner.output.clone()
    }

    /// Input channel, for producers that feed the pool directly
    #[must_use]
    pub fn input(&self) -> BoundedChannel<I> {
        self.inner.input.clone()
    }

    /// Stop workers at their next suspension point
    ///
    /// In-flight tasks still run to completion. Tasks left in the input are
    /// counted as abandoned.
    pub fn cancel(&self) {
        info!(pool = %self.inner.config.name, "worker pool cancelled");
        self.inner.token.cancel();
    }

    /// Close the input, join every worker, then close the output
    ///
    /// Idempotent: later calls return the same statistics and change nothing.
    /// Waits for results to be consumed when the output is full.
    pub async fn shutdown(&self) -> PoolStats {
        let name = &self.inner.config.name;
        let started = Instant::now();

        if self.inner.input.close() {
            debug!(pool = %name, "input closed, draining");
        }
        self.inner.workers.wait().await;

        if self.inner.output.close() {
            let stats = self.stats();
            info!(
                pool = %name,
                succeeded = stats.succeeded,
                failed = stats.failed,
                panicked = stats.panicked,
                abandoned = stats.abandoned,
                "worker pool shut down"
            );
            LoggingTransformer::log_slow_shutdown(name, started.elapsed(), SLOW_SHUTDOWN);
        }

        self.stats()
    }

    /// [`WorkerPool::shutdown`] bounded by `token`
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if workers have not exited when
    /// the token fires; the output stays open in that case.
    pub async fn shutdown_with(&self, token: &CancellationToken) -> Result<PoolStats> {
        token.run_until(self.shutdown()).await
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    /// Whether a worker retired under [`PanicPolicy::Degrade`]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    /// Workers currently running
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Pool name from the config
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Token governing this pool's workers
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl<I, O> PoolInner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn spawn_worker(this: &Arc<Self>) -> Result<()> {
        let guard = this.workers.guard()?;
        let worker = this.next_worker.fetch_add(1, Ordering::AcqRel);
        this.live.fetch_add(1, Ordering::AcqRel);

        let inner = Arc::clone(this);
        tokio::spawn(async move { inner.run_worker(worker, guard).await });
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, worker: usize, _guard: DoneGuard) {
        let name = &self.config.name;
        debug!(pool = %name, worker, "worker started");

        let exit = loop {
            let input = match self.input.get_with(&self.token).await {
                Ok(Some(input)) => input,
                Ok(None) => break WorkerExit::Drained,
                Err(error) => break WorkerExit::Interrupted(error),
            };

            let id = TaskId(self.next_task.fetch_add(1, Ordering::AcqRel));
            self.counters.started.fetch_add(1, Ordering::AcqRel);

            let (result, panicked) = match run_guarded(|| (self.task)(input)).await {
                Completion::Finished(Ok(value)) => {
                    self.counters.succeeded.fetch_add(1, Ordering::AcqRel);
                    (Ok(value), false)
                }
                Completion::Finished(Err(error)) => {
                    self.counters.failed.fetch_add(1, Ordering::AcqRel);
                    debug!(pool = %name, worker, task = %id, %error, "task failed");
                    (Err(error), false)
                }
                Completion::Panicked(error) => {
                    self.counters.panicked.fetch_add(1, Ordering::AcqRel);
                    warn!(pool = %name, worker, task = %id, %error, "task panicked");
                    (Err(error), true)
                }
            };

            if let Err(error) = self
                .output
                .put_with(TaskOutput { id, result }, &self.token)
                .await
            {
                self.counters.abandoned.fetch_add(1, Ordering::AcqRel);
                break WorkerExit::Undeliverable(error);
            }

            if panicked {
                match self.config.panic_policy {
                    PanicPolicy::Continue => {}
                    PanicPolicy::Restart => match Self::spawn_worker(&self) {
                        Ok(()) => break WorkerExit::Restarted,
                        Err(error) => {
                            warn!(pool = %name, worker, %error, "restart failed, worker continues");
                        }
                    },
                    PanicPolicy::Degrade => {
                        self.degraded.store(true, Ordering::Release);
                        break WorkerExit::Retired;
                    }
                }
            }
        };

        debug!(pool = %name, worker, ?exit, "worker exited");

        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.retire_input();
        }
    }

    /// Last worker out: refuse new input and account for what was left behind
    fn retire_input(&self) {
        let name = &self.config.name;
        if self.input.close() {
            warn!(pool = %name, "no workers left, input closed");
        }

        let leftovers = self.input.drain().len() as u64;
        if leftovers > 0 {
            self.counters.abandoned.fetch_add(leftovers, Ordering::AcqRel);
            warn!(pool = %name, leftovers, "queued tasks abandoned");
        }
    }
}

impl<I, O> std::fmt::Debug for WorkerPool<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.config.name)
            .field("workers", &self.inner.config.workers)
            .field("live", &self.inner.live.load(Ordering::Acquire))
            .field("degraded", &self.inner.degraded.load(Ordering::Acquire))
            .finish()
    }
}

