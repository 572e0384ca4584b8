//! Bounded executor: launch any number of tasks, run at most N at once

use crate::cancel::CancellationToken;
use crate::config::ExecutorConfig;
use crate::limiter::Limiter;
use crate::task::AsyncTask;
use conveyor_common::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Metrics for executor performance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorMetrics {
    /// Tasks that returned an output
    pub tasks_executed: u64,
    /// Tasks that failed, panicked or exceeded the task timeout
    pub tasks_failed: u64,
    /// Tasks stopped by the executor token (cancellation or deadline)
    pub tasks_cancelled: u64,
    /// Mean wall time including the wait for a slot
    pub average_execution_time: Duration,
}

/// Runs tasks through a [`Limiter`] with an optional per-task timeout
pub struct BoundedExecutor {
    config: ExecutorConfig,
    limiter: Limiter,
    token: CancellationToken,
    metrics: Arc<RwLock<ExecutorMetrics>>,
}

impl BoundedExecutor {
    /// Create an executor
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `max_concurrent_tasks` is zero.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::with_token(config, CancellationToken::new())
    }

    /// Create an executor whose pending tasks give up when `token` fires
    ///
    /// # Errors
    ///
    /// Same as [`BoundedExecutor::new`].
    pub fn with_token(config: ExecutorConfig, token: CancellationToken) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limiter: Limiter::new(config.max_concurrent_tasks)?,
            config,
            token,
            metrics: Arc::new(RwLock::new(ExecutorMetrics::default())),
        })
    }

    /// The limiter gating execution
    #[must_use]
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Execute a single task once a slot is free
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` / `DeadlineExceeded` if the executor token fires
    /// while waiting for a slot or running, `DeadlineExceeded` if the task
    /// exceeds the configured timeout, or `TaskFailure` for the task's own
    /// error or panic.
    pub async fn execute_task<T>(&self, task: AsyncTask<T>) -> Result<T>
    where
        T: Send + 'static,
    {
        let start_time = Instant::now();
        // `stopped` marks errors raised by the executor token, not by the task
        let (result, stopped) = match self.limiter.acquire_with(&self.token).await {
            Ok(_permit) => {
                let run = async {
                    match self.config.task_timeout {
                        Some(timeout) => task.execute_with_timeout(timeout).await,
                        None => task.execute().await,
                    }
                };
                match self.token.run_until(run).await {
                    Ok(result) => (result, false),
                    Err(error) => (Err(error), true),
                }
            }
            Err(error) => {
                let stopped = error.kind().is_cancellation();
                (Err(error), stopped)
            }
        };

        if self.config.enable_metrics {
            self.update_metrics(&result, stopped, start_time.elapsed()).await;
        }

        result
    }

    /// Execute every task concurrently, at most `max_concurrent_tasks` at once
    ///
    /// Results keep the order of `tasks`.
    pub async fn execute_batch<T>(&self, tasks: Vec<AsyncTask<T>>) -> Vec<Result<T>>
    where
        T: Send + 'static,
    {
        let futures = tasks.into_iter().map(|task| self.execute_task(task));
        futures::future::join_all(futures).await
    }

    /// Get current metrics
    pub async fn metrics(&self) -> ExecutorMetrics {
        self.metrics.read().await.clone()
    }

    async fn update_metrics<T>(&self, result: &Result<T>, stopped: bool, duration: Duration) {
        let mut metrics = self.metrics.write().await;

        match result {
            Ok(_) => metrics.tasks_executed += 1,
            Err(_) if stopped => metrics.tasks_cancelled += 1,
            Err(_) => metrics.tasks_failed += 1,
        }

        // Running mean over every recorded task
        let total_tasks = metrics.tasks_executed + metrics.tasks_failed + metrics.tasks_cancelled;
        if total_tasks > 0 {
            let total_nanos = metrics.average_execution_time.as_nanos()
                * u128::from(total_tasks - 1)
                + duration.as_nanos();
            metrics.average_execution_time = Duration::from_nanos(
                u64::try_from(total_nanos / u128::from(total_tasks)).unwrap_or(u64::MAX),
            );
        }
    }
}
