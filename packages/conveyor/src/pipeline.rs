//! Multi-stage pipelines connected by bounded channels
//!
//! A [`Pipeline`] is built left to right from typed [`Stage`]s. Starting it
//! spawns every stage: each stage drains its input channel with one or more
//! workers, maps every item through its function and forwards the output into
//! a freshly created channel, which it closes exactly once its input is closed
//! and drained (or the run token fired) and all of its workers exited.
//!
//! # Ordering
//!
//! A stage with one worker preserves input order. A fan-out stage (more than
//! one worker feeding the same output) does not: whichever worker finishes first
//! publishes first, so the merged order is unspecified and can differ between
//! runs.
//!
//! # Failures and cancellation
//!
//! A task failure (error or panic) removes that one item from the stream and
//! is recorded as a [`StageFailure`]; sibling items keep flowing. Every stage
//! maps one item to at most one item, so after a run each input is exactly one
//! of completed, failed or abandoned.

use crate::barrier::{DoneGuard, WaitGroup};
use crate::cancel::{CancellationToken, TokenState};
use crate::channel::BoundedChannel;
use crate::config::StageConfig;
use crate::task::{run_guarded, task_fn, Completion, TaskFn};
use conveyor_common::{err, Error, LoggingTransformer, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default capacity of the channel feeding the first stage
pub const DEFAULT_INPUT_CAPACITY: usize = 16;

/// One processing step
pub struct Stage<I, O> {
    name: Arc<str>,
    config: StageConfig,
    func: TaskFn<I, O>,
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Order-preserving single-worker stage
    pub fn new<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self {
            name: Arc::from(name),
            config: StageConfig::default(),
            func: task_fn(f),
        }
    }

    /// Stage with `workers` concurrent workers; output order is unspecified
    pub fn fan_out<F, Fut>(name: &str, workers: usize, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::new(name, f).with_workers(workers)
    }

    /// Set the worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the output channel capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Apply a full stage config
    #[must_use]
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }

    /// Stage name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, input: BoundedChannel<I>, run: &RunContext) -> Result<BoundedChannel<O>> {
        let output = BoundedChannel::new(self.config.capacity)?;
        let workers = WaitGroup::new();

        for worker in 0..self.config.workers {
            let guard = workers.guard()?;
            tokio::spawn(stage_worker(
                Arc::clone(&self.name),
                worker,
                Arc::clone(&self.func),
                input.clone(),
                output.clone(),
                run.clone(),
                guard,
            ));
        }

        let name = Arc::clone(&self.name);
        let closer = output.clone();
        tokio::spawn(async move {
            workers.wait().await;
            closer.close();
            debug!(stage = %name, "stage output closed");
        });

        Ok(output)
    }
}

async fn stage_worker<I, O>(
    stage: Arc<str>,
    worker: usize,
    func: TaskFn<I, O>,
    input: BoundedChannel<I>,
    output: BoundedChannel<O>,
    run: RunContext,
    _guard: DoneGuard,
) where
    I: Send + 'static,
    O: Send + 'static,
{
    loop {
        let item = match input.get_with(&run.token).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(error) => {
                debug!(%stage, worker, %error, "stage worker interrupted");
                break;
            }
        };

        match run_guarded(|| func(item)).await {
            Completion::Finished(Ok(value)) => {
                if let Err(error) = output.put_with(value, &run.token).await {
                    debug!(%stage, worker, %error, "stage output abandoned");
                    break;
                }
            }
            Completion::Finished(Err(error)) | Completion::Panicked(error) => {
                warn!(%stage, worker, %error, "stage task failed");
                run.record(&stage, error).await;
            }
        }
    }
}

/// A task failure recorded by a stage
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Stage that failed the item
    pub stage: String,
    /// The `TaskFailure`
    pub error: Error,
}

#[derive(Clone)]
struct RunContext {
    token: CancellationToken,
    failures: Arc<Mutex<Vec<StageFailure>>>,
}

impl RunContext {
    async fn record(&self, stage: &str, error: Error) {
        self.failures.lock().await.push(StageFailure {
            stage: stage.to_string(),
            error,
        });
    }
}

type Connector<I, O> =
    Arc<dyn Fn(BoundedChannel<I>, &RunContext) -> Result<BoundedChannel<O>> + Send + Sync>;

/// Ordered chain of stages from `I` to `O`
pub struct Pipeline<I, O> {
    connect: Connector<I, O>,
    stages: Vec<String>,
    input_capacity: usize,
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            connect: Arc::clone(&self.connect),
            stages: self.stages.clone(),
            input_capacity: self.input_capacity,
        }
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Pipeline made of a single stage
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the stage config is invalid.
    pub fn new(stage: Stage<I, O>) -> Result<Self> {
        stage.config.validate()?;
        let stages = vec![stage.name.to_string()];
        let connect: Connector<I, O> =
            Arc::new(move |input: BoundedChannel<I>, run: &RunContext| stage.spawn(input, run));
        Ok(Self {
            connect,
            stages,
            input_capacity: DEFAULT_INPUT_CAPACITY,
        })
    }

    /// Append a stage consuming this pipeline's output
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the stage config is invalid.
    pub fn then<P>(self, stage: Stage<O, P>) -> Result<Pipeline<I, P>>
    where
        P: Send + 'static,
    {
        stage.config.validate()?;
        let mut stages = self.stages;
        stages.push(stage.name.to_string());

        let upstream = self.connect;
        let connect: Connector<I, P> = Arc::new(move |input: BoundedChannel<I>, run: &RunContext| {
            let middle = upstream(input, run)?;
            stage.spawn(middle, run)
        });

        Ok(Pipeline {
            connect,
            stages,
            input_capacity: self.input_capacity,
        })
    }

    /// Set the capacity of the channel feeding the first stage
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `capacity` is zero.
    pub fn with_input_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(err!(configuration, "pipeline input capacity must be at least 1"));
        }
        self.input_capacity = capacity;
        Ok(self)
    }

    /// Stage names in execution order
    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Spawn every stage and return the two open ends
    ///
    /// The caller feeds [`PipelineHandle::input`] and must close it when done;
    /// [`PipelineHandle::output`] reports end-of-stream once everything drained.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when called outside a Tokio runtime.
    pub fn start(&self, token: &CancellationToken) -> Result<PipelineHandle<I, O>> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| err!(configuration, "pipeline needs a Tokio runtime: {}", e))?;

        let run = RunContext {
            token: token.child(),
            failures: Arc::new(Mutex::new(Vec::new())),
        };
        let input = BoundedChannel::new(self.input_capacity)?;
        let output = (self.connect)(input.clone(), &run)?;

        debug!(stages = ?self.stages, "pipeline started");
        Ok(PipelineHandle { input, output, run })
    }

    /// Feed `inputs`, collect every output and report the outcome
    ///
    /// # Errors
    ///
    /// Only construction errors; cancellation is reported in the outcome.
    pub async fn run<It>(&self, inputs: It) -> Result<PipelineOutcome<O>>
    where
        It: IntoIterator<Item = I>,
    {
        self.run_with(inputs, &CancellationToken::new()).await
    }

    /// [`Pipeline::run`] governed by `token`
    ///
    /// When the token fires, feeding stops, workers exit at their next
    /// suspension point and the outcome counts what was abandoned.
    ///
    /// # Errors
    ///
    /// Only construction errors; cancellation is reported in the outcome.
    pub async fn run_with<It>(
        &self,
        inputs: It,
        token: &CancellationToken,
    ) -> Result<PipelineOutcome<O>>
    where
        It: IntoIterator<Item = I>,
    {
        let inputs: Vec<I> = inputs.into_iter().collect();
        let total = inputs.len();
        let handle = self.start(token)?;

        let feed = handle.input.clone();
        let feed_token = handle.run.token.clone();
        let feeder = tokio::spawn(async move {
            let mut fed = 0usize;
            for item in inputs {
                if feed.put_with(item, &feed_token).await.is_err() {
                    break;
                }
                fed += 1;
            }
            feed.close();
            fed
        });

        let mut outputs = Vec::with_capacity(total);
        while let Some(output) = handle.output.get().await {
            outputs.push(output);
        }

        let fed = match feeder.await {
            Ok(fed) => fed,
            Err(error) => {
                LoggingTransformer::log_cleanup_warning("pipeline feeder", &error);
                0
            }
        };

        let failures = handle.failures().await;
        let settled = outputs.len() + failures.len();
        let abandoned = total.saturating_sub(settled);
        let status = if abandoned == 0 {
            RunStatus::Completed
        } else {
            match handle.run.token.state() {
                TokenState::Expired => RunStatus::DeadlineExceeded,
                _ => RunStatus::Cancelled,
            }
        };

        info!(
            stages = self.stages.len(),
            total,
            fed,
            completed = outputs.len(),
            failed = failures.len(),
            abandoned,
            ?status,
            "pipeline run finished"
        );

        Ok(PipelineOutcome {
            outputs,
            failures,
            total,
            abandoned,
            status,
        })
    }
}

/// The open ends of a running pipeline
pub struct PipelineHandle<I, O> {
    input: BoundedChannel<I>,
    output: BoundedChannel<O>,
    run: RunContext,
}

impl<I, O> PipelineHandle<I, O> {
    /// Channel feeding the first stage
    #[must_use]
    pub fn input(&self) -> &BoundedChannel<I> {
        &self.input
    }

    /// Channel fed by the last stage
    #[must_use]
    pub fn output(&self) -> &BoundedChannel<O> {
        &self.output
    }

    /// Token governing this run
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.run.token
    }

    /// Cancel this run only
    pub fn cancel(&self) {
        self.run.token.cancel();
    }

    /// Failures recorded so far
    pub async fn failures(&self) -> Vec<StageFailure> {
        self.run.failures.lock().await.clone()
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Every input completed or failed
    Completed,
    /// The run token was cancelled with inputs abandoned
    Cancelled,
    /// The run token's deadline passed with inputs abandoned
    DeadlineExceeded,
}

/// Result of [`Pipeline::run`]
#[derive(Debug)]
pub struct PipelineOutcome<O> {
    /// Outputs of the last stage, in arrival order
    pub outputs: Vec<O>,
    /// Items removed by a task failure
    pub failures: Vec<StageFailure>,
    /// Inputs offered to the run
    pub total: usize,
    /// Inputs neither completed nor failed
    pub abandoned: usize,
    /// Final status
    pub status: RunStatus,
}

impl<O> PipelineOutcome<O> {
    /// Number of outputs delivered
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outputs.len()
    }

    /// Number of items removed by a task failure
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Every input produced an output
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed && self.failures.is_empty()
    }

    /// Outputs, only if the run is complete
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` / `DeadlineExceeded` with completed and abandoned
    /// counts for an interrupted run, or `TaskFailure` if any item failed.
    pub fn into_result(self) -> Result<Vec<O>> {
        let summary = format!(
            "{} of {} completed, {} failed, {} abandoned",
            self.completed(),
            self.total,
            self.failed(),
            self.abandoned
        );

        match self.status {
            RunStatus::Cancelled => Err(Error::cancelled().context(summary)),
            RunStatus::DeadlineExceeded => Err(Error::deadline_exceeded().context(summary)),
            RunStatus::Completed => match self.failures.into_iter().next() {
                Some(first) => Err(first.error.context(format!("stage '{}': {summary}", first.stage))),
                None => Ok(self.outputs),
            },
        }
    }
}
