//! # Conveyor
//!
//! In-process concurrent task execution built from a few composable
//! primitives:
//!
//! - [`BoundedChannel`]: fixed-capacity FIFO with blocking put/get
//! - [`CancellationToken`]: hierarchical cancellation with deadlines
//! - [`WorkerPool`]: fixed workers between an input and an output channel
//! - [`Pipeline`]: stages chained through bounded channels
//! - [`Limiter`]: admission gate capping in-flight operations
//! - [`WaitGroup`]: barrier over a known number of completions
//! - [`MutexCounter`] / [`AtomicCounter`]: shared counters
//!
//! Every suspension point (channel put/get, limiter acquire, barrier wait,
//! token wait) has a variant taking a [`CancellationToken`] that returns
//! `Cancelled` or `DeadlineExceeded` instead of waiting forever. Cancellation
//! is cooperative: a running task body is never interrupted.
//!
//! ```no_run
//! use conveyor::{PoolConfig, WorkerPool};
//!
//! # async fn demo() -> conveyor::Result<()> {
//! let pool = WorkerPool::start(PoolConfig::with_workers(3), |x: u64| async move { Ok(x * x) })?;
//! let results = pool.results();
//! let collector = tokio::spawn(async move {
//!     let mut squares = Vec::new();
//!     while let Some(output) = results.get().await {
//!         squares.extend(output.result);
//!     }
//!     squares
//! });
//! for x in 1..=5 {
//!     pool.submit(x).await?;
//! }
//! pool.shutdown().await;
//! # let _ = collector.await;
//! # Ok(())
//! # }
//! ```

pub mod barrier;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod counter;
pub mod executor;
pub mod limiter;
pub mod patterns;
pub mod pipeline;
pub mod pool;
pub mod task;

pub use barrier::{DoneGuard, WaitGroup};
pub use cancel::{CancellationToken, TokenState};
pub use channel::{BoundedChannel, TryGetError, TryPutError};
pub use config::{CoreConfig, ExecutorConfig, PanicPolicy, PoolConfig, StageConfig};
pub use counter::{AtomicCounter, CounterStrategy, MutexCounter, SharedCounter};
pub use executor::{BoundedExecutor, ExecutorMetrics};
pub use limiter::{Limiter, Permit};
pub use patterns::{consume, generate, merge};
pub use pipeline::{Pipeline, PipelineHandle, PipelineOutcome, RunStatus, Stage, StageFailure};
pub use pool::{PoolStats, WorkerPool};
pub use task::{task_fn, AsyncTask, TaskFn, TaskFuture, TaskId, TaskOutput};

pub use conveyor_common::{Error, ErrorKind, Result};
