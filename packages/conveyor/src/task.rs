//! Tasks, task identities and panic-isolated execution

use crate::cancel::CancellationToken;
use conveyor_common::{Error, ErrorKind, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future produced by a task function
pub type TaskFuture<O> = BoxFuture<'static, Result<O>>;

/// Shared task function mapping one input to one output or failure
pub type TaskFn<I, O> = Arc<dyn Fn(I) -> TaskFuture<O> + Send + Sync>;

/// Wrap an async closure as a [`TaskFn`]
pub fn task_fn<I, O, F, Fut>(f: F) -> TaskFn<I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

/// Identity assigned when a worker takes the task, increasing per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Raw sequence number
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Result of one task, tagged with its identity
///
/// A failure stays in `result`; it never affects sibling tasks.
#[derive(Debug)]
pub struct TaskOutput<O> {
    /// Task identity
    pub id: TaskId,
    /// Output or `TaskFailure`
    pub result: Result<O>,
}

impl<O> TaskOutput<O> {
    /// Whether the task produced an output
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// How a guarded task body ended
pub(crate) enum Completion<O> {
    /// The body returned, successfully or not
    Finished(Result<O>),
    /// The body panicked; carries a `TaskFailure`
    Panicked(Error),
}

/// Build and run a task body, converting a panic into a `TaskFailure`
///
/// Panics raised while building the future and while polling it are both
/// caught. An error returned by the body is reported as `TaskFailure` with
/// the original error as its source.
pub(crate) async fn run_guarded<O, F>(make: F) -> Completion<O>
where
    F: FnOnce() -> TaskFuture<O>,
{
    let future = match std::panic::catch_unwind(AssertUnwindSafe(make)) {
        Ok(future) => future,
        Err(payload) => return Completion::Panicked(panic_error(payload.as_ref())),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => Completion::Finished(result.map_err(task_failure)),
        Err(payload) => Completion::Panicked(panic_error(payload.as_ref())),
    }
}

/// Whatever a task body returns is its own failure, never a primitive's
fn task_failure(error: Error) -> Error {
    if error.is(ErrorKind::TaskFailure) {
        error
    } else {
        Error::with_source(ErrorKind::TaskFailure, error)
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Error::task_msg(format!("task panicked: {message}"))
}

/// Re-runnable async task without input, used by the bounded executor
pub struct AsyncTask<T> {
    inner: Arc<dyn Fn() -> TaskFuture<T> + Send + Sync>,
}

impl<T> Clone for AsyncTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> AsyncTask<T>
where
    T: Send + 'static,
{
    /// Create a task from a closure returning a future
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || Box::pin(f())),
        }
    }

    /// Execute the task
    ///
    /// # Errors
    ///
    /// Returns `TaskFailure` if the task returns an error or panics.
    pub async fn execute(&self) -> Result<T> {
        match run_guarded(|| (self.inner)()).await {
            Completion::Finished(result) => result,
            Completion::Panicked(error) => Err(error),
        }
    }

    /// Execute with a timeout
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` if the task does not finish within `duration`.
    pub async fn execute_with_timeout(&self, duration: Duration) -> Result<T> {
        match tokio::time::timeout(duration, self.execute()).await {
            Ok(result) => result,
            Err(_) => Err(Error::deadline_exceeded().context(format!("task exceeded {duration:?}"))),
        }
    }

    /// Execute unless `token` fires first
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the token fires first.
    pub async fn execute_with_cancellation(&self, token: &CancellationToken) -> Result<T> {
        token.run_until(self.execute()).await?
    }
}
