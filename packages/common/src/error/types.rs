//! Core error types and definitions

use std::sync::Arc;
use thiserror::Error;

/// Core error type with context propagation support
#[derive(Debug, Clone)]
pub struct Error {
    pub(super) inner: Arc<ErrorInner>,
}

#[derive(Debug)]
pub(super) struct ErrorInner {
    pub kind: ErrorKind,
    pub context: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    #[cfg(feature = "full-backtrace")]
    pub backtrace: backtrace::Backtrace,
}

/// Different kinds of errors the execution core reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Operation attempted on a closed channel
    #[error("Channel closed")]
    ChannelClosed,

    /// The governing cancellation token was explicitly cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The governing cancellation token's deadline elapsed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Misuse of barrier or semaphore counts
    #[error("Invariant violation")]
    InvariantViolation,

    /// A task's own function failed or panicked
    #[error("Task failed")]
    TaskFailure,

    /// Invalid construction parameters
    #[error("Configuration error")]
    Configuration,
}

impl ErrorKind {
    /// Whether this kind was produced by a fired cancellation token
    #[must_use]
    pub fn is_cancellation(self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;
