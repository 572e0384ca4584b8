//! Error constructors and accessors

use super::types::{Error, ErrorInner, ErrorKind};
use std::fmt;
use std::sync::Arc;

impl Error {
    /// Create a new error with the given kind
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            inner: Arc::new(ErrorInner {
                kind,
                context: None,
                source: None,
                #[cfg(feature = "full-backtrace")]
                backtrace: backtrace::Backtrace::new(),
            }),
        }
    }

    /// Create an error with a source error
    #[must_use]
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ErrorInner {
                kind,
                context: None,
                source: Some(Box::new(source)),
                #[cfg(feature = "full-backtrace")]
                backtrace: backtrace::Backtrace::new(),
            }),
        }
    }

    /// Add context to this error
    ///
    /// The kind is preserved. An existing context is kept as the source so
    /// nothing is lost when context is layered.
    #[must_use]
    pub fn context<C: fmt::Display>(self, context: C) -> Self {
        let source: Option<Box<dyn std::error::Error + Send + Sync>> =
            if self.inner.context.is_some() || self.inner.source.is_some() {
                Some(Box::new(self.clone()))
            } else {
                None
            };

        Self {
            inner: Arc::new(ErrorInner {
                kind: self.inner.kind,
                context: Some(context.to_string()),
                source,
                #[cfg(feature = "full-backtrace")]
                backtrace: backtrace::Backtrace::new(),
            }),
        }
    }

    /// Get the error kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    /// Get the error context if any
    #[must_use]
    pub fn get_context(&self) -> Option<&str> {
        self.inner.context.as_deref()
    }

    /// Whether this error has the given kind
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.inner.kind == kind
    }

    /// Get the backtrace
    #[cfg(feature = "full-backtrace")]
    #[must_use]
    pub fn backtrace(&self) -> &backtrace::Backtrace {
        &self.inner.backtrace
    }

    /// Create a channel closed error
    #[must_use]
    pub fn channel_closed() -> Self {
        Self::new(ErrorKind::ChannelClosed)
    }

    /// Create a cancelled error
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Create a deadline exceeded error
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded)
    }

    /// Create an invariant violation error
    #[must_use]
    pub fn invariant_violation() -> Self {
        Self::new(ErrorKind::InvariantViolation)
    }

    /// Create a task failure error
    #[must_use]
    pub fn task_failure() -> Self {
        Self::new(ErrorKind::TaskFailure)
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Wrap an arbitrary task error as a `TaskFailure`
    #[must_use]
    pub fn task<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::with_source(ErrorKind::TaskFailure, source)
    }

    /// Task failure carrying only a message
    pub fn task_msg<S: Into<String>>(msg: S) -> Self {
        Self::task_failure().context(msg.into())
    }
}
