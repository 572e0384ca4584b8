//! Hierarchical cancellation tokens with optional deadlines
//!
//! A [`CancellationToken`] is a cheaply clonable handle on a shared signal.
//! Tokens form a tree: cancelling a token cancels every token derived from it,
//! and a token's deadline bounds the deadline of every descendant. Nothing
//! flows from a child back to its parent.
//!
//! Expiry is evaluated lazily against the token's deadline, so no timer task is
//! spawned per token. Waiters in [`CancellationToken::done`] race the shared
//! signal against a `sleep_until` on the deadline.

use conveyor_common::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken as Signal;

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Observable state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    /// Work is still wanted
    Active,
    /// Explicitly cancelled (directly or through an ancestor)
    Cancelled,
    /// The deadline elapsed before any cancellation
    Expired,
}

impl TokenState {
    /// The error a suspended operation reports for this state, if any
    #[must_use]
    pub fn error(self) -> Option<Error> {
        match self {
            Self::Active => None,
            Self::Cancelled => Some(Error::cancelled()),
            Self::Expired => Some(Error::deadline_exceeded()),
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            CANCELLED => Self::Cancelled,
            EXPIRED => Self::Expired,
            _ => Self::Active,
        }
    }
}

#[derive(Debug)]
struct TokenInner {
    signal: Signal,
    /// First terminal state observed; never changes once set
    state: AtomicU8,
    /// Instant of an explicit `cancel()` on this token
    cancelled_at: OnceLock<Instant>,
    /// Effective deadline, already clamped to the parent's
    deadline: Option<Instant>,
    parent: Option<CancellationToken>,
}

/// Shared, hierarchical cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a root token with no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::build(Signal::new(), None, None)
    }

    /// Create a root token that expires after `timeout`
    ///
    /// A timeout too large to represent as an instant means no deadline.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::build(Signal::new(), Instant::now().checked_add(timeout), None)
    }

    /// Derive a child that inherits the parent's deadline
    #[must_use]
    pub fn child(&self) -> Self {
        Self::build(
            self.inner.signal.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// Derive a child that expires at `deadline` or at the parent's deadline,
    /// whichever is earlier
    #[must_use]
    pub fn with_deadline(parent: &Self, deadline: Instant) -> Self {
        let deadline = match parent.deadline() {
            Some(inherited) if inherited < deadline => inherited,
            _ => deadline,
        };
        Self::build(
            parent.inner.signal.child_token(),
            Some(deadline),
            Some(parent.clone()),
        )
    }

    /// Derive a child that expires `timeout` from now
    ///
    /// A timeout too large to represent as an instant only inherits the
    /// parent's deadline.
    #[must_use]
    pub fn with_timeout(parent: &Self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(parent, deadline),
            None => parent.child(),
        }
    }

    /// Create a token from an optional parent and an optional timeout
    #[must_use]
    pub fn derive(parent: Option<&Self>, timeout: Option<Duration>) -> Self {
        match (parent, timeout) {
            (Some(parent), Some(timeout)) => Self::with_timeout(parent, timeout),
            (Some(parent), None) => parent.child(),
            (None, Some(timeout)) => Self::timeout(timeout),
            (None, None) => Self::new(),
        }
    }

    fn build(signal: Signal, deadline: Option<Instant>, parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                signal,
                state: AtomicU8::new(ACTIVE),
                cancelled_at: OnceLock::new(),
                deadline,
                parent,
            }),
        }
    }

    /// Cancel this token and every token derived from it
    ///
    /// Idempotent. A token whose deadline already passed stays `Expired`.
    pub fn cancel(&self) {
        if self.inner.cancelled_at.set(Instant::now()).is_ok() {
            tracing::debug!(deadline = ?self.inner.deadline, "cancellation token cancelled");
        }
        self.inner.signal.cancel();
    }

    /// Effective deadline, if any
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` without a deadline
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Current state, settling it on first observation of a transition
    #[must_use]
    pub fn state(&self) -> TokenState {
        let current = self.inner.state.load(Ordering::Acquire);
        if current != ACTIVE {
            return TokenState::decode(current);
        }

        let cancelled_at = if self.inner.signal.is_cancelled() {
            Some(self.earliest_cancel().unwrap_or_else(Instant::now))
        } else {
            None
        };

        let next = match (cancelled_at, self.inner.deadline) {
            (Some(cancelled), Some(deadline)) if deadline <= cancelled => EXPIRED,
            (Some(_), _) => CANCELLED,
            (None, Some(deadline)) if Instant::now() >= deadline => EXPIRED,
            _ => return TokenState::Active,
        };

        self.settle(next)
    }

    /// Record the first terminal state; later transitions are ignored
    fn settle(&self, next: u8) -> TokenState {
        match self
            .inner
            .state
            .compare_exchange(ACTIVE, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => TokenState::decode(next),
            Err(settled) => TokenState::decode(settled),
        }
    }

    /// Earliest explicit cancellation along the ancestor chain
    fn earliest_cancel(&self) -> Option<Instant> {
        let mut earliest = self.inner.cancelled_at.get().copied();
        let mut cursor = self.inner.parent.as_ref();
        while let Some(token) = cursor {
            if let Some(at) = token.inner.cancelled_at.get().copied() {
                earliest = Some(earliest.map_or(at, |current| current.min(at)));
            }
            cursor = token.inner.parent.as_ref();
        }
        earliest
    }

    /// Whether the token has left the `Active` state
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state() != TokenState::Active
    }

    /// Fail with `Cancelled` or `DeadlineExceeded` if the token has fired
    ///
    /// # Errors
    ///
    /// Returns the error matching the token's terminal state.
    pub fn check(&self) -> Result<()> {
        match self.state().error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Wait until the token is cancelled or expires
    ///
    /// Any number of tasks may wait concurrently. Resolves with the terminal
    /// state.
    pub async fn done(&self) -> TokenState {
        let timed_out = match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.signal.cancelled() => false,
                    () = tokio::time::sleep_until(deadline) => true,
                }
            }
            None => {
                self.inner.signal.cancelled().await;
                false
            }
        };

        match self.state() {
            TokenState::Active if timed_out => self.settle(EXPIRED),
            state => state,
        }
    }

    /// Race `fut` against this token
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the token fires first. The
    /// future is dropped at its current suspension point in that case.
    pub async fn run_until<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            state = self.done() => Err(state.error().unwrap_or_else(Error::cancelled)),
            output = fut => Ok(output),
        }
    }
}
