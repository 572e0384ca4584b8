//! Bounded concurrency limiter (counting admission gate)
//!
//! Backed by `tokio::sync::Semaphore`, which queues waiters in FIFO order, so
//! a released permit always goes to the longest-waiting `acquire`.
//!
//! Two disciplines are offered:
//! - scoped: [`Limiter::acquire`] returns a [`Permit`] that releases on drop,
//!   covering normal return, error and cancellation paths alike;
//! - manual: [`Limiter::acquire_detached`] / [`Limiter::release`], where a
//!   `release` without an outstanding detached acquire is an
//!   `InvariantViolation`.

use crate::cancel::CancellationToken;
use conveyor_common::{err, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Scoped permit; dropping it releases the slot
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct Permit {
    inner: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct LimiterInner {
    semaphore: Arc<Semaphore>,
    max: usize,
    detached: AtomicUsize,
}

/// Caps the number of simultaneously in-flight operations
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

impl Limiter {
    /// Create a limiter admitting at most `max` concurrent holders
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `max` is zero or exceeds the semaphore limit.
    pub fn new(max: usize) -> Result<Self> {
        if max == 0 {
            return Err(err!(configuration, "limiter max must be at least 1"));
        }
        if max > Semaphore::MAX_PERMITS {
            return Err(err!(
                configuration,
                "limiter max {} exceeds {}",
                max,
                Semaphore::MAX_PERMITS
            ));
        }

        Ok(Self {
            inner: Arc::new(LimiterInner {
                semaphore: Arc::new(Semaphore::new(max)),
                max,
                detached: AtomicUsize::new(0),
            }),
        })
    }

    /// Configured maximum
    #[must_use]
    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Permits currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Permits currently held
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.max - self.available()
    }

    /// Wait for a slot and reserve it
    ///
    /// # Errors
    ///
    /// Only fails if the underlying semaphore was closed, which this type never
    /// does; reported as `InvariantViolation`.
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| err!(invariant_violation, "limiter semaphore closed"))?;
        Ok(Permit { inner: permit })
    }

    /// Wait for a slot unless `token` fires first
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the token fires while waiting.
    pub async fn acquire_with(&self, token: &CancellationToken) -> Result<Permit> {
        token.run_until(self.acquire()).await?
    }

    /// Reserve a slot only if one is free right now
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { inner: permit })
    }

    /// Reserve a slot that must be returned with [`Limiter::release`]
    ///
    /// # Errors
    ///
    /// Same as [`Limiter::acquire`].
    pub async fn acquire_detached(&self) -> Result<()> {
        let permit = self.acquire().await?;
        permit.inner.forget();
        self.inner.detached.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Return a slot reserved with [`Limiter::acquire_detached`]
    ///
    /// Wakes at most one waiter.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no detached acquire is outstanding.
    pub fn release(&self) -> Result<()> {
        self.inner
            .detached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            })
            .map_err(|_| err!(invariant_violation, "release without matching acquire"))?;
        self.inner.semaphore.add_permits(1);
        Ok(())
    }

    /// Run `fut` while holding a permit
    ///
    /// # Errors
    ///
    /// Same as [`Limiter::acquire`]; the future's own output is returned as is.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }

    /// Run `fut` while holding a permit, abandoning the wait if `token` fires
    ///
    /// # Errors
    ///
    /// Same as [`Limiter::acquire_with`].
    pub async fn run_with<F>(&self, fut: F, token: &CancellationToken) -> Result<F::Output>
    where
        F: Future,
    {
        let _permit = self.acquire_with(token).await?;
        Ok(fut.await)
    }
}
