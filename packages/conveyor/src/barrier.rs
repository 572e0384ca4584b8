//! Wait barrier over a known set of completions

use crate::cancel::CancellationToken;
use conveyor_common::{err, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
struct WaitGroupInner {
    count: watch::Sender<usize>,
    released: AtomicBool,
}

/// Blocks waiters until every registered unit has called `done`
///
/// Registering more work after a `wait` has returned, or calling `done` more
/// often than units were added, is reported as `InvariantViolation`.
#[derive(Debug, Clone)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    /// Create an empty barrier
    #[must_use]
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(WaitGroupInner {
                count,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Register `n` expected completions
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if a `wait` already returned or the count
    /// would overflow.
    pub fn add(&self, n: usize) -> Result<()> {
        if self.inner.released.load(Ordering::Acquire) {
            return Err(err!(invariant_violation, "add after wait returned"));
        }

        let mut overflow = false;
        self.inner.count.send_if_modified(|count| match count.checked_add(n) {
            Some(next) => {
                *count = next;
                n > 0
            }
            None => {
                overflow = true;
                false
            }
        });

        if overflow {
            return Err(err!(invariant_violation, "wait group counter overflow"));
        }
        Ok(())
    }

    /// Signal one completion
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no completion is outstanding.
    pub fn done(&self) -> Result<()> {
        let mut underflow = false;
        self.inner.count.send_if_modified(|count| {
            if *count == 0 {
                underflow = true;
                false
            } else {
                *count -= 1;
                true
            }
        });

        if underflow {
            return Err(err!(invariant_violation, "done called more times than add"));
        }
        Ok(())
    }

    /// Completions still outstanding
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.inner.count.borrow()
    }

    /// Wait until the count reaches zero
    pub async fn wait(&self) {
        let mut count = self.inner.count.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = count.wait_for(|pending| *pending == 0).await;
        self.inner.released.store(true, Ordering::Release);
    }

    /// Wait until the count reaches zero unless `token` fires first
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the token fires first.
    pub async fn wait_with(&self, token: &CancellationToken) -> Result<()> {
        token.run_until(self.wait()).await
    }

    /// Register one unit and return a guard that completes it on drop
    ///
    /// # Errors
    ///
    /// Same as [`WaitGroup::add`].
    pub fn guard(&self) -> Result<DoneGuard> {
        self.add(1)?;
        Ok(DoneGuard {
            group: self.clone(),
        })
    }
}

/// Calls [`WaitGroup::done`] when dropped, on every exit path
#[derive(Debug)]
#[must_use = "dropping the guard signals completion immediately"]
pub struct DoneGuard {
    group: WaitGroup,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if let Err(error) = self.group.done() {
            tracing::warn!(%error, "wait group guard released twice");
        }
    }
}
