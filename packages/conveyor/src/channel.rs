//! Bounded multi-producer multi-consumer FIFO channel
//!
//! [`BoundedChannel`] is the hand-off primitive everything else composes on.
//! Handles are cheap clones of one shared queue, so any number of producers
//! and consumers may hold it. Closing is explicit: dropping handles never
//! closes the channel.
//!
//! Suspension points are `put` while full and `get` while empty. Both have
//! token-aware variants that return `Cancelled` / `DeadlineExceeded` once the
//! token fires instead of waiting forever.

use crate::cancel::CancellationToken;
use conveyor_common::{err, Error, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Error returned by [`BoundedChannel::try_put`], handing the item back
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TryPutError<T> {
    /// The channel is at capacity
    #[error("channel full")]
    Full(T),
    /// The channel has been closed
    #[error("channel closed")]
    Closed(T),
}

impl<T> TryPutError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

/// Error returned by [`BoundedChannel::try_get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryGetError {
    /// Nothing buffered right now
    #[error("channel empty")]
    Empty,
    /// Closed and fully drained
    #[error("channel closed")]
    Closed,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Critical sections never panic while mutating, so a poisoned lock
        // still guards a consistent queue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity FIFO queue with blocking put/get semantics
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(err!(configuration, "channel capacity must be at least 1"));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                capacity,
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        })
    }

    /// Maximum number of buffered items
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of items currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Whether no items are buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().buffer.is_empty()
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Close the channel
    ///
    /// Never blocks. Buffered items remain retrievable. Returns `true` only for
    /// the call that actually closed the channel; later calls are no-ops.
    pub fn close(&self) -> bool {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
        }

        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();
        true
    }

    /// Enqueue without waiting
    ///
    /// # Errors
    ///
    /// Hands the item back as `Full` or `Closed`.
    pub fn try_put(&self, item: T) -> std::result::Result<(), TryPutError<T>> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(TryPutError::Closed(item));
            }
            if state.buffer.len() >= self.shared.capacity {
                return Err(TryPutError::Full(item));
            }
            state.buffer.push_back(item);
        }
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue without waiting
    ///
    /// # Errors
    ///
    /// Returns `Empty` when nothing is buffered, `Closed` once closed and drained.
    pub fn try_get(&self) -> std::result::Result<T, TryGetError> {
        let item = {
            let mut state = self.shared.lock();
            match state.buffer.pop_front() {
                Some(item) => item,
                None if state.closed => return Err(TryGetError::Closed),
                None => return Err(TryGetError::Empty),
            }
        };
        self.shared.not_full.notify_one();
        Ok(item)
    }

    /// Remove every buffered item without waiting
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.shared.lock().buffer.drain(..).collect();
        if !items.is_empty() {
            self.shared.not_full.notify_waiters();
        }
        items
    }

    /// Enqueue, waiting while the channel is full
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` if the channel is closed before the item is
    /// accepted. The item is dropped in that case.
    pub async fn put(&self, item: T) -> Result<()> {
        self.put_inner(item, None).await
    }

    /// Enqueue, giving up when `token` fires
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed`, `Cancelled` or `DeadlineExceeded`.
    pub async fn put_with(&self, item: T, token: &CancellationToken) -> Result<()> {
        self.put_inner(item, Some(token)).await
    }

    /// Dequeue, waiting while the channel is empty and open
    ///
    /// Returns `None` once the channel is closed and every item was taken.
    pub async fn get(&self) -> Option<T> {
        match self.get_inner(None).await {
            Ok(item) => item,
            // Without a token the only exit is an item or end-of-stream.
            Err(_) => None,
        }
    }

    /// Dequeue, giving up when `token` fires
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` once the token fires, even if
    /// items are still buffered.
    pub async fn get_with(&self, token: &CancellationToken) -> Result<Option<T>> {
        self.get_inner(Some(token)).await
    }

    async fn put_inner(&self, item: T, token: Option<&CancellationToken>) -> Result<()> {
        loop {
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent get or close
            // cannot slip between the check and the wait.
            notified.as_mut().enable();

            if let Some(token) = token {
                token.check()?;
            }

            {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(Error::channel_closed());
                }
                if state.buffer.len() < self.shared.capacity {
                    state.buffer.push_back(item);
                    drop(state);
                    self.shared.not_empty.notify_one();
                    return Ok(());
                }
            }

            Self::suspend(notified, token).await?;
        }
    }

    async fn get_inner(&self, token: Option<&CancellationToken>) -> Result<Option<T>> {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = token {
                token.check()?;
            }

            {
                let mut state = self.shared.lock();
                if let Some(item) = state.buffer.pop_front() {
                    drop(state);
                    self.shared.not_full.notify_one();
                    return Ok(Some(item));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            Self::suspend(notified, token).await?;
        }
    }

    async fn suspend(
        notified: std::pin::Pin<&mut Notified<'_>>,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        match token {
            Some(token) => tokio::select! {
                biased;
                state = token.done() => Err(state.error().unwrap_or_else(Error::cancelled)),
                () = notified => Ok(()),
            },
            None => {
                notified.await;
                Ok(())
            }
        }
    }
}
