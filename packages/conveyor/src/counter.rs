//! Shared counters with two synchronization strategies
//!
//! [`MutexCounter`] serializes every access through a critical section.
//! [`AtomicCounter`] uses fetch-and-add and never blocks, but only protects a
//! single primitive value. Each instance uses exactly one discipline; the
//! types make mixing them on one value impossible.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Common contract of both strategies
pub trait SharedCounter: Send + Sync {
    /// Add one and return the new value
    fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Add `delta` (wrapping) and return the new value
    fn add(&self, delta: u64) -> u64;

    /// Current value
    fn read(&self) -> u64;

    /// Strategy backing this instance
    fn strategy(&self) -> CounterStrategy;
}

/// Selects a counter implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStrategy {
    /// Mutual exclusion around every read and write
    Mutex,
    /// Lock-free fetch-and-add
    #[default]
    Atomic,
}

impl CounterStrategy {
    /// Build a counter starting at zero
    #[must_use]
    pub fn build(self) -> Arc<dyn SharedCounter> {
        match self {
            Self::Mutex => Arc::new(MutexCounter::new()),
            Self::Atomic => Arc::new(AtomicCounter::new()),
        }
    }
}

/// Counter guarded by a mutex
#[derive(Debug, Default)]
pub struct MutexCounter {
    value: Mutex<u64>,
}

impl MutexCounter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCounter for MutexCounter {
    fn add(&self, delta: u64) -> u64 {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *value = value.wrapping_add(delta);
        *value
    }

    fn read(&self) -> u64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::Mutex
    }
}

/// Lock-free counter
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    /// Create a counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedCounter for AtomicCounter {
    fn add(&self, delta: u64) -> u64 {
        self.value.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta)
    }

    fn read(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn strategy(&self) -> CounterStrategy {
        CounterStrategy::Atomic
    }
}
