//! Configuration for pools, pipeline stages and executors
//!
//! Every struct deserializes with serde defaults, so a partial document is
//! enough. Durations are expressed in milliseconds. Reading configuration from
//! files or the environment is left to the embedding application.

use crate::counter::CounterStrategy;
use conveyor_common::{err, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// What a worker does after its task panicked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Report the panic as a task failure and keep the same worker looping
    #[default]
    Continue,
    /// Report the panic and replace the worker with a fresh one
    Restart,
    /// Report the panic, mark the pool degraded and retire the worker
    Degrade,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Name used in log events
    #[serde(default = "default_pool_name")]
    pub name: String,
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the task queue
    #[serde(default = "default_capacity")]
    pub input_capacity: usize,
    /// Capacity of the result queue
    #[serde(default = "default_capacity")]
    pub output_capacity: usize,
    /// Reaction to a panicking task
    #[serde(default)]
    pub panic_policy: PanicPolicy,
}

fn default_pool_name() -> String {
    "pool".to_string()
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

fn default_capacity() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: default_pool_name(),
            workers: default_workers(),
            input_capacity: default_capacity(),
            output_capacity: default_capacity(),
            panic_policy: PanicPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Default settings with an explicit worker count
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Set the pool name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set both queue capacities
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self.output_capacity = capacity;
        self
    }

    /// Set the panic policy
    #[must_use]
    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    /// Check the settings
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a zero worker count or a zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(err!(configuration, "pool '{}' needs at least one worker", self.name));
        }
        if self.input_capacity == 0 || self.output_capacity == 0 {
            return Err(err!(configuration, "pool '{}' queue capacity must be at least 1", self.name));
        }
        Ok(())
    }
}

/// Pipeline stage settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Workers draining the stage input; more than one fans out
    #[serde(default = "default_stage_workers")]
    pub workers: usize,
    /// Capacity of the stage output channel
    #[serde(default = "default_stage_capacity")]
    pub capacity: usize,
}

fn default_stage_workers() -> usize {
    1
}

fn default_stage_capacity() -> usize {
    16
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            workers: default_stage_workers(),
            capacity: default_stage_capacity(),
        }
    }
}

impl StageConfig {
    /// Check the settings
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a zero worker count or capacity.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(err!(configuration, "stage needs at least one worker"));
        }
        if self.capacity == 0 {
            return Err(err!(configuration, "stage capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Bounded executor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Tasks allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Per-task timeout
    #[serde(default, rename = "task_timeout_ms", with = "millis")]
    pub task_timeout: Option<Duration>,
    /// Collect execution metrics
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_max_concurrent() -> usize {
    100
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            task_timeout: None,
            enable_metrics: false,
        }
    }
}

impl ExecutorConfig {
    /// Check the settings
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `max_concurrent_tasks` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(err!(configuration, "executor needs max_concurrent_tasks >= 1"));
        }
        Ok(())
    }
}

/// All settings for one embedding application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,
    /// Defaults for pipeline stages
    #[serde(default)]
    pub stage: StageConfig,
    /// Bounded executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Strategy for shared counters
    #[serde(default)]
    pub counter: CounterStrategy,
}

impl CoreConfig {
    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first `Configuration` error found.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.stage.validate()?;
        self.executor.validate()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value
            .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
