//! Structured logging bootstrap
//!
//! Library code emits `tracing` events. The `tracing` crate is built with its
//! `log` feature, so without a tracing subscriber every event is forwarded to
//! the `log` facade and rendered by `env_logger`.

use log::{info, warn};
use std::sync::Once;
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

/// Logging infrastructure using `env_logger`
pub struct LoggingTransformer;

impl LoggingTransformer {
    /// Initialize logging (call once at application startup)
    ///
    /// Configure levels via `RUST_LOG`:
    /// - `RUST_LOG=info` - pool and pipeline lifecycle
    /// - `RUST_LOG=debug` - per-task detail
    /// - `RUST_LOG=conveyor::pool=debug,conveyor::pipeline=info` - per module
    pub fn init() {
        INIT_LOGGER.call_once(|| {
            env_logger::Builder::from_default_env()
                .format_timestamp_micros()
                .init();

            info!("Structured logging initialized");
        });
    }

    /// Initialize logging for test environments
    ///
    /// Safe to call from every test; only the first call installs the logger.
    pub fn init_test() {
        let _ = env_logger::Builder::from_default_env()
            .is_test(true)
            .try_init();
    }

    /// Log a component shutdown that took longer than expected
    pub fn log_slow_shutdown(component: &str, elapsed: Duration, budget: Duration) {
        if elapsed > budget {
            warn!("{component} shutdown took {elapsed:?} (budget {budget:?})");
        }
    }

    /// Log a cleanup failure without aborting the caller
    pub fn log_cleanup_warning(component: &str, error: &dyn std::error::Error) {
        warn!("Component cleanup failed: {component}: {error}");
    }
}
