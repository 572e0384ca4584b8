//! Common infrastructure for the conveyor workspace
//!
//! This crate provides the pieces shared by every conveyor crate:
//! - Error handling with context propagation
//! - Logging bootstrap on top of `env_logger`

pub mod error;
pub mod logging;

pub use error::*;
pub use logging::LoggingTransformer;
