//! Error handling with context propagation
//!
//! Every primitive in the execution core reports failures through one
//! [`Error`] type carrying an [`ErrorKind`], an optional context string and an
//! optional source error. Errors are cheap to clone so a single task failure can
//! be both logged and delivered in the task's result slot.

pub mod constructors;
pub mod display;
pub mod macros;
pub mod types;

pub use types::{Error, ErrorKind, Result};
