//! Resilient operation execution: error classification, operation/progress
//! tracking and category-specific retry.

pub mod classify;
pub mod config;
pub mod executor;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod retry;

pub use classify::{classify, ErrorCategory, ErrorRecord, RawError, Severity};
pub use executor::{ExecutorBuilder, OperationExecutor};
pub use retry::{RetryError, RetryOverrides};
