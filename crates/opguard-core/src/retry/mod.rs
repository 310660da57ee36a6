//! Retry engine and policies.
//!
//! [`RetryEngine::with_retry`] wraps an asynchronous action with a
//! category-specific [`RetryConfig`] taken from the [`PolicyTable`] and
//! merged with per-call [`RetryOverrides`]. Failures are classified, the
//! policy decides whether to retry, and retries happen on a timer inside a
//! driver task; callers only see the terminal outcome.

mod backoff;
mod driver;
mod engine;
mod error;
mod policy;
mod stats;

pub use backoff::{compute_delay, delay_schedule, FixedJitter, JitterSource, SeededJitter, ThreadRngJitter};
pub use engine::{registry_id, EngineOptions, RetryEngine};
pub use error::RetryError;
pub use policy::{
    MaxAttemptsCallback, PolicyTable, RetryCondition, RetryConfig, RetryDecision, RetryOverrides,
    StopReason,
};
pub use stats::{PendingRetry, RetryStats};
