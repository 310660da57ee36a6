//! Retry engine snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::classify::{ErrorCategory, ErrorRecord};

/// Point-in-time counters and gauges for the retry engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Sequences currently attempting or waiting to retry.
    pub active: usize,
    /// Sequences currently waiting on a backoff timer.
    pub scheduled: usize,
    /// Sequences ever started (joins are not counted).
    pub started: u64,
    /// Sequences that succeeded on their first execution.
    pub first_try_successes: u64,
    /// Sequences that succeeded after at least one failure.
    pub successful_retries: u64,
    /// Sequences that failed after at least one retry.
    pub failed_retries: u64,
    /// Sequences that failed on their first execution without retrying.
    pub immediate_failures: u64,
    pub cancelled: u64,
    /// Executions of wrapped actions across all sequences.
    pub attempts_executed: u64,
    /// Active sequences per category.
    pub by_category: BTreeMap<ErrorCategory, usize>,
}

/// A sequence currently waiting to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRetry {
    pub id: String,
    pub label: String,
    pub category: ErrorCategory,
    /// Failed executions so far.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(serialize_with = "as_millis")]
    pub time_until_retry: Duration,
    pub last_error: Option<ErrorRecord>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
