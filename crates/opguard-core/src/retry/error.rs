//! Terminal errors returned to callers of the retry engine.

use thiserror::Error;

use crate::classify::ErrorRecord;

/// Why a retried operation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The last attempt failed and no further attempt will be made, either
    /// because the error is not retryable or because attempts ran out.
    #[error("{label} failed after {attempts} attempt(s): {record}")]
    Failed {
        label: String,
        record: ErrorRecord,
        attempts: u32,
    },
    /// The sequence was cancelled before reaching a terminal state.
    #[error("operation {id} was cancelled")]
    OperationCancelled { id: String },
    /// A caller joined an in-flight sequence expecting a different result type.
    #[error("operation {id} is already running with a different result type")]
    ResultTypeMismatch { id: String },
    /// The driver task ended without an outcome (the action panicked).
    #[error("retry driver for {id} stopped unexpectedly")]
    DriverLost { id: String },
}

impl RetryError {
    /// The classified failure, when there is one.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            RetryError::Failed { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Failed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::OperationCancelled { .. })
    }
}
