//! Retry engine: owns every in-flight retry sequence and its timer.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classify::{ErrorCategory, ErrorRecord, RawError};
use crate::notify::Notifier;
use crate::registry::{OperationRegistry, StartOptions};

use super::backoff::{JitterSource, ThreadRngJitter};
use super::driver::drive;
use super::error::RetryError;
use super::policy::{PolicyTable, RetryOverrides};
use super::stats::{PendingRetry, RetryStats};

/// Outcome shared by every caller attached to one sequence.
pub(super) type SharedOutcome = Result<Arc<dyn Any + Send + Sync>, RetryError>;
pub(super) type OutcomeSender = watch::Sender<Option<SharedOutcome>>;

/// Registry id under which a retry sequence is tracked.
pub fn registry_id(id: &str) -> String {
    format!("retry:{id}")
}

/// Toast durations for the notifications the engine emits.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub retry_toast: Duration,
    pub recovered_toast: Duration,
    pub error_toast: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry_toast: Duration::from_secs(3),
            recovered_toast: Duration::from_secs(3),
            error_toast: Duration::from_secs(5),
        }
    }
}

pub(super) struct Sequence {
    seq: u64,
    label: String,
    category: ErrorCategory,
    max_attempts: u32,
    attempts: u32,
    last_error: Option<ErrorRecord>,
    next_retry_at: Option<Instant>,
    outcome: OutcomeSender,
    driver: Option<JoinHandle<()>>,
}

/// How a sequence ended, for the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Conclusion {
    FirstTry,
    Recovered,
    Failed { attempts: u32 },
    Lost,
}

#[derive(Debug, Default)]
struct Counters {
    started: u64,
    first_try_successes: u64,
    successful_retries: u64,
    failed_retries: u64,
    immediate_failures: u64,
    cancelled: u64,
    attempts_executed: u64,
}

#[derive(Default)]
struct State {
    sequences: HashMap<String, Sequence>,
    counters: Counters,
}

pub(super) struct EngineInner {
    state: Mutex<State>,
    next_seq: AtomicU64,
    pub(super) registry: OperationRegistry,
    pub(super) notifier: Notifier,
    policies: PolicyTable,
    pub(super) jitter: Arc<dyn JitterSource>,
    pub(super) options: EngineOptions,
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the start of an execution. Returns false if the sequence was
    /// cancelled (or replaced) in the meantime.
    pub(super) fn begin_attempt(&self, id: &str, seq: u64, registry_label: String) -> bool {
        let mut state = self.lock();
        let Some(s) = state.sequences.get_mut(id).filter(|s| s.seq == seq) else {
            return false;
        };
        s.next_retry_at = None;
        let category = s.category;
        state.counters.attempts_executed += 1;
        self.track(id, registry_label, category);
        true
    }

    /// Record a failed execution that will be retried at `at`.
    pub(super) fn schedule_retry(
        &self,
        id: &str,
        seq: u64,
        attempts: u32,
        error: &ErrorRecord,
        at: Instant,
        registry_label: String,
    ) -> bool {
        let mut state = self.lock();
        let Some(s) = state.sequences.get_mut(id).filter(|s| s.seq == seq) else {
            return false;
        };
        s.attempts = attempts;
        s.last_error = Some(error.clone());
        s.next_retry_at = Some(at);
        let category = s.category;
        self.track(id, registry_label, category);
        true
    }

    /// One registry incarnation per sequence: later attempts only relabel it.
    fn track(&self, id: &str, label: String, category: ErrorCategory) {
        let rid = registry_id(id);
        if !self.registry.relabel(&rid, label.clone()) {
            self.registry.start(rid, StartOptions::new(label, category));
        }
    }

    /// Record the final failed execution before concluding.
    pub(super) fn record_failure(&self, id: &str, seq: u64, attempts: u32, error: &ErrorRecord) {
        let mut state = self.lock();
        if let Some(s) = state.sequences.get_mut(id).filter(|s| s.seq == seq) {
            s.attempts = attempts;
            s.last_error = Some(error.clone());
            s.next_retry_at = None;
        }
    }

    /// Remove the sequence if it is still the current one for `id`, stop its
    /// tracked operation, and hand back the outcome sender. `None` means
    /// somebody else (cancel) already settled it.
    pub(super) fn conclude(&self, id: &str, seq: u64, how: Conclusion) -> Option<OutcomeSender> {
        let mut state = self.lock();
        if !matches!(state.sequences.get(id), Some(s) if s.seq == seq) {
            return None;
        }
        let s = state.sequences.remove(id)?;
        let c = &mut state.counters;
        match how {
            Conclusion::FirstTry => c.first_try_successes += 1,
            Conclusion::Recovered => c.successful_retries += 1,
            Conclusion::Failed { attempts } if attempts > 1 => c.failed_retries += 1,
            Conclusion::Failed { .. } => c.immediate_failures += 1,
            Conclusion::Lost => {}
        }
        self.registry.stop(&registry_id(id));
        Some(s.outcome)
    }
}

/// Executes actions under category retry policies.
///
/// Cloning is cheap; clones share sequences, counters and the registry.
#[derive(Clone)]
pub struct RetryEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine")
            .field("active", &self.inner.lock().sequences.len())
            .finish()
    }
}

impl RetryEngine {
    /// Engine with the built-in policy table and random jitter.
    pub fn new(registry: OperationRegistry, notifier: Notifier) -> Self {
        Self::with_config(
            registry,
            notifier,
            PolicyTable::default(),
            Arc::new(ThreadRngJitter),
            EngineOptions::default(),
        )
    }

    pub fn with_config(
        registry: OperationRegistry,
        notifier: Notifier,
        policies: PolicyTable,
        jitter: Arc<dyn JitterSource>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(State::default()),
                next_seq: AtomicU64::new(0),
                registry,
                notifier,
                policies,
                jitter,
                options,
            }),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.inner.policies
    }

    /// Run `action` until it succeeds or the policy gives up.
    ///
    /// The policy is the category's entry in the policy table merged with
    /// `overrides`, resolved once for the whole sequence. Retries happen on
    /// a timer inside a driver task; the returned future settles only in a
    /// terminal state (success, failure, cancellation).
    ///
    /// A call whose `id` already has a sequence in flight does not start a
    /// second one: it attaches to the existing sequence and receives its
    /// outcome. `label`, `category`, `overrides` and `action` of the joining
    /// call are ignored.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_retry<T, E, F, Fut>(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
        category: ErrorCategory,
        overrides: RetryOverrides,
        action: F,
    ) -> Result<T, RetryError>
    where
        T: Clone + Send + Sync + 'static,
        E: Into<RawError> + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = id.into();
        let mut rx = {
            let mut state = self.inner.lock();
            if let Some(existing) = state.sequences.get(&id) {
                tracing::debug!(id = %id, "joining in-flight retry sequence");
                existing.outcome.subscribe()
            } else {
                let label = label.into();
                let config = self.inner.policies.resolve(category, &overrides);
                let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
                let (tx, rx) = watch::channel(None);
                state.sequences.insert(
                    id.clone(),
                    Sequence {
                        seq,
                        label: label.clone(),
                        category,
                        max_attempts: config.max_attempts,
                        attempts: 0,
                        last_error: None,
                        next_retry_at: None,
                        outcome: tx,
                        driver: None,
                    },
                );
                state.counters.started += 1;
                tracing::debug!(id = %id, %category, max_attempts = config.max_attempts, "retry sequence started");

                let driver = tokio::spawn(drive(
                    Arc::clone(&self.inner),
                    id.clone(),
                    seq,
                    label,
                    config,
                    overrides,
                    action,
                ));
                if let Some(s) = state.sequences.get_mut(&id) {
                    s.driver = Some(driver);
                }
                rx
            }
        };

        let outcome = loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                break outcome;
            }
            if rx.changed().await.is_err() {
                break rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| Err(RetryError::DriverLost { id: id.clone() }));
            }
        };

        let value = outcome?;
        value
            .downcast::<T>()
            .map(|v| (*v).clone())
            .map_err(|_| RetryError::ResultTypeMismatch { id })
    }

    /// Cancel a sequence: stop its timer and driver, stop its tracked
    /// operation, and settle every attached caller with
    /// [`RetryError::OperationCancelled`]. Returns false if `id` is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            let Some(s) = state.sequences.remove(id) else {
                return false;
            };
            state.counters.cancelled += 1;
            self.inner.registry.stop(&registry_id(id));
            s
        };
        if let Some(driver) = &removed.driver {
            driver.abort();
        }
        removed
            .outcome
            .send_replace(Some(Err(RetryError::OperationCancelled { id: id.to_string() })));
        tracing::info!(id, attempts = removed.attempts, "retry sequence cancelled");
        true
    }

    /// Cancel every sequence. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.inner.lock().sequences.keys().cloned().collect();
        let n = ids.iter().filter(|id| self.cancel(id)).count();
        if n > 0 {
            tracing::info!(count = n, "cancelled all retry sequences");
        }
        n
    }

    /// True while `id` waits on a backoff timer.
    pub fn is_retrying(&self, id: &str) -> bool {
        self.inner
            .lock()
            .sequences
            .get(id)
            .is_some_and(|s| s.next_retry_at.is_some())
    }

    /// True while `id` has a sequence in flight (attempting or waiting).
    pub fn is_tracked(&self, id: &str) -> bool {
        self.inner.lock().sequences.contains_key(id)
    }

    /// Time left before the next attempt of `id`, if it is waiting.
    pub fn time_until_retry(&self, id: &str) -> Option<Duration> {
        let at = self.inner.lock().sequences.get(id)?.next_retry_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    /// Failed executions so far for an in-flight sequence.
    pub fn attempts(&self, id: &str) -> Option<u32> {
        self.inner.lock().sequences.get(id).map(|s| s.attempts)
    }

    /// Sequences waiting to retry, soonest first.
    pub fn pending_retries(&self) -> Vec<PendingRetry> {
        let now = Instant::now();
        let state = self.inner.lock();
        let mut pending: Vec<(Instant, PendingRetry)> = state
            .sequences
            .iter()
            .filter_map(|(id, s)| {
                let at = s.next_retry_at?;
                Some((
                    at,
                    PendingRetry {
                        id: id.clone(),
                        label: s.label.clone(),
                        category: s.category,
                        attempts: s.attempts,
                        max_attempts: s.max_attempts,
                        time_until_retry: at.saturating_duration_since(now),
                        last_error: s.last_error.clone(),
                    },
                ))
            })
            .collect();
        pending.sort_by_key(|(at, _)| *at);
        pending.into_iter().map(|(_, p)| p).collect()
    }

    pub fn stats(&self) -> RetryStats {
        let state = self.inner.lock();
        let c = &state.counters;
        let mut by_category = std::collections::BTreeMap::new();
        for s in state.sequences.values() {
            *by_category.entry(s.category).or_insert(0) += 1;
        }
        RetryStats {
            active: state.sequences.len(),
            scheduled: state
                .sequences
                .values()
                .filter(|s| s.next_retry_at.is_some())
                .count(),
            started: c.started,
            first_try_successes: c.first_try_successes,
            successful_retries: c.successful_retries,
            failed_retries: c.failed_retries,
            immediate_failures: c.immediate_failures,
            cancelled: c.cancelled,
            attempts_executed: c.attempts_executed,
            by_category,
        }
    }
}
