//! Driver task: runs one retry sequence from first attempt to terminal state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::classify::{classify, error_notification, ErrorRecord, RawError, ReportOptions};
use crate::notify::{Notification, NotificationVariant};

use super::engine::{Conclusion, EngineInner, SharedOutcome};
use super::error::RetryError;
use super::policy::{RetryConfig, RetryDecision, RetryOverrides, StopReason};

/// Stand-in deadline for delays too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Settles the sequence with `DriverLost` if the driver is dropped before
/// reaching a terminal state (the action panicked). After cancellation the
/// sequence is already gone and this does nothing.
struct DriverGuard {
    inner: Arc<EngineInner>,
    id: String,
    seq: u64,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.inner.conclude(&self.id, self.seq, Conclusion::Lost) {
            tracing::error!(id = %self.id, "retry driver stopped without an outcome");
            tx.send_replace(Some(Err(RetryError::DriverLost {
                id: self.id.clone(),
            })));
        }
    }
}

pub(super) async fn drive<T, E, F, Fut>(
    inner: Arc<EngineInner>,
    id: String,
    seq: u64,
    label: String,
    config: RetryConfig,
    overrides: RetryOverrides,
    mut action: F,
) where
    T: Send + Sync + 'static,
    E: Into<RawError>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let _guard = DriverGuard {
        inner: Arc::clone(&inner),
        id: id.clone(),
        seq,
    };
    let max = config.max_attempts;
    let mut attempts: u32 = 0;

    loop {
        let attempt_no = attempts + 1;
        if !inner.begin_attempt(&id, seq, format!("{label} (attempt {attempt_no}/{max})")) {
            return;
        }
        tracing::debug!(id = %id, attempt = attempt_no, max_attempts = max, "executing");

        let error = match action().await {
            Ok(value) => {
                let how = if attempts == 0 {
                    Conclusion::FirstTry
                } else {
                    Conclusion::Recovered
                };
                let Some(tx) = inner.conclude(&id, seq, how) else {
                    return;
                };
                if attempts > 0 {
                    tracing::info!(id = %id, attempts = attempt_no, "recovered after retrying");
                    inner.notifier.notify(
                        Notification::new(
                            format!("{label} succeeded"),
                            format!("Recovered after {attempt_no} attempts."),
                            NotificationVariant::Success,
                        )
                        .with_duration(inner.options.recovered_toast),
                    );
                }
                let outcome: SharedOutcome = Ok(Arc::new(value));
                tx.send_replace(Some(outcome));
                return;
            }
            Err(e) => e.into(),
        };

        let record = classify(&error, Some(&overrides.classify));
        attempts += 1;

        match config.decide(&record, attempts, inner.jitter.as_ref()) {
            RetryDecision::RetryAfter(delay) => {
                let now = Instant::now();
                let at = now
                    .checked_add(delay)
                    .or_else(|| now.checked_add(FAR_FUTURE))
                    .unwrap_or(now);
                let secs = delay.as_secs_f64();
                if !inner.schedule_retry(
                    &id,
                    seq,
                    attempts,
                    &record,
                    at,
                    format!("{label} (retrying in {secs:.1}s)"),
                ) {
                    return;
                }
                tracing::info!(
                    id = %id,
                    attempt = attempts,
                    max_attempts = max,
                    code = %record.code,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed; retry scheduled"
                );
                inner.notifier.notify(
                    Notification::new(
                        format!("Retrying {label}"),
                        format!(
                            "Attempt {attempts} of {max} failed: {}. Retrying in {secs:.1}s.",
                            record.message.trim_end_matches('.')
                        ),
                        NotificationVariant::Warning,
                    )
                    .with_duration(inner.options.retry_toast)
                    .with_action("Cancel", id.clone()),
                );
                tokio::time::sleep_until(at).await;
            }
            RetryDecision::Stop(reason) => {
                fail(&inner, &id, seq, &label, &overrides, record, attempts, reason);
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn fail(
    inner: &EngineInner,
    id: &str,
    seq: u64,
    label: &str,
    overrides: &RetryOverrides,
    record: ErrorRecord,
    attempts: u32,
    reason: StopReason,
) {
    inner.record_failure(id, seq, attempts, &record);
    let Some(tx) = inner.conclude(id, seq, Conclusion::Failed { attempts }) else {
        return;
    };
    tracing::warn!(
        id,
        attempts,
        code = %record.code,
        category = %record.category,
        ?reason,
        "operation failed"
    );
    if reason == StopReason::Exhausted {
        if let Some(cb) = &overrides.on_max_attempts_reached {
            cb(&record, attempts);
        }
    }
    inner.notifier.notify(error_notification(
        &record,
        &ReportOptions {
            attempts: Some(attempts),
            duration: Some(inner.options.error_toast),
        },
    ));
    let outcome: SharedOutcome = Err(RetryError::Failed {
        label: label.to_string(),
        record,
        attempts,
    });
    tx.send_replace(Some(outcome));
}
