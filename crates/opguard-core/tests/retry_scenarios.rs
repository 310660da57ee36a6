//! End-to-end behaviour of the executor: retry, classification, reporting
//! and operation tracking working together on tokio's paused clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opguard_core::classify::ErrorCategory;
use opguard_core::notify::{ChannelSink, Notification, NotificationVariant};
use opguard_core::registry::{RegistryEvent, StartOptions};
use opguard_core::retry::{compute_delay, registry_id, FixedJitter, PolicyTable, SeededJitter};
use opguard_core::{OperationExecutor, RawError, RetryError, RetryOverrides};
use tokio::sync::mpsc::UnboundedReceiver;

fn executor() -> (Arc<OperationExecutor>, UnboundedReceiver<Notification>) {
    let (sink, rx) = ChannelSink::new();
    let exec = OperationExecutor::builder()
        .sink(Arc::new(sink))
        .jitter(Arc::new(FixedJitter(1.0)))
        .build();
    (Arc::new(exec), rx)
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn network_timeouts_recover_on_third_attempt() {
    let (exec, mut rx) = executor();
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);

    let value = exec
        .with_network_retry("feed", "Load feed", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RawError::coded("NETWORK_TIMEOUT"))
                } else {
                    Ok(vec![1, 2, 3])
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let notes = drain(&mut rx);
    let recovered: Vec<_> = notes
        .iter()
        .filter(|n| n.description.contains("Recovered after 3 attempts"))
        .collect();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].variant, NotificationVariant::Success);
    assert_eq!(
        notes
            .iter()
            .filter(|n| n.variant == NotificationVariant::Warning)
            .count(),
        2
    );

    let stats = exec.get_retry_stats();
    assert_eq!(stats.successful_retries, 1);
    assert_eq!(stats.attempts_executed, 3);
    assert!(!exec.is_operation_loading(&registry_id("feed")));
}

#[tokio::test(start_paused = true)]
async fn compliance_violation_is_rejected_without_retry() {
    let (exec, mut rx) = executor();
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);

    let err = exec
        .with_compliance_retry("publish", "Publish post", move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RawError::coded("AHPRA_COMPLIANCE_VIOLATION")) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts(), Some(1));
    assert_eq!(err.record().map(|r| r.code.as_str()), Some("AHPRA_COMPLIANCE_VIOLATION"));
    assert!(!exec.is_retrying("publish"));

    let notes = drain(&mut rx);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].variant, NotificationVariant::Destructive);
    assert_eq!(exec.get_retry_stats().immediate_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn loading_timeout_notifies_and_stops() {
    let (exec, mut rx) = executor();
    exec.start_loading(
        "x",
        StartOptions::new("Generating report", ErrorCategory::Data).timeout(Duration::from_millis(100)),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(exec.is_operation_loading("x"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!exec.is_operation_loading("x"));
    let notes = drain(&mut rx);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Operation timed out");
    assert_eq!(notes[0].variant, NotificationVariant::Warning);
}

#[tokio::test(start_paused = true)]
async fn exhausted_sequence_reports_last_error() {
    let (exec, mut rx) = executor();
    let before = exec.get_retry_stats().failed_retries;
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);

    let err = exec
        .with_network_retry("y", "Sync contacts", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 5 {
                    Err::<(), _>(RawError::http(503))
                } else {
                    Err(RawError::coded("NETWORK_ERROR"))
                }
            }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    match &err {
        RetryError::Failed { record, attempts, .. } => {
            assert_eq!(*attempts, 6);
            assert_eq!(record.code, "NETWORK_ERROR");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(exec.get_retry_stats().failed_retries, before + 1);

    let notes = drain(&mut rx);
    let errors: Vec<_> = notes
        .iter()
        .filter(|n| n.variant == NotificationVariant::Destructive)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].description.contains("6 attempts"));
}

#[tokio::test(start_paused = true)]
async fn max_attempts_callback_fires_only_on_exhaustion() {
    let (exec, _rx) = executor();
    let fired = Arc::new(AtomicU32::new(0));

    let f = Arc::clone(&fired);
    let _ = exec
        .with_retry(
            "a",
            "Job",
            ErrorCategory::General,
            RetryOverrides::new()
                .max_attempts(2)
                .on_max_attempts_reached(move |_, _| {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
            || async { Err::<(), _>(RawError::http(500)) },
        )
        .await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let f = Arc::clone(&fired);
    let _ = exec
        .with_retry(
            "b",
            "Job",
            ErrorCategory::General,
            RetryOverrides::new().on_max_attempts_reached(move |_, _| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
            || async { Err::<(), _>(RawError::http(400)) },
        )
        .await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_settles_promptly_and_prevents_further_attempts() {
    let (exec, _rx) = executor();
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);
    let task = {
        let exec = Arc::clone(&exec);
        tokio::spawn(async move {
            exec.with_healthcare_retry("appt", "Book appointment", move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RawError::timeout()) }
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(exec.is_retrying("appt"));
    assert_eq!(exec.get_pending_retries()[0].id, "appt");

    assert!(exec.cancel_retry("appt"));
    let settled = tokio::time::timeout(Duration::from_millis(1), task)
        .await
        .expect("caller settled")
        .unwrap();
    assert!(matches!(settled, Err(RetryError::OperationCancelled { .. })));

    let seen = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
    assert!(exec.get_pending_retries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn registry_sees_one_incarnation_spanning_the_whole_sequence() {
    let (exec, _rx) = executor();
    let mut events = exec.registry().subscribe();
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);

    exec.with_data_retry("save", "Save draft", move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if n == 0 {
                Err(RawError::http(502))
            } else {
                Ok(())
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let id = registry_id("save");
    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if ev.id() == id {
            seen.push(ev);
        }
    }
    let started = seen
        .iter()
        .filter(|e| matches!(e, RegistryEvent::Started { .. }))
        .count();
    assert_eq!(started, 1, "{seen:?}");
    assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(seen.first(), Some(RegistryEvent::Started { .. })));
    // 100ms attempt, 1.5s backoff, 100ms attempt
    match seen.last() {
        Some(RegistryEvent::Stopped { elapsed, .. }) => {
            assert!(*elapsed >= Duration::from_millis(1_700), "{elapsed:?}")
        }
        other => panic!("expected Stopped, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn saturated_backoff_does_not_overflow_the_clock() {
    let (exec, _rx) = executor();
    let calls = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&calls);

    let err = exec
        .with_retry(
            "huge",
            "Job",
            ErrorCategory::General,
            RetryOverrides::new()
                .max_attempts(3)
                .max_delay(Duration::MAX)
                .backoff_multiplier(1e300)
                .jitter(false),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RawError::http(500)) }
            },
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.attempts(), Some(3));
}

#[tokio::test(start_paused = true)]
async fn repeated_progress_value_publishes_once() {
    let (exec, _rx) = executor();
    let mut events = exec.registry().subscribe();
    exec.start_loading("p", StartOptions::new("Upload", ErrorCategory::Data).track_progress());
    exec.update_progress("p", 30.0);
    exec.update_progress("p", 30.0);
    exec.update_progress("p", 250.0);
    exec.update_progress("p", f64::NAN);
    exec.stop_loading("p");

    let mut progress = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if let RegistryEvent::Progress { percent, .. } = ev {
            progress.push(percent);
        }
    }
    assert_eq!(progress, vec![30.0, 100.0]);
}

#[test]
fn jittered_delays_stay_within_bounds() {
    let table = PolicyTable::default();
    for seed in 0..50 {
        let jitter = SeededJitter::new(seed);
        for (_, policy) in table.iter().filter(|(_, p)| p.jitter && p.exponential_backoff) {
            for attempts in 1..=policy.max_attempts {
                let d = compute_delay(policy, attempts, &jitter);
                assert!(d >= policy.base_delay / 2, "{d:?} below half of base");
                assert!(d <= policy.max_delay, "{d:?} above max");
            }
        }
    }
}
