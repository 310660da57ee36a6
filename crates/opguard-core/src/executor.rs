//! One handle over the registry, the retry engine and the classifier.
//!
//! Application code normally talks to [`OperationExecutor`] only. It owns the
//! shared notifier, so retry warnings, recoveries, timeouts and reported
//! errors all reach the same sink.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{self, error_notification, ClassifyOverrides, ErrorCategory, ErrorRecord, RawError, ReportOptions};
use crate::config::OpguardConfig;
use crate::notify::{NotificationSink, Notifier};
use crate::registry::{OperationRegistry, ProgressHandle, RegistryStats, StartOptions};
use crate::retry::{
    JitterSource, PendingRetry, RetryEngine, RetryError, RetryOverrides, RetryStats, ThreadRngJitter,
};

/// Builder for [`OperationExecutor`].
#[derive(Default)]
pub struct ExecutorBuilder {
    sink: Option<Arc<dyn NotificationSink>>,
    jitter: Option<Arc<dyn JitterSource>>,
    config: OpguardConfig,
}

impl ExecutorBuilder {
    /// Where notifications go. Without a sink the executor is silent.
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Jitter source for backoff delays (random by default).
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn config(mut self, config: OpguardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> OperationExecutor {
        let notifier = self.sink.map(Notifier::new).unwrap_or_default();
        let registry = OperationRegistry::new(notifier.clone(), self.config.registry_options());
        let engine = RetryEngine::with_config(
            registry.clone(),
            notifier.clone(),
            self.config.policy_table(),
            self.jitter.unwrap_or_else(|| Arc::new(ThreadRngJitter)),
            self.config.engine_options(),
        );
        OperationExecutor {
            registry,
            engine,
            notifier,
            error_toast: Duration::from_millis(self.config.notifications.error_toast_ms),
            shut_down: AtomicBool::new(false),
        }
    }
}

/// Runs operations with retry and progress tracking.
///
/// Dropping the executor (or calling [`shutdown`](Self::shutdown)) cancels
/// every pending retry and stops every tracked operation. Share it behind an
/// `Arc` when several tasks need it.
pub struct OperationExecutor {
    registry: OperationRegistry,
    engine: RetryEngine,
    notifier: Notifier,
    error_toast: Duration,
    shut_down: AtomicBool,
}

impl Default for OperationExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .finish()
    }
}

macro_rules! category_retry {
    ($(#[$doc:meta] $name:ident => $category:expr;)*) => {
        $(
            #[$doc]
            pub async fn $name<T, E, F, Fut>(
                &self,
                id: impl Into<String>,
                label: impl Into<String>,
                action: F,
            ) -> Result<T, RetryError>
            where
                T: Clone + Send + Sync + 'static,
                E: Into<RawError> + Send + 'static,
                F: FnMut() -> Fut + Send + 'static,
                Fut: Future<Output = Result<T, E>> + Send + 'static,
            {
                self.with_retry(id, label, $category, RetryOverrides::new(), action).await
            }
        )*
    };
}

impl OperationExecutor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &RetryEngine {
        &self.engine
    }

    /// Run `action` under the `category` policy merged with `overrides`.
    /// See [`RetryEngine::with_retry`].
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
        self.engine
            .with_retry(id, label, category, overrides, action)
            .await
    }

    category_retry! {
        /// Retry with the network policy.
        with_network_retry => ErrorCategory::Network;
        /// Retry with the auth policy. Credential failures are never retried.
        with_auth_retry => ErrorCategory::Auth;
        /// Retry with the compliance policy. Violations are never retried.
        with_compliance_retry => ErrorCategory::Compliance;
        /// Retry with the healthcare policy.
        with_healthcare_retry => ErrorCategory::Healthcare;
        /// Retry with the data policy.
        with_data_retry => ErrorCategory::Data;
        /// Retry with the validation policy.
        with_validation_retry => ErrorCategory::Validation;
        /// Retry with the general policy.
        with_general_retry => ErrorCategory::General;
    }

    pub fn start_loading(&self, id: impl Into<String>, opts: StartOptions) -> String {
        self.registry.start(id, opts)
    }

    pub fn update_progress(&self, id: &str, percent: f64) {
        self.registry.update_progress(id, percent);
    }

    pub fn stop_loading(&self, id: &str) -> Option<Duration> {
        self.registry.stop(id)
    }

    /// Track `action` without retry semantics; stopped on every outcome.
    pub async fn with_loading<T, F, Fut>(&self, id: impl Into<String>, opts: StartOptions, action: F) -> T
    where
        F: FnOnce(ProgressHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        self.registry.with_loading(id, opts, action).await
    }

    pub fn is_operation_loading(&self, id: &str) -> bool {
        self.registry.is_active(id)
    }

    pub fn is_retrying(&self, id: &str) -> bool {
        self.engine.is_retrying(id)
    }

    pub fn get_time_until_retry(&self, id: &str) -> Option<Duration> {
        self.engine.time_until_retry(id)
    }

    pub fn get_pending_retries(&self) -> Vec<PendingRetry> {
        self.engine.pending_retries()
    }

    pub fn get_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn get_retry_stats(&self) -> RetryStats {
        self.engine.stats()
    }

    pub fn cancel_retry(&self, id: &str) -> bool {
        self.engine.cancel(id)
    }

    pub fn cancel_all_retries(&self) -> usize {
        self.engine.cancel_all()
    }

    pub fn stop_all_loading(&self) -> usize {
        self.registry.stop_all()
    }

    /// Classify a failure without reporting it.
    pub fn classify(&self, raw: impl Into<RawError>) -> ErrorRecord {
        classify::classify(&raw.into(), None)
    }

    /// Classify a failure that is not going through retry and emit exactly
    /// one notification for it. Returns the record for the caller's own use.
    pub fn report_error(&self, raw: impl Into<RawError>, overrides: Option<&ClassifyOverrides>) -> ErrorRecord {
        let record = classify::classify(&raw.into(), overrides);
        tracing::warn!(
            code = %record.code,
            category = %record.category,
            severity = ?record.severity,
            context = record.context.as_deref().unwrap_or(""),
            "{}",
            record.message
        );
        self.notifier.notify(error_notification(
            &record,
            &ReportOptions {
                attempts: None,
                duration: Some(self.error_toast),
            },
        ));
        record
    }

    /// Cancel all retries and stop all loading. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.engine.cancel_all();
        let stopped = self.registry.stop_all();
        tracing::debug!(cancelled, stopped, "executor shut down");
    }
}

impl Drop for OperationExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelSink, Notification, NotificationVariant};
    use crate::retry::FixedJitter;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn executor(config: OpguardConfig) -> (Arc<OperationExecutor>, UnboundedReceiver<Notification>) {
        let (sink, rx) = ChannelSink::new();
        let exec = OperationExecutor::builder()
            .sink(Arc::new(sink))
            .jitter(Arc::new(FixedJitter(1.0)))
            .config(config)
            .build();
        (Arc::new(exec), rx)
    }

    #[test]
    fn report_error_emits_one_notification() {
        let (exec, mut rx) = executor(OpguardConfig::default());
        let record = exec.report_error(
            RawError::coded("AHPRA_COMPLIANCE_VIOLATION"),
            Some(&ClassifyOverrides::context("publish post")),
        );
        assert_eq!(record.category, ErrorCategory::Compliance);
        assert_eq!(record.context.as_deref(), Some("publish post"));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.variant, NotificationVariant::Destructive);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn classify_is_quiet() {
        let (exec, mut rx) = executor(OpguardConfig::default());
        assert_eq!(exec.classify(RawError::http(401)).code, "AUTH_UNAUTHORIZED");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_wrapper_does_not_retry_bad_credentials() {
        let (exec, mut rx) = executor(OpguardConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let err = exec
            .with_auth_retry("login", "Sign in", move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RawError::coded("AUTH_INVALID_CREDENTIALS")) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.get_retry_stats().immediate_failures, 1);
        assert_eq!(rx.try_recv().unwrap().variant, NotificationVariant::Destructive);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn config_overrides_reach_the_engine() {
        let cfg: OpguardConfig = toml::from_str("[retry.network]\nmax_attempts = 2\n").unwrap();
        let (exec, _rx) = executor(cfg);
        let err = exec
            .with_network_retry("n", "Fetch", || async { Err::<(), _>(RawError::http(503)) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(exec.get_retry_stats().failed_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn with_loading_tracks_progress_and_stops() {
        let (exec, _rx) = executor(OpguardConfig::default());
        let seen = exec
            .with_loading("up", StartOptions::new("Upload", ErrorCategory::Data).track_progress(), |p| {
                let exec = Arc::clone(&exec);
                async move {
                    p.set(40.0);
                    exec.get_stats().average_progress
                }
            })
            .await;
        assert_eq!(seen, Some(40.0));
        assert!(!exec.is_operation_loading("up"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_retries_and_stops_loading() {
        let (exec, _rx) = executor(OpguardConfig::default());
        exec.start_loading("spinner", StartOptions::new("Working", ErrorCategory::General));
        let task = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move {
                exec.with_data_retry("d", "Sync", || async { Err::<(), _>(RawError::timeout()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(exec.is_retrying("d"));
        assert!(exec.get_time_until_retry("d").is_some());

        exec.shutdown();
        assert!(task.await.unwrap().unwrap_err().is_cancelled());
        assert!(!exec.is_operation_loading("spinner"));
        assert_eq!(exec.get_stats().active_count, 0);
        exec.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_executor_cancels_pending_retry() {
        let (sink, _rx) = ChannelSink::new();
        let exec = OperationExecutor::builder()
            .sink(Arc::new(sink))
            .jitter(Arc::new(FixedJitter(1.0)))
            .build();
        let engine = exec.engine().clone();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .with_retry("x", "Job", ErrorCategory::Network, RetryOverrides::new(), || async {
                        Err::<(), _>(RawError::http(500))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_retrying("x"));
        drop(exec);
        assert!(task.await.unwrap().unwrap_err().is_cancelled());
        assert!(!engine.is_tracked("x"));
    }
}
