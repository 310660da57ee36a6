//! The registry itself: a shared map of id -> active operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::classify::ErrorCategory;
use crate::notify::{Notification, NotificationVariant, Notifier};

use super::guard::{LoadingGuard, ProgressHandle};
use super::operation::{Operation, RegistryEvent, StartOptions, TimeoutCallback};
use super::stats::RegistryStats;

const EVENT_CAPACITY: usize = 256;

/// Registry-wide settings (usually from `OpguardConfig`).
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Timeout applied when `StartOptions::timeout` is not set.
    pub default_timeout: Option<Duration>,
    /// How long the default timeout notification stays visible.
    pub timeout_toast: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_timeout: None,
            timeout_toast: Duration::from_secs(5),
        }
    }
}

struct Entry {
    op: Operation,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    on_timeout: Option<TimeoutCallback>,
}

struct Inner {
    ops: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
    stats: watch::Sender<RegistryStats>,
    notifier: Notifier,
    options: RegistryOptions,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the aggregate and an event. Called with the map lock held so
    /// observers never see an aggregate that disagrees with the map.
    fn publish(&self, ops: &HashMap<String, Entry>, event: RegistryEvent) {
        self.stats
            .send_replace(RegistryStats::compute(ops.values().map(|e| &e.op)));
        let _ = self.events.send(event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let ops = self.ops.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in ops.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Shared registry of active operations. Cloning is cheap and every clone
/// sees the same operations.
#[derive(Clone)]
pub struct OperationRegistry {
    inner: Arc<Inner>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new(Notifier::silent(), RegistryOptions::default())
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("active", &self.inner.lock().len())
            .finish()
    }
}

impl OperationRegistry {
    pub fn new(notifier: Notifier, options: RegistryOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stats, _) = watch::channel(RegistryStats::default());
        Self {
            inner: Arc::new(Inner {
                ops: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                events,
                stats,
                notifier,
                options,
            }),
        }
    }

    /// Start tracking an operation. Starting an id that is already active
    /// replaces it (its timeout timer is cancelled).
    pub fn start(&self, id: impl Into<String>, opts: StartOptions) -> String {
        let id = id.into();
        self.start_generation(&id, opts);
        id
    }

    pub(super) fn start_generation(&self, id: &str, opts: StartOptions) -> u64 {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let timeout = opts.timeout.or(self.inner.options.default_timeout);
        let op = Operation {
            id: id.to_string(),
            label: opts.label,
            category: opts.category,
            progress: opts.track_progress.then_some(0.0),
            started_at: Instant::now(),
            timeout,
        };
        let event = RegistryEvent::Started {
            id: id.to_string(),
            label: op.label.clone(),
            category: op.category,
        };

        let mut ops = self.inner.lock();
        let timer = timeout.and_then(|t| self.arm_timeout(id, generation, t));
        let replaced = ops.insert(
            id.to_string(),
            Entry {
                op,
                generation,
                timer,
                on_timeout: opts.on_timeout,
            },
        );
        if let Some(mut old) = replaced {
            if let Some(timer) = old.timer.take() {
                timer.abort();
            }
            // the replaced incarnation still gets its terminal event
            self.inner.publish(
                &ops,
                RegistryEvent::Stopped {
                    id: id.to_string(),
                    elapsed: old.op.elapsed(),
                },
            );
            tracing::debug!(id, "operation restarted; previous entry replaced");
        }
        self.inner.publish(&ops, event);
        tracing::trace!(id, generation, ?timeout, "operation started");
        generation
    }

    fn arm_timeout(&self, id: &str, generation: u64, timeout: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(id, "no tokio runtime; operation timeout not armed");
            return None;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = id.to_string();
        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                OperationRegistry { inner }.fire_timeout(&id, generation);
            }
        }))
    }

    fn fire_timeout(&self, id: &str, generation: u64) {
        let (op, callback) = {
            let ops = self.inner.lock();
            match ops.get(id) {
                Some(e) if e.generation == generation => (e.op.clone(), e.on_timeout.clone()),
                _ => return,
            }
        };
        tracing::warn!(id, label = %op.label, elapsed_ms = op.elapsed().as_millis() as u64, "operation timed out");

        match callback {
            Some(cb) => cb(&op),
            None => {
                let secs = op.timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
                self.inner.notifier.notify(
                    Notification::new(
                        "Operation timed out",
                        format!("{} took longer than {:.0}s and was stopped.", op.label, secs),
                        NotificationVariant::Warning,
                    )
                    .with_duration(self.inner.options.timeout_toast),
                );
            }
        }

        let mut ops = self.inner.lock();
        if matches!(ops.get(id), Some(e) if e.generation == generation) {
            if let Some(entry) = ops.remove(id) {
                let elapsed = entry.op.elapsed();
                self.inner.publish(
                    &ops,
                    RegistryEvent::TimedOut {
                        id: id.to_string(),
                        elapsed,
                    },
                );
            }
        }
    }

    /// Change the label of an active operation in place. Start time,
    /// progress and timeout are kept and no event is emitted. Returns false
    /// if `id` is not active.
    pub fn relabel(&self, id: &str, label: impl Into<String>) -> bool {
        let mut ops = self.inner.lock();
        match ops.get_mut(id) {
            Some(entry) => {
                entry.op.label = label.into();
                true
            }
            None => false,
        }
    }

    /// Set progress for an active operation. Values are clamped to [0, 100];
    /// NaN, unknown ids, and unchanged values are ignored.
    pub fn update_progress(&self, id: &str, percent: f64) {
        self.update_progress_inner(id, None, percent);
    }

    pub(super) fn update_progress_inner(&self, id: &str, generation: Option<u64>, percent: f64) {
        if percent.is_nan() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        let mut ops = self.inner.lock();
        let Some(entry) = ops.get_mut(id) else {
            return;
        };
        if generation.is_some_and(|g| g != entry.generation) {
            return;
        }
        if entry.op.progress == Some(percent) {
            return;
        }
        entry.op.progress = Some(percent);
        self.inner.publish(
            &ops,
            RegistryEvent::Progress {
                id: id.to_string(),
                percent,
            },
        );
    }

    /// Stop tracking an operation and cancel its timeout. Returns how long it
    /// ran, or `None` if the id was not active.
    pub fn stop(&self, id: &str) -> Option<Duration> {
        self.stop_inner(id, None)
    }

    pub(super) fn stop_inner(&self, id: &str, generation: Option<u64>) -> Option<Duration> {
        let mut ops = self.inner.lock();
        if let Some(g) = generation {
            if !matches!(ops.get(id), Some(e) if e.generation == g) {
                return None;
            }
        }
        let mut entry = ops.remove(id)?;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        let elapsed = entry.op.elapsed();
        self.inner.publish(
            &ops,
            RegistryEvent::Stopped {
                id: id.to_string(),
                elapsed,
            },
        );
        tracing::debug!(id, elapsed_ms = elapsed.as_millis() as u64, "operation stopped");
        Some(elapsed)
    }

    /// Stop every active operation. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut ops = self.inner.lock();
        let drained: Vec<(String, Entry)> = ops.drain().collect();
        let n = drained.len();
        for (id, mut entry) in drained {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            let elapsed = entry.op.elapsed();
            self.inner.publish(&ops, RegistryEvent::Stopped { id, elapsed });
        }
        if n > 0 {
            tracing::debug!(count = n, "stopped all operations");
        }
        n
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Operation> {
        self.inner.lock().get(id).map(|e| e.op.clone())
    }

    /// Active operations in a category, oldest first.
    pub fn list_by_category(&self, category: ErrorCategory) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .inner
            .lock()
            .values()
            .filter(|e| e.op.category == category)
            .map(|e| e.op.clone())
            .collect();
        ops.sort_by_key(|o| o.started_at);
        ops
    }

    /// All active operations, oldest first.
    pub fn list(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.inner.lock().values().map(|e| e.op.clone()).collect();
        ops.sort_by_key(|o| o.started_at);
        ops
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.stats.borrow().clone()
    }

    /// Receive the aggregate every time it changes.
    pub fn watch_stats(&self) -> watch::Receiver<RegistryStats> {
        self.inner.stats.subscribe()
    }

    /// Receive lifecycle events. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Start `id`, stopping it when the returned guard is dropped.
    pub fn guard(&self, id: impl Into<String>, opts: StartOptions) -> LoadingGuard {
        let id = id.into();
        let generation = self.start_generation(&id, opts);
        LoadingGuard::new(self.clone(), id, generation)
    }

    /// Track `action` for as long as it runs. The operation is stopped on
    /// every outcome, including the future being dropped.
    pub async fn with_loading<T, F, Fut>(&self, id: impl Into<String>, opts: StartOptions, action: F) -> T
    where
        F: FnOnce(ProgressHandle) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.guard(id, opts);
        action(guard.progress()).await
    }
}
