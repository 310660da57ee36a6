//! Tracked operation, start options and lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::classify::ErrorCategory;

/// Called instead of the default notification when an operation times out.
pub type TimeoutCallback = Arc<dyn Fn(&Operation) + Send + Sync>;

/// Snapshot of one tracked operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: String,
    pub label: String,
    pub category: ErrorCategory,
    /// Percent complete in [0, 100]; `None` when progress is not tracked.
    pub progress: Option<f64>,
    pub started_at: Instant,
    pub timeout: Option<Duration>,
}

impl Operation {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Options for [`OperationRegistry::start`](super::OperationRegistry::start).
#[derive(Clone)]
pub struct StartOptions {
    pub label: String,
    pub category: ErrorCategory,
    pub timeout: Option<Duration>,
    pub track_progress: bool,
    pub on_timeout: Option<TimeoutCallback>,
}

impl StartOptions {
    pub fn new(label: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            label: label.into(),
            category,
            timeout: None,
            track_progress: false,
            on_timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn track_progress(mut self) -> Self {
        self.track_progress = true;
        self
    }

    pub fn on_timeout(mut self, f: impl Fn(&Operation) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("label", &self.label)
            .field("category", &self.category)
            .field("timeout", &self.timeout)
            .field("track_progress", &self.track_progress)
            .field("on_timeout", &self.on_timeout.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Lifecycle event. Per id: `Started`, any number of `Progress`, then exactly
/// one of `Stopped` / `TimedOut`.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Started {
        id: String,
        label: String,
        category: ErrorCategory,
    },
    Progress {
        id: String,
        percent: f64,
    },
    Stopped {
        id: String,
        elapsed: Duration,
    },
    TimedOut {
        id: String,
        elapsed: Duration,
    },
}

impl RegistryEvent {
    pub fn id(&self) -> &str {
        match self {
            RegistryEvent::Started { id, .. }
            | RegistryEvent::Progress { id, .. }
            | RegistryEvent::Stopped { id, .. }
            | RegistryEvent::TimedOut { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistryEvent::Stopped { .. } | RegistryEvent::TimedOut { .. })
    }
}
