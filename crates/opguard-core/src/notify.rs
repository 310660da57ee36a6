//! Notification sink boundary.
//!
//! The execution layer reports user-facing events (retrying, recovered,
//! failed, timed out) as [`Notification`] values. Rendering them is somebody
//! else's job: the UI layer plugs in a [`NotificationSink`]. When no sink is
//! configured everything degrades to silence.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

/// Visual weight of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationVariant {
    Default,
    Success,
    Warning,
    Destructive,
}

/// Optional call-to-action attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub label: String,
    /// Operation the action refers to (e.g. the id to cancel).
    pub operation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub variant: NotificationVariant,
    #[serde(skip_serializing_if = "Option::is_none", with = "duration_ms")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        variant: NotificationVariant,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant,
            duration: None,
            action: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_action(mut self, label: impl Into<String>, operation_id: impl Into<String>) -> Self {
        self.action = Some(NotificationAction {
            label: label.into(),
            operation_id: operation_id.into(),
        });
        self
    }
}

/// Fire-and-forget receiver of notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl NotificationSink for SilentSink {
    fn notify(&self, _notification: Notification) {}
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        match n.variant {
            NotificationVariant::Destructive => {
                tracing::error!(title = %n.title, "{}", n.description)
            }
            NotificationVariant::Warning => tracing::warn!(title = %n.title, "{}", n.description),
            _ => tracing::info!(title = %n.title, "{}", n.description),
        }
    }
}

/// Forwards notifications into a tokio channel for a UI task to drain.
/// A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

/// Optional sink shared by the registry and the retry engine.
#[derive(Clone, Default)]
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn is_silent(&self) -> bool {
        self.sink.is_none()
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(sink) = &self.sink {
            sink.notify(notification);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sink", &self.sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }
}
