//! Shared error-reporting path: one record, one user-facing notification.
//!
//! The retry engine routes its final failure through here so an exhausted
//! retry sequence looks the same to the user as a failure that was never
//! retried.

use std::time::Duration;

use crate::notify::{Notification, NotificationVariant};

use super::record::{ErrorCategory, ErrorRecord, Severity};

/// Knobs for [`error_notification`].
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Total executions when the failure ended a retry sequence.
    pub attempts: Option<u32>,
    /// Base toast duration; critical failures stay twice as long.
    pub duration: Option<Duration>,
}

fn title_for(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Network => "Connection problem",
        ErrorCategory::Auth => "Authentication required",
        ErrorCategory::Compliance => "Compliance issue",
        ErrorCategory::Healthcare => "Healthcare data issue",
        ErrorCategory::Data => "Data error",
        ErrorCategory::Validation => "Check your input",
        ErrorCategory::General => "Something went wrong",
    }
}

/// Build the notification for a failure.
pub fn error_notification(record: &ErrorRecord, opts: &ReportOptions) -> Notification {
    let mut description = record.message.clone();
    if let Some(action) = &record.user_action {
        description.push(' ');
        description.push_str(action);
    }
    if let Some(n) = opts.attempts.filter(|n| *n > 1) {
        description.push_str(&format!(" (failed after {} attempts)", n));
    }

    let variant = match record.severity {
        Severity::Low => NotificationVariant::Warning,
        _ => NotificationVariant::Destructive,
    };
    let base = opts.duration.unwrap_or(Duration::from_secs(5));
    let duration = if record.severity == Severity::Critical {
        base.saturating_mul(2)
    } else {
        base
    };

    Notification::new(title_for(record.category), description, variant).with_duration(duration)
}
