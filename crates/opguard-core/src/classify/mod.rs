//! Error classification.
//!
//! Every failure that crosses the execution layer is normalised here into an
//! [`ErrorRecord`] with a stable code, a category, and a severity. The retry
//! policies, the notification path, and callers all consume the record rather
//! than the raw failure, so classification must never fail itself.

mod codes;
mod raw;
mod record;
mod report;
mod rules;

pub use codes::{lookup_code, CodeInfo};
pub use raw::RawError;
pub use record::{ErrorCategory, ErrorRecord, Severity};
pub use report::{error_notification, ReportOptions};
pub use rules::{classify, classify_http_status, classify_io_error, ClassifyOverrides};
