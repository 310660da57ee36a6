//! Static code table: canonical error codes and the backend aliases that map
//! onto them.

use super::record::{ErrorCategory, Severity};

/// What the table knows about a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInfo {
    /// Canonical code stored on the record.
    pub code: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Default user-facing message.
    pub message: &'static str,
    /// Suggested next step shown next to the message, if any.
    pub user_action: Option<&'static str>,
}

const fn info(
    code: &'static str,
    category: ErrorCategory,
    severity: Severity,
    message: &'static str,
    user_action: Option<&'static str>,
) -> CodeInfo {
    CodeInfo {
        code,
        category,
        severity,
        message,
        user_action,
    }
}

use ErrorCategory::*;
use Severity::*;

static CODES: &[CodeInfo] = &[
    // Network
    info("NETWORK_TIMEOUT", Network, Medium, "The request timed out.", Some("Check your connection and try again.")),
    info("NETWORK_ERROR", Network, Medium, "Could not reach the server.", Some("Check your connection and try again.")),
    info("NETWORK_OFFLINE", Network, Medium, "You appear to be offline.", Some("Reconnect to the internet and try again.")),
    info("SERVER_ERROR", Network, Medium, "The server encountered an error.", Some("Try again in a few minutes.")),
    info("SERVICE_UNAVAILABLE", Network, Medium, "The service is temporarily unavailable.", Some("Try again in a few minutes.")),
    info("RATE_LIMITED", Network, Low, "Too many requests were sent.", Some("Wait a moment before trying again.")),
    // Auth
    info("AUTH_INVALID_CREDENTIALS", Auth, High, "The email or password is incorrect.", Some("Check your credentials and sign in again.")),
    info("AUTH_SESSION_EXPIRED", Auth, High, "Your session has expired.", Some("Sign in again to continue.")),
    info("AUTH_UNAUTHORIZED", Auth, High, "You need to sign in to do that.", Some("Sign in and try again.")),
    info("AUTH_FORBIDDEN", Auth, High, "You do not have permission to do that.", Some("Ask an administrator for access.")),
    // Compliance
    info("AHPRA_COMPLIANCE_VIOLATION", Compliance, Critical, "The content breaches AHPRA advertising guidelines.", Some("Review the flagged wording before publishing.")),
    info("TGA_COMPLIANCE_VIOLATION", Compliance, Critical, "The content breaches TGA advertising rules.", Some("Remove therapeutic claims before publishing.")),
    info("COMPLIANCE_CHECK_FAILED", Compliance, Critical, "The content did not pass the compliance check.", Some("Review the compliance report and edit the content.")),
    // Healthcare
    info("PRACTITIONER_VERIFICATION_FAILED", Healthcare, High, "The practitioner registration could not be verified.", Some("Check the registration number and try again.")),
    info("PATIENT_DATA_ACCESS_DENIED", Healthcare, High, "Access to patient information was denied.", Some("Confirm you have consent to use this information.")),
    info("HEALTHCARE_DATA_ERROR", Healthcare, High, "The healthcare record could not be processed.", None),
    // Data
    info("DATA_NOT_FOUND", Data, Low, "The requested item could not be found.", None),
    info("DATA_CONFLICT", Data, Medium, "The item was changed by someone else.", Some("Reload and apply your changes again.")),
    info("DATA_STORAGE_ERROR", Data, Medium, "Your changes could not be saved.", Some("Try saving again.")),
    // Validation
    info("VALIDATION_FAILED", Validation, Low, "Some of the information entered is invalid.", Some("Correct the highlighted fields.")),
    info("VALIDATION_REQUIRED_FIELD", Validation, Low, "A required field is missing.", Some("Fill in all required fields.")),
    // General
    info("UNKNOWN_ERROR", General, Medium, "Something went wrong.", Some("Try again, and contact support if it keeps happening.")),
];

/// Backend-native codes (storage/auth provider) mapped onto canonical codes.
static ALIASES: &[(&str, &str)] = &[
    ("ETIMEDOUT", "NETWORK_TIMEOUT"),
    ("ECONNABORTED", "NETWORK_TIMEOUT"),
    ("ECONNREFUSED", "NETWORK_ERROR"),
    ("ECONNRESET", "NETWORK_ERROR"),
    ("ENOTFOUND", "NETWORK_ERROR"),
    ("FETCH_ERROR", "NETWORK_ERROR"),
    ("INVALID_LOGIN_CREDENTIALS", "AUTH_INVALID_CREDENTIALS"),
    ("INVALID_GRANT", "AUTH_INVALID_CREDENTIALS"),
    ("PGRST301", "AUTH_SESSION_EXPIRED"),
    ("JWT_EXPIRED", "AUTH_SESSION_EXPIRED"),
    ("42501", "AUTH_FORBIDDEN"),
    ("PGRST116", "DATA_NOT_FOUND"),
    ("23505", "DATA_CONFLICT"),
    ("23502", "VALIDATION_REQUIRED_FIELD"),
    ("23514", "VALIDATION_FAILED"),
];

/// Look up a code (canonical or alias), ignoring ASCII case.
pub fn lookup_code(code: &str) -> Option<&'static CodeInfo> {
    let code = code.trim();
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(code))
        .map(|(_, canonical)| *canonical)
        .unwrap_or(code);
    CODES.iter().find(|c| c.code.eq_ignore_ascii_case(canonical))
}
