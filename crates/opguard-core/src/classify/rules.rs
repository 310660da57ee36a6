//! Classify raw failures into error records.

use std::io;

use super::codes::{lookup_code, CodeInfo};
use super::raw::RawError;
use super::record::{ErrorCategory, ErrorRecord, Severity};

/// Caller-supplied provenance merged into a record after classification.
#[derive(Debug, Clone, Default)]
pub struct ClassifyOverrides {
    pub context: Option<String>,
    pub user_action: Option<String>,
}

impl ClassifyOverrides {
    pub fn context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            user_action: None,
        }
    }
}

const FALLBACK_CODE: &str = "UNKNOWN_ERROR";

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];
const CONNECTIVITY_MARKERS: &[&str] = &[
    "failed to fetch",
    "network error",
    "connection refused",
    "connection reset",
    "econnrefused",
    "econnreset",
    "offline",
];

/// Classify a raw failure. Total: every input yields a well-formed record.
///
/// Inspection order is explicit code, then HTTP status, then native
/// signatures (timeouts, I/O kinds, message markers), then the
/// `general`/`medium` fallback.
pub fn classify(raw: &RawError, overrides: Option<&ClassifyOverrides>) -> ErrorRecord {
    let mut record = classify_inner(raw);
    if let Some(o) = overrides {
        if o.context.is_some() {
            record.context = o.context.clone();
        }
        if o.user_action.is_some() {
            record.user_action = o.user_action.clone();
        }
    }
    record
}

fn classify_inner(raw: &RawError) -> ErrorRecord {
    if let RawError::Classified(rec) = raw {
        return rec.clone();
    }

    let raw_message = raw.message().filter(|m| !m.trim().is_empty());
    let status = match raw {
        RawError::Http { status, .. } => Some(*status),
        _ => None,
    };
    let explicit_code = match raw {
        RawError::Http { code: Some(c), .. } | RawError::Coded { code: c, .. } => Some(c.as_str()),
        _ => None,
    };

    // 1. explicit code through the table
    if let Some(info) = explicit_code.and_then(lookup_code) {
        return from_info(info, raw_message, status);
    }

    // 2. HTTP status ranges
    if let Some(code) = status.and_then(classify_http_status) {
        if let Some(info) = lookup_code(code) {
            return from_info(info, raw_message, status);
        }
    }

    // 3. native signatures
    let native = match raw {
        RawError::Timeout { .. } => Some("NETWORK_TIMEOUT"),
        RawError::Io(e) => classify_io_error(e),
        RawError::Message(m) => classify_message(m),
        _ => None,
    };
    if let Some(info) = native.and_then(lookup_code) {
        return from_info(info, raw_message, status);
    }

    // 4. fallback; an unrecognised explicit code is still the stable identifier
    let code = explicit_code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| FALLBACK_CODE.to_string());
    let message = raw_message.unwrap_or_else(|| "Something went wrong.".to_string());
    let mut rec = ErrorRecord::new(code, ErrorCategory::General, Severity::Medium, message);
    rec.status = status;
    rec
}

fn from_info(info: &CodeInfo, raw_message: Option<String>, status: Option<u16>) -> ErrorRecord {
    ErrorRecord {
        code: info.code.to_string(),
        category: info.category,
        severity: info.severity,
        message: raw_message.unwrap_or_else(|| info.message.to_string()),
        context: None,
        user_action: info.user_action.map(str::to_string),
        status,
    }
}

/// Map an HTTP status onto a canonical code. `None` for statuses that carry
/// no classification (2xx/3xx and unlisted 4xx).
pub fn classify_http_status(status: u16) -> Option<&'static str> {
    match status {
        401 => Some("AUTH_UNAUTHORIZED"),
        403 => Some("AUTH_FORBIDDEN"),
        404 => Some("DATA_NOT_FOUND"),
        408 => Some("NETWORK_TIMEOUT"),
        409 => Some("DATA_CONFLICT"),
        400 | 422 => Some("VALIDATION_FAILED"),
        429 => Some("RATE_LIMITED"),
        503 => Some("SERVICE_UNAVAILABLE"),
        500..=599 => Some("SERVER_ERROR"),
        _ => None,
    }
}

/// Map an I/O failure onto a canonical code, when it is a transport failure.
pub fn classify_io_error(e: &io::Error) -> Option<&'static str> {
    match e.kind() {
        io::ErrorKind::TimedOut => Some("NETWORK_TIMEOUT"),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::UnexpectedEof => Some("NETWORK_ERROR"),
        io::ErrorKind::PermissionDenied => Some("DATA_STORAGE_ERROR"),
        _ => None,
    }
}

fn classify_message(m: &str) -> Option<&'static str> {
    let lower = m.to_ascii_lowercase();
    if TIMEOUT_MARKERS.iter().any(|k| lower.contains(k)) {
        Some("NETWORK_TIMEOUT")
    } else if CONNECTIVITY_MARKERS.iter().any(|k| lower.contains(k)) {
        Some("NETWORK_ERROR")
    } else {
        None
    }
}
