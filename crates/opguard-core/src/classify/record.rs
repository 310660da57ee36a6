//! Normalised failure record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification driving default retry policy and severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Auth,
    Compliance,
    Healthcare,
    Data,
    Validation,
    General,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Network,
        ErrorCategory::Auth,
        ErrorCategory::Compliance,
        ErrorCategory::Healthcare,
        ErrorCategory::Data,
        ErrorCategory::Validation,
        ErrorCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Compliance => "compliance",
            ErrorCategory::Healthcare => "healthcare",
            ErrorCategory::Data => "data",
            ErrorCategory::Validation => "validation",
            ErrorCategory::General => "general",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown error category: {s}"))
    }
}

/// How bad a failure is for the user. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A classified failure. Produced by [`classify`](super::classify) and never
/// built partially: `code` is always set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorRecord {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action: Option<String>,
    /// HTTP status of the underlying response, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

const TIMEOUT_CODES: &[&str] = &["NETWORK_TIMEOUT"];
const CONNECTIVITY_CODES: &[&str] = &["NETWORK_ERROR", "NETWORK_OFFLINE"];
const SERVER_CODES: &[&str] = &["SERVER_ERROR", "SERVICE_UNAVAILABLE"];
const CREDENTIAL_CODES: &[&str] = &[
    "AUTH_INVALID_CREDENTIALS",
    "AUTH_SESSION_EXPIRED",
    "AUTH_UNAUTHORIZED",
    "AUTH_FORBIDDEN",
];

impl ErrorRecord {
    pub fn new(
        code: impl Into<String>,
        category: ErrorCategory,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            category,
            severity,
            message: message.into(),
            context: None,
            user_action: None,
            status: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_user_action(mut self, action: impl Into<String>) -> Self {
        self.user_action = Some(action.into());
        self
    }

    pub fn is_timeout(&self) -> bool {
        TIMEOUT_CODES.contains(&self.code.as_str())
    }

    pub fn is_connectivity(&self) -> bool {
        CONNECTIVITY_CODES.contains(&self.code.as_str())
    }

    /// 5xx response, whether known from the status or only from the code.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status, Some(s) if s >= 500) || SERVER_CODES.contains(&self.code.as_str())
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == "RATE_LIMITED"
    }

    /// Transport-level failure that a later attempt may not hit.
    pub fn is_transient(&self) -> bool {
        self.is_timeout() || self.is_connectivity() || self.is_server_error() || self.is_rate_limited()
    }

    /// The caller's credentials or session were rejected.
    pub fn is_credential_failure(&self) -> bool {
        CREDENTIAL_CODES.contains(&self.code.as_str())
    }

    /// A substantive compliance finding. Transport failures while talking to
    /// the compliance service classify as `network`, never as `compliance`.
    pub fn is_compliance_violation(&self) -> bool {
        self.category == ErrorCategory::Compliance
    }
}
