//! Raw failures as actions hand them to the execution layer.

use std::fmt;
use std::time::Duration;

use super::record::ErrorRecord;

/// An unclassified failure.
///
/// Actions protected by the retry engine return any error type that converts
/// into this; the classifier turns it into an [`ErrorRecord`].
#[derive(Debug)]
pub enum RawError {
    /// HTTP-like response with a status and optionally a backend code.
    Http {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// Failure carrying an explicit error code.
    Coded {
        code: String,
        message: Option<String>,
    },
    /// The action gave up waiting.
    Timeout { after: Option<Duration> },
    /// Native I/O failure.
    Io(std::io::Error),
    /// Bare message with no structure.
    Message(String),
    /// Already classified; passes through unchanged.
    Classified(ErrorRecord),
}

impl RawError {
    pub fn http(status: u16) -> Self {
        RawError::Http {
            status,
            code: None,
            message: None,
        }
    }

    pub fn coded(code: impl Into<String>) -> Self {
        RawError::Coded {
            code: code.into(),
            message: None,
        }
    }

    pub fn coded_with_message(code: impl Into<String>, message: impl Into<String>) -> Self {
        RawError::Coded {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    pub fn timeout() -> Self {
        RawError::Timeout { after: None }
    }

    /// Free-text message attached to the failure, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            RawError::Http { message, .. } | RawError::Coded { message, .. } => message.clone(),
            RawError::Timeout { after: Some(d) } => {
                Some(format!("timed out after {} ms", d.as_millis()))
            }
            RawError::Timeout { after: None } => None,
            RawError::Io(e) => Some(e.to_string()),
            RawError::Message(m) => Some(m.clone()),
            RawError::Classified(r) => Some(r.message.clone()),
        }
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawError::Http { status, code, .. } => match code {
                Some(c) => write!(f, "HTTP {} ({})", status, c),
                None => write!(f, "HTTP {}", status),
            },
            RawError::Coded { code, message } => match message {
                Some(m) => write!(f, "{}: {}", code, m),
                None => write!(f, "{}", code),
            },
            RawError::Timeout { after: Some(d) } => write!(f, "timed out after {:?}", d),
            RawError::Timeout { after: None } => write!(f, "timed out"),
            RawError::Io(e) => write!(f, "{}", e),
            RawError::Message(m) => write!(f, "{}", m),
            RawError::Classified(r) => write!(f, "{}", r),
        }
    }
}

impl std::error::Error for RawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RawError::Io(e) => Some(e),
            RawError::Classified(r) => Some(r),
            _ => None,
        }
    }
}

impl From<&str> for RawError {
    fn from(s: &str) -> Self {
        RawError::Message(s.to_string())
    }
}

impl From<String> for RawError {
    fn from(s: String) -> Self {
        RawError::Message(s)
    }
}

impl From<std::io::Error> for RawError {
    fn from(e: std::io::Error) -> Self {
        RawError::Io(e)
    }
}

impl From<ErrorRecord> for RawError {
    fn from(r: ErrorRecord) -> Self {
        RawError::Classified(r)
    }
}

impl From<anyhow::Error> for RawError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<std::io::Error>() {
            Ok(io) => RawError::Io(io),
            Err(e) => match e.downcast::<ErrorRecord>() {
                Ok(rec) => RawError::Classified(rec),
                Err(e) => RawError::Message(format!("{:#}", e)),
            },
        }
    }
}
