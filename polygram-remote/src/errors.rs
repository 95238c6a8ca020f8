//! Error types for the remote-service seam.

use std::{fmt, io};

// ─── ServiceError ─────────────────────────────────────────────────────────────

/// An error returned by the remote service in response to a request.
///
/// Numeric values are stripped from the name and placed in [`ServiceError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `ServiceError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service error {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    /// Parse a raw service error message like `"FLOOD_WAIT_30"`.
    pub fn from_remote(code: i32, message: &str) -> Self {
        // Numeric suffix after the last underscore carries the value,
        // e.g. "FLOOD_WAIT_30" → name = "FLOOD_WAIT", value = Some(30).
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")` — exact match
    /// - `err.is("PHONE_CODE_*")` — starts-with match
    /// - `err.is("*_FORBIDDEN")` — ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Returns the flood-wait duration in seconds, if this is a FLOOD_WAIT error.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        if self.code == 420 && self.name == "FLOOD_WAIT" {
            self.value.map(|v| v as u64)
        } else {
            None
        }
    }
}

// ─── RemoteError ──────────────────────────────────────────────────────────────

/// The error type returned from every call that talks to the remote service.
#[derive(Debug)]
pub enum RemoteError {
    /// The service rejected the request.
    Service(ServiceError),
    /// Network / I/O failure.
    Io(io::Error),
    /// A reply or push event did not have the documented shape.
    Payload(String),
    /// The session's link to the service is gone.
    Dropped,
    /// A call exceeded its hard deadline.
    Timeout,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(e)  => write!(f, "{e}"),
            Self::Io(e)       => write!(f, "I/O error: {e}"),
            Self::Payload(s)  => write!(f, "malformed payload: {s}"),
            Self::Dropped     => write!(f, "connection dropped"),
            Self::Timeout     => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<io::Error> for RemoteError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl RemoteError {
    /// Returns `true` if this is the named service error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Service(e) => e.is(pattern),
            _                => false,
        }
    }

    /// If this is a FLOOD_WAIT error, returns how many seconds to wait.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::Service(e) => e.retry_after_seconds(),
            _                => None,
        }
    }
}
