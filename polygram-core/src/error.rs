//! The core error taxonomy.
//!
//! Every raw service failure is converted to one of these at the connection
//! boundary; nothing above the account connection ever sees a transport
//! error directly.

use std::fmt;

use polygram_remote::RemoteError;
use polygram_types::{AccountId, LoginStep};

// ─── AuthError ────────────────────────────────────────────────────────────────

/// Authentication failures, scoped to a single login step or session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthError {
    /// Wrong login code; the step may be retried.
    InvalidCode,
    /// The phone-code correlation hash expired; login restarts from the
    /// phone step.
    CodeExpired,
    /// Wrong 2FA password; the step may be retried.
    InvalidPassword,
    /// The service revoked this session's authorization.
    SessionRevoked,
    /// The session is not authorized for this request at all.
    NotAuthorized,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidCode     => "invalid login code",
            Self::CodeExpired     => "login code expired",
            Self::InvalidPassword => "invalid password",
            Self::SessionRevoked  => "session revoked by the service",
            Self::NotAuthorized   => "not authorized",
        };
        f.write_str(s)
    }
}

impl std::error::Error for AuthError {}

// ─── CoreError ────────────────────────────────────────────────────────────────

/// The error type every manager operation returns.
#[derive(Debug)]
pub enum CoreError {
    /// Transport to the service unavailable (after retries, where retried).
    Connection(String),
    Auth(AuthError),
    /// A login step was called out of order.
    InvalidLoginState { expected: LoginStep },
    PermissionDenied(String),
    RateLimited { retry_after: Option<u64> },
    /// The referenced chat/message no longer exists remotely; local caches
    /// for it are invalidated rather than trusted.
    NotFound(String),
    UnknownAccount(AccountId),
    /// Persisted state was unreadable and has been quarantined.
    Corrupt(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(s) => write!(f, "connection failed: {s}"),
            Self::Auth(e) => write!(f, "authentication failed: {e}"),
            Self::InvalidLoginState { expected } => {
                write!(f, "login step out of order (expected {expected})")
            }
            Self::PermissionDenied(s) => write!(f, "permission denied: {s}"),
            Self::RateLimited { retry_after: Some(secs) } => {
                write!(f, "rate limited, retry in {secs}s")
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::NotFound(s) => write!(f, "not found: {s}"),
            Self::UnknownAccount(id) => write!(f, "unknown account {id}"),
            Self::Corrupt(s) => write!(f, "corrupt persisted state: {s}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<AuthError> for CoreError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

/// Mapping from raw service failures, applied once at the connection
/// boundary.
impl From<RemoteError> for CoreError {
    fn from(e: RemoteError) -> Self {
        match &e {
            RemoteError::Service(s) => {
                if let Some(secs) = s.retry_after_seconds() {
                    return Self::RateLimited { retry_after: Some(secs) };
                }
                if s.is("PHONE_CODE_EXPIRED") {
                    return Self::Auth(AuthError::CodeExpired);
                }
                if s.is("PHONE_CODE_*") {
                    return Self::Auth(AuthError::InvalidCode);
                }
                if s.is("PASSWORD_HASH_INVALID") || s.is("SRP_ID_INVALID") {
                    return Self::Auth(AuthError::InvalidPassword);
                }
                if s.is("AUTH_KEY_UNREGISTERED") || s.code == 401 {
                    return Self::Auth(AuthError::NotAuthorized);
                }
                if s.is("*_FORBIDDEN") || s.code == 403 {
                    return Self::PermissionDenied(s.name.clone());
                }
                if s.is("PEER_ID_INVALID")
                    || s.is("INVITE_HASH_INVALID")
                    || s.is("PHONE_NUMBER_INVALID")
                    || s.is("*_NOT_FOUND")
                    || s.code == 404
                {
                    return Self::NotFound(s.name.clone());
                }
                Self::Connection(s.to_string())
            }
            RemoteError::Io(_) | RemoteError::Dropped | RemoteError::Timeout => {
                Self::Connection(e.to_string())
            }
            RemoteError::Payload(_) => Self::Connection(e.to_string()),
        }
    }
}

impl CoreError {
    /// Machine-checkable kind tag carried on gateway error frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_)           => "connection",
            Self::Auth(_)                 => "auth",
            Self::InvalidLoginState { .. } => "invalid_login_state",
            Self::PermissionDenied(_)     => "permission_denied",
            Self::RateLimited { .. }      => "rate_limited",
            Self::NotFound(_)             => "not_found",
            Self::UnknownAccount(_)       => "not_found",
            Self::Corrupt(_)              => "internal",
        }
    }
}
