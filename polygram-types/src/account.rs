//! Account-level types: summaries, session credentials, login steps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::AccountId;

// ─── SessionToken ─────────────────────────────────────────────────────────────

/// Opaque, serializable credential that re-establishes an account's
/// authenticated connection without repeating the login handshake.
///
/// The sole durable credential for an account — losing it means redoing the
/// whole login flow. `Debug` redacts the value so tokens cannot leak into
/// logs; they are persisted only by the session store and sent on the wire
/// only inside `login_success`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(…)")
    }
}

// ─── AccountInfo ──────────────────────────────────────────────────────────────

/// Account summary as exposed to subscribers.
///
/// Never carries the session token — credentials travel separately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id:           AccountId,
    pub display_name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle:       Option<String>,
    #[serde(rename = "isOnline", default)]
    pub online:       bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub has_mentions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref:   Option<String>,
}

impl AccountInfo {
    /// A placeholder record for an account that has not completed login yet.
    pub fn pending(id: AccountId) -> Self {
        Self {
            id,
            display_name: String::new(),
            phone_number: String::new(),
            handle:       None,
            online:       false,
            unread_count: 0,
            has_mentions: false,
            avatar_ref:   None,
        }
    }
}

// ─── Login steps & prompts ───────────────────────────────────────────────────

/// Step of an in-progress login, advancing strictly forward except for the
/// 2FA branch (`AwaitingCode` → `AwaitingPassword`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStep {
    Init,
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    Complete,
    Failed,
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init             => "init",
            Self::AwaitingPhone    => "awaiting_phone",
            Self::AwaitingCode     => "awaiting_code",
            Self::AwaitingPassword => "awaiting_password",
            Self::Complete         => "complete",
            Self::Failed           => "failed",
        };
        f.write_str(s)
    }
}

/// What an interactive login is currently waiting for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Phone,
    Code,
    Password,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Phone    => "phone",
            Self::Code     => "code",
            Self::Password => "password",
        };
        f.write_str(s)
    }
}
