//! Identifier newtypes.
//!
//! Numeric ids come straight from the remote service; [`AccountId`] is minted
//! on this side and stays stable for the lifetime of the account record.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── AccountId ────────────────────────────────────────────────────────────────

/// Stable, opaque identifier for one managed account.
///
/// Relay-minted ids derive from the remote user id (`acc_<user id>`); ids
/// imported from the legacy `phone:token` session format derive from the
/// phone number instead and are rewritten to the canonical form on their
/// first successful resume. Ids supplied by a subscriber during `auth` are
/// taken as-is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical id for a remote user: `acc_<user id>`.
    pub fn from_user_id(user_id: UserId) -> Self {
        Self(format!("acc_{}", user_id.0))
    }

    /// Id minted by the legacy session import: `acc_ph_<digits>`.
    pub fn from_phone(phone: &str) -> Self {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        Self(format!("acc_ph_{digits}"))
    }

    /// True for ids minted by [`AccountId::from_phone`]; these migrate to
    /// the canonical `acc_<user id>` key on the first successful resume.
    pub fn is_legacy_phone(&self) -> bool {
        self.0.starts_with("acc_ph_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Numeric ids ──────────────────────────────────────────────────────────────

/// Remote chat id. Unique per remote chat; the same chat may be visible to
/// several accounts, so local uniqueness is `(owner account, chat id)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Message id, unique within its chat, issued in send order by the service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// Remote user id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
