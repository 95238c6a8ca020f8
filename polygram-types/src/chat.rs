//! Chat entities.
//!
//! A `Chat` is one conversation as seen by one account: the same remote chat
//! appears once per member account, so local uniqueness is
//! `(owner_account_id, id)`.

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChatId, MessageId, UserId};
use crate::message::Message;

// ─── ChatKind ─────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

// ─── Member ───────────────────────────────────────────────────────────────────

/// One participant of a group or channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id:      UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle:       Option<String>,
}

// ─── LastMessage ──────────────────────────────────────────────────────────────

/// Denormalized summary of a chat's most recent message, kept on the chat so
/// list views never need a history fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id:        MessageId,
    pub sender_id: UserId,
    pub excerpt:   String,
    pub timestamp: i64,
}

const EXCERPT_MAX: usize = 80;

impl LastMessage {
    pub fn of(message: &Message) -> Self {
        let mut excerpt = message.text.clone();
        if excerpt.len() > EXCERPT_MAX {
            // Truncate on a char boundary.
            let mut end = EXCERPT_MAX;
            while !excerpt.is_char_boundary(end) {
                end -= 1;
            }
            excerpt.truncate(end);
            excerpt.push('…');
        }
        Self {
            id:        message.id,
            sender_id: message.sender_id,
            excerpt,
            timestamp: message.timestamp,
        }
    }
}

// ─── Chat ─────────────────────────────────────────────────────────────────────

/// A conversation (private, group, or channel) visible to one account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id:               ChatId,
    pub owner_account_id: AccountId,
    pub title:            String,
    pub kind:             ChatKind,
    #[serde(default)]
    pub unread_count:     u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message:     Option<LastMessage>,
    #[serde(default)]
    pub pinned:           bool,
    #[serde(default)]
    pub muted:            bool,
    #[serde(default)]
    pub has_mentions:     bool,
    /// Derived from remote permission flags; send attempts are rejected
    /// locally when false.
    #[serde(default = "default_true")]
    pub can_send:         bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants:     Option<Vec<Member>>,
}

fn default_true() -> bool {
    true
}

impl Chat {
    /// Ordering key for chat lists: pinned first, then most recently active.
    pub fn sort_key(&self) -> (bool, i64, i64) {
        let last = self.last_message.as_ref().map(|m| m.timestamp).unwrap_or(0);
        // Negate so that sorting ascending puts pinned + newest first.
        (!self.pinned, -last, self.id.0)
    }
}
