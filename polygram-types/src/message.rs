//! The canonical message entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, UserId};

/// One unit of conversation content.
///
/// Ordering within a chat is `(timestamp, id)` ascending — the id breaks
/// same-second ties because the service issues ids in send order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id:        MessageId,
    pub chat_id:   ChatId,
    pub sender_id: UserId,
    pub text:      String,
    /// Unix seconds, service clock.
    pub timestamp: i64,
    /// Sent by the owning account itself (possibly from another device).
    #[serde(rename = "isFromSelf", default)]
    pub from_self: bool,
    /// Emoji → count, sorted for a stable wire shape.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, u32>,
    #[serde(rename = "readState", default)]
    pub read:      bool,
    #[serde(rename = "replyToId", default, skip_serializing_if = "Option::is_none")]
    pub reply_to:  Option<MessageId>,
    #[serde(default)]
    pub edited:    bool,
    #[serde(default)]
    pub forwarded: bool,
}

impl Message {
    /// Sort key honoring the `(timestamp, id)` invariant.
    pub fn ordering_key(&self) -> (i64, i64) {
        (self.timestamp, self.id.0)
    }

    /// Whether the text mentions `handle` (leading `@`, case-insensitive,
    /// not embedded in a longer handle).
    pub fn mentions(&self, handle: &str) -> bool {
        if handle.is_empty() {
            return false;
        }
        let text = self.text.to_ascii_lowercase();
        let needle = format!("@{}", handle.trim_start_matches('@').to_ascii_lowercase());
        let mut from = 0;
        while let Some(pos) = text[from..].find(&needle) {
            let end = from + pos + needle.len();
            match text[end..].chars().next() {
                Some(c) if c.is_ascii_alphanumeric() || c == '_' => from = end,
                _ => return true,
            }
        }
        false
    }
}
