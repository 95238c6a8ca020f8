//! Validation boundary for raw service payloads.
//!
//! Replies and push events arrive as JSON objects tagged by a `"_"`
//! constructor key. Nothing above this module ever touches those values
//! directly: each parser here either produces a typed entity or a
//! [`RemoteError::Payload`] naming the offending field. Missing optional
//! fields take defaults; missing required fields are errors, not panics.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde_json::Value;

use polygram_types::{
    AccountId, AccountInfo, Chat, ChatId, ChatKind, LastMessage, Member, Message, MessageId,
    UserId,
};

use crate::errors::RemoteError;
use crate::srp::PasswordChallenge;

// ─── RemoteEvent ──────────────────────────────────────────────────────────────

/// A validated push event from one account's session.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteEvent {
    NewMessage(Message),
    MessageEdited(Message),
    MessageDeleted { chat_id: ChatId, message_ids: Vec<MessageId> },
    Typing { chat_id: ChatId, user_id: UserId, typing: bool },
    Online { user_id: UserId, online: bool },
    ChatUpdated(Chat),
    /// The service revoked this session's authorization (signed out from
    /// another device). The token is dead; the account must re-login.
    SessionRevoked,
}

// ─── Field access helpers ─────────────────────────────────────────────────────

fn err(what: &str) -> RemoteError {
    RemoteError::Payload(what.to_string())
}

fn obj<'v>(v: &'v Value, what: &str) -> Result<&'v serde_json::Map<String, Value>, RemoteError> {
    v.as_object().ok_or_else(|| err(&format!("{what}: expected object")))
}

fn tag<'v>(v: &'v Value) -> Result<&'v str, RemoteError> {
    v.get("_").and_then(Value::as_str).ok_or_else(|| err("missing \"_\" constructor tag"))
}

fn expect_tag(v: &Value, want: &str) -> Result<(), RemoteError> {
    let got = tag(v)?;
    if got == want {
        Ok(())
    } else {
        Err(err(&format!("expected constructor {want:?}, got {got:?}")))
    }
}

fn req_i64(v: &Value, field: &str) -> Result<i64, RemoteError> {
    v.get(field).and_then(Value::as_i64).ok_or_else(|| err(&format!("missing field {field:?}")))
}

fn req_str<'v>(v: &'v Value, field: &str) -> Result<&'v str, RemoteError> {
    v.get(field).and_then(Value::as_str).ok_or_else(|| err(&format!("missing field {field:?}")))
}

fn opt_str(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(Value::as_str).map(str::to_string)
}

fn opt_bool(v: &Value, field: &str) -> bool {
    v.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn opt_i64(v: &Value, field: &str) -> Option<i64> {
    v.get(field).and_then(Value::as_i64)
}

fn b64_field(v: &Value, field: &str) -> Result<Vec<u8>, RemoteError> {
    B64.decode(req_str(v, field)?)
        .map_err(|_| err(&format!("field {field:?} is not valid base64")))
}

// ─── Entity parsers ───────────────────────────────────────────────────────────

/// `{"_":"message", ...}` → [`Message`].
pub fn parse_message(v: &Value) -> Result<Message, RemoteError> {
    expect_tag(v, "message")?;
    let mut reactions = BTreeMap::new();
    if let Some(map) = v.get("reactions").and_then(Value::as_object) {
        for (emoji, count) in map {
            reactions.insert(emoji.clone(), count.as_u64().unwrap_or(0) as u32);
        }
    }
    Ok(Message {
        id:        MessageId(req_i64(v, "id")?),
        chat_id:   ChatId(req_i64(v, "chat_id")?),
        sender_id: UserId(req_i64(v, "from_id")?),
        text:      opt_str(v, "text").unwrap_or_default(),
        timestamp: req_i64(v, "date")?,
        from_self: opt_bool(v, "out"),
        reactions,
        read:      opt_bool(v, "read"),
        reply_to:  opt_i64(v, "reply_to").map(MessageId),
        edited:    opt_bool(v, "edited"),
        forwarded: opt_bool(v, "forwarded"),
    })
}

/// `{"_":"chat", ...}` → [`Chat`] owned by `owner`.
pub fn parse_chat(owner: &AccountId, v: &Value) -> Result<Chat, RemoteError> {
    expect_tag(v, "chat")?;
    let kind = match req_str(v, "kind")? {
        "private" => ChatKind::Private,
        "group"   => ChatKind::Group,
        "channel" => ChatKind::Channel,
        other     => return Err(err(&format!("unknown chat kind {other:?}"))),
    };
    let last_message = match v.get("last_message") {
        Some(Value::Null) | None => None,
        Some(raw) => {
            let m = parse_message(raw)?;
            Some(LastMessage::of(&m))
        }
    };
    let participants = match v.get("participants").and_then(Value::as_array) {
        None => None,
        Some(raw) => {
            let mut members = Vec::with_capacity(raw.len());
            for entry in raw {
                let entry_obj = obj(entry, "participant")?;
                members.push(Member {
                    user_id:      UserId(req_i64(entry, "user_id")?),
                    display_name: opt_str(entry, "name").unwrap_or_default(),
                    handle:       entry_obj.get("handle").and_then(Value::as_str).map(str::to_string),
                });
            }
            Some(members)
        }
    };
    Ok(Chat {
        id:               ChatId(req_i64(v, "id")?),
        owner_account_id: owner.clone(),
        title:            req_str(v, "title")?.to_string(),
        kind,
        unread_count:     opt_i64(v, "unread_count").unwrap_or(0).max(0) as u32,
        last_message,
        pinned:           opt_bool(v, "pinned"),
        muted:            opt_bool(v, "muted"),
        has_mentions:     opt_bool(v, "has_mentions"),
        can_send:         v.get("can_send").and_then(Value::as_bool).unwrap_or(true),
        participants,
    })
}

/// `{"_":"user", ...}` → [`AccountInfo`] with a relay-minted canonical id.
pub fn parse_account(v: &Value) -> Result<AccountInfo, RemoteError> {
    expect_tag(v, "user")?;
    let user_id = UserId(req_i64(v, "id")?);
    Ok(AccountInfo {
        id:           AccountId::from_user_id(user_id),
        display_name: opt_str(v, "name").unwrap_or_default(),
        phone_number: opt_str(v, "phone").unwrap_or_default(),
        handle:       opt_str(v, "handle"),
        online:       opt_bool(v, "online"),
        unread_count: 0,
        has_mentions: false,
        avatar_ref:   opt_str(v, "avatar"),
    })
}

/// The remote user id carried by a `{"_":"user"}` payload.
pub fn parse_user_id(v: &Value) -> Result<UserId, RemoteError> {
    expect_tag(v, "user")?;
    Ok(UserId(req_i64(v, "id")?))
}

/// `{"_":"auth.sentCode", ...}` → the `phone_code_hash` correlation token.
pub fn parse_login_sent(v: &Value) -> Result<String, RemoteError> {
    expect_tag(v, "auth.sentCode")?;
    Ok(req_str(v, "phone_code_hash")?.to_string())
}

/// `{"_":"account.password", ...}` → [`PasswordChallenge`].
pub fn parse_password_challenge(v: &Value) -> Result<PasswordChallenge, RemoteError> {
    expect_tag(v, "account.password")?;
    Ok(PasswordChallenge {
        srp_id: req_i64(v, "srp_id")?,
        g:      req_i64(v, "g")? as u32,
        p:      b64_field(v, "p")?,
        salt1:  b64_field(v, "salt1")?,
        salt2:  b64_field(v, "salt2")?,
        g_b:    b64_field(v, "g_b")?,
        hint:   opt_str(v, "hint"),
    })
}

/// `{"_":"auth.authorization","user":{...}}` → the authorized account.
pub fn parse_authorization(v: &Value) -> Result<AccountInfo, RemoteError> {
    expect_tag(v, "auth.authorization")?;
    let user = v.get("user").ok_or_else(|| err("authorization without user"))?;
    parse_account(user)
}

/// `{"_":"messages.dialogs","chats":[...]}` → chats owned by `owner`.
pub fn parse_dialogs(owner: &AccountId, v: &Value) -> Result<Vec<Chat>, RemoteError> {
    expect_tag(v, "messages.dialogs")?;
    let raw = v
        .get("chats")
        .and_then(Value::as_array)
        .ok_or_else(|| err("dialogs without chats array"))?;
    raw.iter().map(|c| parse_chat(owner, c)).collect()
}

/// `{"_":"messages.messages","messages":[...]}` → message page.
pub fn parse_history(v: &Value) -> Result<Vec<Message>, RemoteError> {
    expect_tag(v, "messages.messages")?;
    let raw = v
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| err("history without messages array"))?;
    raw.iter().map(parse_message).collect()
}

// ─── Event parser ─────────────────────────────────────────────────────────────

/// Validate one raw push event for the account `owner`.
pub fn parse_event(owner: &AccountId, v: &Value) -> Result<RemoteEvent, RemoteError> {
    match tag(v)? {
        "updateNewMessage" => {
            let raw = v.get("message").ok_or_else(|| err("updateNewMessage without message"))?;
            Ok(RemoteEvent::NewMessage(parse_message(raw)?))
        }
        "updateEditMessage" => {
            let raw = v.get("message").ok_or_else(|| err("updateEditMessage without message"))?;
            Ok(RemoteEvent::MessageEdited(parse_message(raw)?))
        }
        "updateDeleteMessages" => {
            let ids = v
                .get("messages")
                .and_then(Value::as_array)
                .ok_or_else(|| err("updateDeleteMessages without messages array"))?
                .iter()
                .filter_map(Value::as_i64)
                .map(MessageId)
                .collect();
            Ok(RemoteEvent::MessageDeleted {
                chat_id:     ChatId(req_i64(v, "chat_id")?),
                message_ids: ids,
            })
        }
        "updateUserTyping" => Ok(RemoteEvent::Typing {
            chat_id: ChatId(req_i64(v, "chat_id")?),
            user_id: UserId(req_i64(v, "user_id")?),
            typing:  opt_bool(v, "typing"),
        }),
        "updateUserStatus" => Ok(RemoteEvent::Online {
            user_id: UserId(req_i64(v, "user_id")?),
            online:  opt_bool(v, "online"),
        }),
        "updateChat" => {
            let raw = v.get("chat").ok_or_else(|| err("updateChat without chat"))?;
            Ok(RemoteEvent::ChatUpdated(parse_chat(owner, raw)?))
        }
        "updateSessionRevoked" => Ok(RemoteEvent::SessionRevoked),
        other => Err(err(&format!("unknown update constructor {other:?}"))),
    }
}
