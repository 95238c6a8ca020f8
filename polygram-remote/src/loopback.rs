//! A scriptable in-process implementation of the remote-service seam.
//!
//! `LoopbackService` plays the part of the real messaging service for tests
//! and demo runs: register phones (optionally with a 2FA password), seed
//! chats and messages, post inbound peer messages, and force-drop live
//! sessions to exercise reconnect paths. It speaks the exact raw payload
//! shapes that [`crate::payload`] validates, issues opaque session tokens
//! that survive across connects, and verifies SRP proofs server-side by
//! recomputing the transcript from the stored password.
//!
//! Unauthenticated sessions may only invoke login requests; anything else is
//! rejected with `AUTH_KEY_UNREGISTERED` (401), as is resuming an unknown
//! token.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use polygram_types::{ChatId, ChatKind, MessageId, SessionToken, UserId};

use crate::errors::{RemoteError, ServiceError};
use crate::srp::{self, PasswordChallenge, SrpProof};
use crate::{RemoteClient, RemoteConnector, RemoteRequest};

/// The login code the loopback accepts for every registered phone.
pub const LOGIN_CODE: &str = "24680";

// ─── World state ──────────────────────────────────────────────────────────────

struct UserRecord {
    id:       UserId,
    phone:    String,
    name:     String,
    handle:   Option<String>,
    password: Option<String>,
    online:   bool,
}

struct StoredMessage {
    id:        i64,
    from:      UserId,
    text:      String,
    date:      i64,
    reply_to:  Option<i64>,
    edited:    bool,
    forwarded: bool,
    /// emoji → set of reacting users; wire counts are the set sizes.
    reactions: BTreeMap<String, BTreeSet<i64>>,
}

struct ChatRecord {
    id:         ChatId,
    title:      String,
    kind:       ChatKind,
    members:    Vec<UserId>,
    messages:   Vec<StoredMessage>,
    pinned_by:  BTreeSet<i64>,
    muted_by:   BTreeSet<i64>,
    read_up_to: HashMap<UserId, i64>,
    invite:     Option<String>,
    can_send:   bool,
}

struct Link {
    user: Option<UserId>,
    tx:   mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct World {
    next_user_id:    i64,
    next_chat_id:    i64,
    next_message_id: i64,
    next_srp_id:     i64,
    next_link_id:    u64,
    users:           HashMap<UserId, UserRecord>,
    phones:          HashMap<String, UserId>,
    tokens:          HashMap<String, UserId>,
    chats:           HashMap<ChatId, ChatRecord>,
    /// phone_code_hash → phone, pending code submissions.
    codes:           HashMap<String, String>,
    /// srp_id → (challenge, server secret, phone).
    challenges:      HashMap<i64, (PasswordChallenge, Box<[u8; 256]>, String)>,
    links:           HashMap<u64, Link>,
}

impl World {
    fn raw_user(&self, u: &UserRecord) -> Value {
        json!({
            "_":      "user",
            "id":     u.id.0,
            "name":   u.name,
            "phone":  u.phone,
            "handle": u.handle,
            "online": u.online,
        })
    }

    fn raw_message(&self, m: &StoredMessage, chat: ChatId, viewer: UserId) -> Value {
        let reactions: BTreeMap<&String, usize> =
            m.reactions.iter().filter(|(_, who)| !who.is_empty()).map(|(e, who)| (e, who.len())).collect();
        let read = self
            .chats
            .get(&chat)
            .and_then(|c| c.read_up_to.get(&viewer))
            .is_some_and(|up_to| m.id <= *up_to);
        json!({
            "_":         "message",
            "id":        m.id,
            "chat_id":   chat.0,
            "from_id":   m.from.0,
            "text":      m.text,
            "date":      m.date,
            "out":       m.from == viewer,
            "read":      read,
            "reply_to":  m.reply_to,
            "edited":    m.edited,
            "forwarded": m.forwarded,
            "reactions": reactions,
        })
    }

    fn raw_chat(&self, c: &ChatRecord, viewer: UserId) -> Value {
        let read_up_to = c.read_up_to.get(&viewer).copied().unwrap_or(0);
        let unread = c
            .messages
            .iter()
            .filter(|m| m.id > read_up_to && m.from != viewer)
            .count();
        let kind = match c.kind {
            ChatKind::Private => "private",
            ChatKind::Group   => "group",
            ChatKind::Channel => "channel",
        };
        let participants: Vec<Value> = c
            .members
            .iter()
            .filter_map(|id| self.users.get(id))
            .map(|u| json!({"_": "member", "user_id": u.id.0, "name": u.name, "handle": u.handle}))
            .collect();
        json!({
            "_":            "chat",
            "id":           c.id.0,
            "title":        c.title,
            "kind":         kind,
            "unread_count": unread,
            "pinned":       c.pinned_by.contains(&viewer.0),
            "muted":        c.muted_by.contains(&viewer.0),
            "can_send":     c.can_send,
            "last_message": c.messages.last().map(|m| self.raw_message(m, c.id, viewer)),
            "participants": participants,
        })
    }

    /// Push `event(viewer)` to every live link of every member of `chat`.
    fn deliver_to_members(&self, chat: ChatId, event: impl Fn(UserId) -> Value) {
        let Some(record) = self.chats.get(&chat) else { return };
        for link in self.links.values() {
            if let Some(user) = link.user {
                if record.members.contains(&user) {
                    let _ = link.tx.send(event(user));
                }
            }
        }
    }

    fn deliver_to_user(&self, user: UserId, event: &Value) {
        for link in self.links.values() {
            if link.user == Some(user) {
                let _ = link.tx.send(event.clone());
            }
        }
    }
}

fn service_err(code: i32, name: &str) -> RemoteError {
    RemoteError::Service(ServiceError::from_remote(code, name))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn random_token(bytes: usize) -> Result<String, RemoteError> {
    let mut buf = vec![0u8; bytes];
    getrandom::getrandom(&mut buf)
        .map_err(|e| RemoteError::Payload(format!("no entropy for token: {e}")))?;
    Ok(B64.encode(buf))
}

// ─── LoopbackService ──────────────────────────────────────────────────────────

/// The scriptable service; clone the `Arc` freely, all state is shared.
#[derive(Clone, Default)]
pub struct LoopbackService {
    world: Arc<Mutex<World>>,
}

impl LoopbackService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a phone number. Logins for it accept [`LOGIN_CODE`]; a
    /// `password` additionally requires the SRP 2FA step.
    pub fn register_user(
        &self,
        phone:    &str,
        name:     &str,
        handle:   Option<&str>,
        password: Option<&str>,
    ) -> UserId {
        let mut w = self.world.lock().unwrap();
        w.next_user_id += 1;
        let id = UserId(w.next_user_id);
        w.users.insert(id, UserRecord {
            id,
            phone:    phone.to_string(),
            name:     name.to_string(),
            handle:   handle.map(str::to_string),
            password: password.map(str::to_string),
            online:   false,
        });
        w.phones.insert(phone.to_string(), id);
        id
    }

    /// Create a chat with the given members. Private chats get their title
    /// as-is; membership is fixed until [`RemoteRequest::JoinChat`].
    pub fn create_chat(&self, title: &str, kind: ChatKind, members: &[UserId]) -> ChatId {
        let mut w = self.world.lock().unwrap();
        w.next_chat_id += 1;
        let id = ChatId(w.next_chat_id);
        w.chats.insert(id, ChatRecord {
            id,
            title:      title.to_string(),
            kind,
            members:    members.to_vec(),
            messages:   Vec::new(),
            pinned_by:  BTreeSet::new(),
            muted_by:   BTreeSet::new(),
            read_up_to: HashMap::new(),
            invite:     None,
            can_send:   true,
        });
        id
    }

    /// Attach an invite string so [`RemoteRequest::JoinChat`] can find the chat.
    pub fn open_invite(&self, chat: ChatId, invite: &str) {
        let mut w = self.world.lock().unwrap();
        if let Some(c) = w.chats.get_mut(&chat) {
            c.invite = Some(invite.to_string());
        }
    }

    /// Forbid sending into a chat (send attempts get `CHAT_WRITE_FORBIDDEN`).
    pub fn forbid_sending(&self, chat: ChatId) {
        let mut w = self.world.lock().unwrap();
        if let Some(c) = w.chats.get_mut(&chat) {
            c.can_send = false;
        }
    }

    /// Post a message into a chat on behalf of `from`, delivering
    /// `updateNewMessage` to every member's live sessions.
    pub fn post_message(&self, chat: ChatId, from: UserId, text: &str) -> Option<MessageId> {
        let mut w = self.world.lock().unwrap();
        w.next_message_id += 1;
        let id = w.next_message_id;
        let record = w.chats.get_mut(&chat)?;
        record.messages.push(StoredMessage {
            id,
            from,
            text: text.to_string(),
            date: now_unix(),
            reply_to: None,
            edited: false,
            forwarded: false,
            reactions: BTreeMap::new(),
        });
        w.deliver_to_members(chat, |viewer| {
            let m = w.chats[&chat].messages.iter().rev().find(|m| m.id == id);
            json!({"_": "updateNewMessage", "message": m.map(|m| w.raw_message(m, chat, viewer))})
        });
        Some(MessageId(id))
    }

    /// Mark a user online/offline and tell everyone who shares a chat.
    pub fn set_online(&self, user: UserId, online: bool) {
        let mut w = self.world.lock().unwrap();
        if let Some(u) = w.users.get_mut(&user) {
            u.online = online;
        }
        let event = json!({"_": "updateUserStatus", "user_id": user.0, "online": online});
        let peers: BTreeSet<i64> = w
            .chats
            .values()
            .filter(|c| c.members.contains(&user))
            .flat_map(|c| c.members.iter().map(|m| m.0))
            .collect();
        for peer in peers {
            if peer != user.0 {
                w.deliver_to_user(UserId(peer), &event);
            }
        }
    }

    /// Sever every live session of `user`. Their clients see
    /// [`RemoteError::Dropped`] on the next event read; tokens stay valid,
    /// so a reconnect with the saved token succeeds.
    pub fn drop_sessions(&self, user: UserId) {
        let mut w = self.world.lock().unwrap();
        w.links.retain(|_, link| link.user != Some(user));
    }

    /// Invalidate a token (signed out from "another device"). Resuming with
    /// it afterwards fails with `AUTH_KEY_UNREGISTERED`.
    pub fn revoke_token(&self, token: &SessionToken) {
        let mut w = self.world.lock().unwrap();
        w.tokens.remove(token.as_str());
    }
}

#[async_trait]
impl RemoteConnector for LoopbackService {
    async fn connect(
        &self,
        token: Option<&SessionToken>,
    ) -> Result<Arc<dyn RemoteClient>, RemoteError> {
        let mut w = self.world.lock().unwrap();
        let user = match token {
            None => None,
            Some(t) => Some(
                w.tokens
                    .get(t.as_str())
                    .copied()
                    .ok_or_else(|| service_err(401, "AUTH_KEY_UNREGISTERED"))?,
            ),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        w.next_link_id += 1;
        let link_id = w.next_link_id;
        w.links.insert(link_id, Link { user, tx });
        Ok(Arc::new(LoopbackClient {
            world:         self.world.clone(),
            link_id,
            events:        tokio::sync::Mutex::new(rx),
            token:         Mutex::new(token.map(|t| t.as_str().to_string())),
            pending_phone: Mutex::new(None),
        }))
    }
}

// ─── LoopbackClient ───────────────────────────────────────────────────────────

struct LoopbackClient {
    world:         Arc<Mutex<World>>,
    link_id:       u64,
    events:        tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    token:         Mutex<Option<String>>,
    /// Phone mid-login, so the 2FA branch knows whose password to check.
    pending_phone: Mutex<Option<String>>,
}

impl LoopbackClient {
    fn current_user(&self, w: &World) -> Result<UserId, RemoteError> {
        w.links
            .get(&self.link_id)
            .and_then(|l| l.user)
            .ok_or_else(|| service_err(401, "AUTH_KEY_UNREGISTERED"))
    }

    /// Bind this link to `user` and mint a fresh token for it.
    fn authorize(&self, w: &mut World, user: UserId) -> Result<Value, RemoteError> {
        let token = random_token(16)?;
        w.tokens.insert(token.clone(), user);
        if let Some(link) = w.links.get_mut(&self.link_id) {
            link.user = Some(user);
        }
        *self.token.lock().unwrap() = Some(token);
        *self.pending_phone.lock().unwrap() = None;
        let raw = w.users.get(&user).map(|u| w.raw_user(u));
        Ok(json!({"_": "auth.authorization", "user": raw}))
    }

    fn member_chat<'w>(
        &self,
        w:    &'w World,
        user: UserId,
        chat: ChatId,
    ) -> Result<&'w ChatRecord, RemoteError> {
        w.chats
            .get(&chat)
            .filter(|c| c.members.contains(&user))
            .ok_or_else(|| service_err(400, "PEER_ID_INVALID"))
    }
}

#[async_trait]
impl RemoteClient for LoopbackClient {
    async fn invoke(&self, req: RemoteRequest) -> Result<Value, RemoteError> {
        use RemoteRequest::*;

        // Login requests are the only ones allowed without authorization.
        match &req {
            RequestLoginCode { phone } => {
                let mut w = self.world.lock().unwrap();
                if !w.phones.contains_key(phone) {
                    return Err(service_err(400, "PHONE_NUMBER_INVALID"));
                }
                let hash = random_token(9)?;
                w.codes.insert(hash.clone(), phone.clone());
                *self.pending_phone.lock().unwrap() = Some(phone.clone());
                return Ok(json!({"_": "auth.sentCode", "phone_code_hash": hash}));
            }
            SubmitCode { phone, phone_code_hash, code } => {
                let mut w = self.world.lock().unwrap();
                match w.codes.get(phone_code_hash) {
                    Some(p) if p == phone => {}
                    _ => return Err(service_err(400, "PHONE_CODE_EXPIRED")),
                }
                if code != LOGIN_CODE {
                    // Hash stays registered so the same step can be retried.
                    return Err(service_err(400, "PHONE_CODE_INVALID"));
                }
                w.codes.remove(phone_code_hash);
                let user = *w.phones.get(phone).ok_or_else(|| service_err(400, "PHONE_NUMBER_INVALID"))?;
                let has_password = w.users[&user].password.is_some();
                if has_password {
                    *self.pending_phone.lock().unwrap() = Some(phone.clone());
                    return Err(service_err(401, "SESSION_PASSWORD_NEEDED"));
                }
                return self.authorize(&mut w, user);
            }
            GetPasswordChallenge => {
                let mut w = self.world.lock().unwrap();
                let phone = self
                    .pending_phone
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| service_err(400, "SRP_ID_INVALID"))?;
                let user = *w.phones.get(&phone).ok_or_else(|| service_err(400, "SRP_ID_INVALID"))?;
                let password = w.users[&user]
                    .password
                    .clone()
                    .ok_or_else(|| service_err(400, "SRP_ID_INVALID"))?;
                w.next_srp_id += 1;
                let srp_id = w.next_srp_id;
                let (challenge, b) = srp::issue_challenge(srp_id, &password, None)?;
                let reply = json!({
                    "_":      "account.password",
                    "srp_id": challenge.srp_id,
                    "g":      challenge.g,
                    "p":      B64.encode(&challenge.p),
                    "salt1":  B64.encode(&challenge.salt1),
                    "salt2":  B64.encode(&challenge.salt2),
                    "g_b":    B64.encode(&challenge.g_b),
                    "hint":   challenge.hint,
                });
                w.challenges.insert(srp_id, (challenge, Box::new(b), phone));
                return Ok(reply);
            }
            CheckPassword { srp_id, g_a, m1 } => {
                let mut w = self.world.lock().unwrap();
                let (challenge, b, phone) = w
                    .challenges
                    .remove(srp_id)
                    .ok_or_else(|| service_err(400, "SRP_ID_INVALID"))?;
                let (Ok(g_a), Ok(m1)) = (<[u8; 256]>::try_from(g_a.as_slice()), <[u8; 32]>::try_from(m1.as_slice()))
                else {
                    return Err(service_err(400, "PASSWORD_HASH_INVALID"));
                };
                let user = *w.phones.get(&phone).ok_or_else(|| service_err(400, "SRP_ID_INVALID"))?;
                let password = w.users[&user].password.clone().unwrap_or_default();
                let proof = SrpProof { srp_id: *srp_id, g_a, m1 };
                if !srp::verify_proof(&challenge, &b, &password, &proof) {
                    return Err(service_err(400, "PASSWORD_HASH_INVALID"));
                }
                return self.authorize(&mut w, user);
            }
            _ => {}
        }

        let mut w = self.world.lock().unwrap();
        let user = self.current_user(&w)?;

        match req {
            GetMe => {
                let u = w.users.get(&user).ok_or_else(|| service_err(401, "AUTH_KEY_UNREGISTERED"))?;
                Ok(w.raw_user(u))
            }
            GetDialogs { limit } => {
                let mut chats: Vec<&ChatRecord> =
                    w.chats.values().filter(|c| c.members.contains(&user)).collect();
                chats.sort_by_key(|c| std::cmp::Reverse(c.messages.last().map(|m| m.date).unwrap_or(0)));
                chats.truncate(limit as usize);
                let raw: Vec<Value> = chats.iter().map(|c| w.raw_chat(c, user)).collect();
                Ok(json!({"_": "messages.dialogs", "chats": raw}))
            }
            GetHistory { chat_id, limit, before_id } => {
                let record = self.member_chat(&w, user, chat_id)?;
                let raw: Vec<Value> = record
                    .messages
                    .iter()
                    .rev()
                    .filter(|m| before_id.is_none_or(|b| m.id < b.0))
                    .take(limit as usize)
                    .map(|m| w.raw_message(m, chat_id, user))
                    .collect();
                Ok(json!({"_": "messages.messages", "messages": raw}))
            }
            SendMessage { chat_id, text, reply_to } => {
                {
                    let record = self.member_chat(&w, user, chat_id)?;
                    if !record.can_send {
                        return Err(service_err(403, "CHAT_WRITE_FORBIDDEN"));
                    }
                }
                w.next_message_id += 1;
                let id = w.next_message_id;
                let message = StoredMessage {
                    id,
                    from: user,
                    text,
                    date: now_unix(),
                    reply_to: reply_to.map(|m| m.0),
                    edited: false,
                    forwarded: false,
                    reactions: BTreeMap::new(),
                };
                let reply = w.raw_message(&message, chat_id, user);
                w.chats.get_mut(&chat_id).map(|c| c.messages.push(message));
                w.deliver_to_members(chat_id, |viewer| {
                    let m = w.chats[&chat_id].messages.iter().rev().find(|m| m.id == id);
                    json!({"_": "updateNewMessage", "message": m.map(|m| w.raw_message(m, chat_id, viewer))})
                });
                Ok(reply)
            }
            SetMuted { chat_id, muted } => {
                self.member_chat(&w, user, chat_id)?;
                let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                if muted {
                    record.muted_by.insert(user.0);
                } else {
                    record.muted_by.remove(&user.0);
                }
                Ok(w.raw_chat(&w.chats[&chat_id], user))
            }
            SetPinned { chat_id, pinned } => {
                self.member_chat(&w, user, chat_id)?;
                let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                if pinned {
                    record.pinned_by.insert(user.0);
                } else {
                    record.pinned_by.remove(&user.0);
                }
                Ok(w.raw_chat(&w.chats[&chat_id], user))
            }
            JoinChat { invite } => {
                let chat_id = w
                    .chats
                    .values()
                    .find(|c| c.invite.as_deref() == Some(invite.as_str()))
                    .map(|c| c.id)
                    .ok_or_else(|| service_err(400, "INVITE_HASH_INVALID"))?;
                let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "INVITE_HASH_INVALID"))?;
                if !record.members.contains(&user) {
                    record.members.push(user);
                }
                Ok(w.raw_chat(&w.chats[&chat_id], user))
            }
            SetTyping { chat_id, typing } => {
                self.member_chat(&w, user, chat_id)?;
                let event =
                    json!({"_": "updateUserTyping", "chat_id": chat_id.0, "user_id": user.0, "typing": typing});
                let members = w.chats[&chat_id].members.clone();
                for member in members {
                    if member != user {
                        w.deliver_to_user(member, &event);
                    }
                }
                Ok(json!({"_": "ok"}))
            }
            MarkRead { chat_id, up_to } => {
                self.member_chat(&w, user, chat_id)?;
                let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                let entry = record.read_up_to.entry(user).or_insert(0);
                *entry = (*entry).max(up_to.0);
                Ok(json!({"_": "ok"}))
            }
            SendReaction { chat_id, message_id, emoji } => {
                self.member_chat(&w, user, chat_id)?;
                {
                    let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                    let message = record
                        .messages
                        .iter_mut()
                        .find(|m| m.id == message_id.0)
                        .ok_or_else(|| service_err(400, "MESSAGE_NOT_FOUND"))?;
                    // One reaction per user: drop any previous one first.
                    for who in message.reactions.values_mut() {
                        who.remove(&user.0);
                    }
                    message.reactions.entry(emoji).or_default().insert(user.0);
                }
                w.deliver_to_members(chat_id, |viewer| {
                    let m = w.chats[&chat_id].messages.iter().find(|m| m.id == message_id.0);
                    json!({"_": "updateEditMessage", "message": m.map(|m| w.raw_message(m, chat_id, viewer))})
                });
                Ok(json!({"_": "ok"}))
            }
            RemoveReaction { chat_id, message_id } => {
                self.member_chat(&w, user, chat_id)?;
                {
                    let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                    let message = record
                        .messages
                        .iter_mut()
                        .find(|m| m.id == message_id.0)
                        .ok_or_else(|| service_err(400, "MESSAGE_NOT_FOUND"))?;
                    for who in message.reactions.values_mut() {
                        who.remove(&user.0);
                    }
                }
                w.deliver_to_members(chat_id, |viewer| {
                    let m = w.chats[&chat_id].messages.iter().find(|m| m.id == message_id.0);
                    json!({"_": "updateEditMessage", "message": m.map(|m| w.raw_message(m, chat_id, viewer))})
                });
                Ok(json!({"_": "ok"}))
            }
            DeleteMessage { chat_id, message_id } => {
                self.member_chat(&w, user, chat_id)?;
                {
                    let record = w.chats.get_mut(&chat_id).ok_or_else(|| service_err(400, "PEER_ID_INVALID"))?;
                    let before = record.messages.len();
                    record.messages.retain(|m| m.id != message_id.0);
                    if record.messages.len() == before {
                        return Err(service_err(400, "MESSAGE_NOT_FOUND"));
                    }
                }
                w.deliver_to_members(chat_id, |_| {
                    json!({"_": "updateDeleteMessages", "chat_id": chat_id.0, "messages": [message_id.0]})
                });
                Ok(json!({"_": "ok"}))
            }
            SignOut => {
                if let Some(token) = self.token.lock().unwrap().take() {
                    w.tokens.remove(&token);
                }
                if let Some(link) = w.links.get_mut(&self.link_id) {
                    link.user = None;
                }
                Ok(json!({"_": "ok"}))
            }
            RequestLoginCode { .. } | SubmitCode { .. } | GetPasswordChallenge
            | CheckPassword { .. } => unreachable!("handled above"),
        }
    }

    async fn next_event(&self) -> Result<Value, RemoteError> {
        self.events.lock().await.recv().await.ok_or(RemoteError::Dropped)
    }

    fn session_token(&self) -> SessionToken {
        SessionToken::new(self.token.lock().unwrap().clone().unwrap_or_default())
    }

    async fn close(&self) {
        let mut w = self.world.lock().unwrap();
        w.links.remove(&self.link_id);
    }
}
