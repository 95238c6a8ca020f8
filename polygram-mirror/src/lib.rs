//! A headless client-side mirror of the relay's state.
//!
//! `Mirror` consumes gateway [`ServerFrame`]s in arrival order and maintains
//! the same view a UI would render: accounts, chat lists, per-chat history,
//! typing indicators, notifications. It is a pure data structure — no I/O,
//! no clock — and it never assumes a command succeeded until the resulting
//! frame (or an `ok`/`error`) arrives, which makes it honest about what the
//! relay has actually confirmed.
//!
//! Reconciliation rules mirror the relay's own: pushed messages keep
//! `(timestamp, id)` order with duplicate ids replacing in place (edits),
//! while `chats`/`chatHistory` responses are authoritative — fetched wins.

#![deny(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use polygram_gateway::ServerFrame;
use polygram_types::{
    AccountId, AccountInfo, Chat, ChatId, LastMessage, Message, MessageId, PromptKind, UserId,
};

// ─── AccountView ──────────────────────────────────────────────────────────────

/// Everything the mirror knows about one account.
#[derive(Default)]
pub struct AccountView {
    pub info:           Option<AccountInfo>,
    /// Relay-side link state, from `connectionState` frames.
    pub online:         bool,
    chats:              BTreeMap<ChatId, Chat>,
    history:            BTreeMap<ChatId, Vec<Message>>,
    typing:             BTreeMap<ChatId, BTreeSet<UserId>>,
    user_status:        BTreeMap<UserId, bool>,
    pub notifications:  Vec<String>,
    pub mentions:       Vec<(ChatId, MessageId)>,
    /// What an interactive login is waiting for, if anything.
    pub pending_prompt: Option<PromptKind>,
}

impl AccountView {
    /// The chat list in display order: pinned first, then most recent.
    pub fn chats(&self) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self.chats.values().collect();
        chats.sort_by_key(|c| c.sort_key());
        chats
    }

    pub fn chat(&self, id: ChatId) -> Option<&Chat> {
        self.chats.get(&id)
    }

    /// Messages of a chat, oldest first.
    pub fn messages(&self, chat: ChatId) -> &[Message] {
        self.history.get(&chat).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn typing_users(&self, chat: ChatId) -> Vec<UserId> {
        self.typing
            .get(&chat)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_online(&self, user: UserId) -> Option<bool> {
        self.user_status.get(&user).copied()
    }

    fn insert_message(&mut self, message: Message) {
        let messages = self.history.entry(message.chat_id).or_default();
        if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }
        let at = messages.partition_point(|m| m.ordering_key() <= message.ordering_key());
        messages.insert(at, message);
    }

    fn remove_messages(&mut self, chat: ChatId, ids: &[MessageId]) {
        if let Some(messages) = self.history.get_mut(&chat) {
            messages.retain(|m| !ids.contains(&m.id));
        }
        if let Some(record) = self.chats.get_mut(&chat) {
            if record.last_message.as_ref().is_some_and(|m| ids.contains(&m.id)) {
                record.last_message = self
                    .history
                    .get(&chat)
                    .and_then(|m| m.last())
                    .map(LastMessage::of);
            }
        }
    }
}

// ─── Mirror ───────────────────────────────────────────────────────────────────

/// The whole mirrored state, all accounts.
#[derive(Default)]
pub struct Mirror {
    accounts:       BTreeMap<AccountId, AccountView>,
    /// The most recent `error` frame, cleared by the next `ok`.
    pub last_error: Option<String>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, id: &AccountId) -> Option<&AccountView> {
        self.accounts.get(id)
    }

    pub fn account_ids(&self) -> Vec<&AccountId> {
        self.accounts.keys().collect()
    }

    fn view(&mut self, id: &AccountId) -> &mut AccountView {
        self.accounts.entry(id.clone()).or_default()
    }

    /// Apply one frame. Frames must be fed in arrival order; the relay
    /// guarantees per-account ordering, which this relies on.
    pub fn apply(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::AuthSuccess { account_id, .. } => {
                self.view(&account_id);
            }
            ServerFrame::LoginCodeSent { account_id, .. }
            | ServerFrame::Login2faNeeded { account_id, .. } => {
                self.view(&account_id);
            }
            ServerFrame::LoginPrompt { account_id, kind } => {
                self.view(&account_id).pending_prompt = Some(kind);
            }
            ServerFrame::LoginSuccess { account_id, user, .. } => {
                let view = self.view(&account_id);
                view.info = Some(user);
                view.pending_prompt = None;
            }

            ServerFrame::NewMessage { account_id, chat_id, message } => {
                let view = self.view(&account_id);
                let incoming = !message.from_self;
                if let Some(record) = view.chats.get_mut(&chat_id) {
                    record.last_message = Some(LastMessage::of(&message));
                    if incoming {
                        record.unread_count += 1;
                    }
                }
                // A stale typing indicator for the sender is superseded.
                if let Some(set) = view.typing.get_mut(&chat_id) {
                    set.remove(&message.sender_id);
                }
                view.insert_message(message);
            }
            ServerFrame::MessageEdited { account_id, chat_id, message } => {
                let view = self.view(&account_id);
                if let Some(record) = view.chats.get_mut(&chat_id) {
                    if record.last_message.as_ref().is_some_and(|m| m.id == message.id) {
                        record.last_message = Some(LastMessage::of(&message));
                    }
                }
                view.insert_message(message);
            }
            ServerFrame::MessageDeleted { account_id, chat_id, message_ids } => {
                self.view(&account_id).remove_messages(chat_id, &message_ids);
            }

            ServerFrame::UserTyping { account_id, chat_id, user_id, typing } => {
                let set = self.view(&account_id).typing.entry(chat_id).or_default();
                if typing {
                    set.insert(user_id);
                } else {
                    set.remove(&user_id);
                }
            }
            ServerFrame::UserOnlineStatus { account_id, user_id, online } => {
                self.view(&account_id).user_status.insert(user_id, online);
            }

            ServerFrame::Notification { account_id, text } => {
                self.view(&account_id).notifications.push(text);
            }
            ServerFrame::Mention { account_id, chat_id, message_id } => {
                let view = self.view(&account_id);
                view.mentions.push((chat_id, message_id));
                if let Some(record) = view.chats.get_mut(&chat_id) {
                    record.has_mentions = true;
                }
                if let Some(info) = view.info.as_mut() {
                    info.has_mentions = true;
                }
            }

            ServerFrame::ChatUpdated { account_id, chat } => {
                self.view(&account_id).chats.insert(chat.id, chat);
            }
            ServerFrame::ConnectionState { account_id, online } => {
                self.view(&account_id).online = online;
            }

            // Fetched responses are authoritative for what they cover.
            ServerFrame::Chats { account_id, chats } => {
                let view = self.view(&account_id);
                for chat in chats {
                    view.chats.insert(chat.id, chat);
                }
            }
            ServerFrame::ChatHistory { account_id, chat_id, messages } => {
                let view = self.view(&account_id);
                for message in messages {
                    debug_assert_eq!(message.chat_id, chat_id);
                    view.insert_message(message);
                }
            }
            ServerFrame::Accounts { accounts } => {
                for info in accounts {
                    let id = info.id.clone();
                    self.view(&id).info = Some(info);
                }
            }

            ServerFrame::Ok { .. } => {
                self.last_error = None;
            }
            ServerFrame::Error { error, .. } => {
                self.last_error = Some(error);
            }
        }
    }
}
