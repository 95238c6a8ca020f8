//! Bounded per-chat message cache.
//!
//! Each chat keeps a `VecDeque` of at most `capacity` recent messages in
//! `(timestamp, id)` order, oldest first. Inserting past capacity evicts the
//! oldest entry; a duplicate id replaces in place (edits, reaction changes).
//! Eviction is local only — full history is always refetchable from the
//! service.

use std::collections::{HashMap, VecDeque};

use polygram_types::{ChatId, Message, MessageId};

pub const DEFAULT_CHAT_CAPACITY: usize = 100;

pub struct MessageCache {
    capacity: usize,
    chats:    HashMap<ChatId, VecDeque<Message>>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), chats: HashMap::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace one message, keeping order and the capacity bound.
    pub fn insert(&mut self, message: Message) {
        let queue = self.chats.entry(message.chat_id).or_default();

        if let Some(existing) = queue.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return;
        }

        // Common case: strictly newer than everything cached — push back.
        let key = message.ordering_key();
        if queue.back().is_none_or(|last| last.ordering_key() <= key) {
            queue.push_back(message);
        } else {
            let at = queue.partition_point(|m| m.ordering_key() <= key);
            queue.insert(at, message);
        }
        if queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Fold a fetched history page into the cache (fetched values win).
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for m in messages {
            self.insert(m);
        }
    }

    pub fn apply_delete(&mut self, chat: ChatId, ids: &[MessageId]) {
        if let Some(queue) = self.chats.get_mut(&chat) {
            queue.retain(|m| !ids.contains(&m.id));
        }
    }

    pub fn mark_read_up_to(&mut self, chat: ChatId, up_to: MessageId) {
        if let Some(queue) = self.chats.get_mut(&chat) {
            for m in queue.iter_mut() {
                if m.id <= up_to {
                    m.read = true;
                }
            }
        }
    }

    pub fn drop_chat(&mut self, chat: ChatId) {
        self.chats.remove(&chat);
    }

    /// The most recent `limit` cached messages for `chat`, oldest first.
    pub fn recent(&self, chat: ChatId, limit: usize) -> Vec<Message> {
        match self.chats.get(&chat) {
            None => Vec::new(),
            Some(queue) => {
                let skip = queue.len().saturating_sub(limit);
                queue.iter().skip(skip).cloned().collect()
            }
        }
    }

    pub fn len(&self, chat: ChatId) -> usize {
        self.chats.get(&chat).map(VecDeque::len).unwrap_or(0)
    }

    pub fn get(&self, chat: ChatId, id: MessageId) -> Option<&Message> {
        self.chats.get(&chat)?.iter().find(|m| m.id == id)
    }
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CHAT_CAPACITY)
    }
}
