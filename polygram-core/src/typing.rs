//! Inbound typing-state tracking.
//!
//! The service sends "user is typing" events but no reliable "stopped"
//! signal, so each entry auto-expires 5 seconds after its last refresh.
//! This bounds indicator staleness without any extra wire traffic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use polygram_types::{ChatId, UserId};

pub const TYPING_TTL: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct TypingTracker {
    entries: HashMap<(ChatId, UserId), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a typing update; `typing == false` removes the entry.
    pub fn set(&mut self, chat: ChatId, user: UserId, typing: bool) {
        if typing {
            self.entries.insert((chat, user), Instant::now());
        } else {
            self.entries.remove(&(chat, user));
        }
    }

    /// Users currently typing in `chat`, expired entries excluded.
    pub fn typing_users(&self, chat: ChatId) -> Vec<UserId> {
        let now = Instant::now();
        let mut users: Vec<UserId> = self
            .entries
            .iter()
            .filter(|((c, _), seen)| *c == chat && now.duration_since(**seen) < TYPING_TTL)
            .map(|((_, u), _)| *u)
            .collect();
        users.sort();
        users
    }

    /// Drop entries past their TTL. Called from the housekeeping tick.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, seen| now.duration_since(*seen) < TYPING_TTL);
    }
}
