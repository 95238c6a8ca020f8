//! # polygram-remote
//!
//! The seam between polygram and the remote messaging service.
//!
//! Everything above this crate talks to the service exclusively through the
//! [`RemoteConnector`] / [`RemoteClient`] traits: one request in, one
//! loosely-typed JSON reply out, plus a pull-based stream of raw push events.
//! The [`payload`] module is the single place where those raw values are
//! validated into the typed entities of `polygram-types` — unvalidated remote
//! data never crosses the crate boundary.
//!
//! Also here:
//! - [`ServiceError`] / [`RemoteError`] — the typed failure surface
//! - [`srp`] — the service's SRP-based 2FA password check (the real math,
//!   not a placeholder)
//! - [`ReconnectPolicy`] — bounded exponential backoff for (re)connects
//! - [`LoopbackService`] — a scriptable in-process service implementation
//!   for tests and demo runs

#![deny(unsafe_code)]

mod backoff;
mod errors;
pub mod loopback;
pub mod payload;
pub mod srp;

pub use backoff::{Backoff, NoRetries, ReconnectPolicy};
pub use errors::{RemoteError, ServiceError};
pub use loopback::LoopbackService;
pub use payload::RemoteEvent;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use polygram_types::{ChatId, MessageId, SessionToken};

// ─── RemoteRequest ────────────────────────────────────────────────────────────

/// One invocation of the remote service.
///
/// Every operation the relay performs maps 1:1 to exactly one of these; the
/// reply is a raw [`Value`] that the caller validates through [`payload`].
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteRequest {
    /// Fetch the authorized account's own user record.
    GetMe,
    /// Fetch the most recent dialogs (chats), newest first.
    GetDialogs { limit: u32 },
    /// Fetch message history for one chat, newest first, optionally only
    /// messages older than `before_id`.
    GetHistory { chat_id: ChatId, limit: u32, before_id: Option<MessageId> },
    SendMessage { chat_id: ChatId, text: String, reply_to: Option<MessageId> },
    SetMuted { chat_id: ChatId, muted: bool },
    SetPinned { chat_id: ChatId, pinned: bool },
    /// Join a chat via an invite string.
    JoinChat { invite: String },
    SetTyping { chat_id: ChatId, typing: bool },
    MarkRead { chat_id: ChatId, up_to: MessageId },
    SendReaction { chat_id: ChatId, message_id: MessageId, emoji: String },
    RemoveReaction { chat_id: ChatId, message_id: MessageId },
    DeleteMessage { chat_id: ChatId, message_id: MessageId },
    /// Login step 1: ask the service to send a code to `phone`.
    RequestLoginCode { phone: String },
    /// Login step 2: submit the received code together with the correlation
    /// hash issued by [`RemoteRequest::RequestLoginCode`].
    SubmitCode { phone: String, phone_code_hash: String, code: String },
    /// Fetch the current SRP parameters for the 2FA password check.
    GetPasswordChallenge,
    /// Login step 3 (2FA branch): submit the SRP proof.
    CheckPassword { srp_id: i64, g_a: Vec<u8>, m1: Vec<u8> },
    SignOut,
}

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Opens sessions against the remote service.
///
/// `None` starts a fresh, unauthenticated session (only login requests will
/// be accepted); `Some(token)` resumes a previously authorized one.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        token: Option<&SessionToken>,
    ) -> Result<Arc<dyn RemoteClient>, RemoteError>;
}

/// One live session with the remote service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Perform one request and return the raw reply.
    async fn invoke(&self, req: RemoteRequest) -> Result<Value, RemoteError>;

    /// Await the next raw push event for this session.
    ///
    /// Returns events in the exact order the service emitted them. Resolves
    /// to [`RemoteError::Dropped`] once the link is gone; events that occur
    /// while the link is down are lost, callers reconcile by refetching.
    async fn next_event(&self) -> Result<Value, RemoteError>;

    /// The session's current token. May differ from the token the session
    /// was opened with — the service is free to rotate it.
    fn session_token(&self) -> SessionToken;

    /// Tear the session down. Pending `next_event` calls resolve `Dropped`.
    async fn close(&self);
}
