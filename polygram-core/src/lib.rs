//! # polygram-core
//!
//! The multi-account session and event-routing core:
//!
//! - [`AccountManager`] — owns every account connection, the per-account
//!   broadcast buses, caches, login sessions, and persistence timers
//! - account connections — one remote session per account: pump,
//!   reconnect-with-saved-token, hard call timeouts
//! - login state machine ([`LoginSession`], [`PromptTable`]) — the
//!   phone → code → optional 2FA password handshake, usable both
//!   request/response and interactively over a suspended prompt
//! - [`SessionStore`] — atomic, corruption-tolerant token persistence
//! - [`MessageCache`] — bounded per-chat recent messages
//! - [`CoreError`] / [`AuthError`] — the typed failure taxonomy every raw
//!   service error is converted into at the connection boundary

#![deny(unsafe_code)]

mod cache;
mod connection;
mod error;
mod login;
mod manager;
mod session_store;
mod typing;

pub use cache::{DEFAULT_CHAT_CAPACITY, MessageCache};
pub use connection::CALL_TIMEOUT;
pub use error::{AuthError, CoreError};
pub use login::{CompletedLogin, LOGIN_STEP_TIMEOUT, LoginOutcome, LoginSession, PromptTable};
pub use manager::{AccountEvent, AccountManager, AuthStatus, ManagerConfig};
pub use session_store::SessionStore;
pub use typing::{TYPING_TTL, TypingTracker};
