//! # polygram-types — canonical entity schema
//!
//! One definition per entity, shared by every other polygram crate:
//!
//! | Module    | Contents                                              |
//! |-----------|-------------------------------------------------------|
//! | `ids`     | `AccountId`, `ChatId`, `MessageId`, `UserId` newtypes |
//! | `account` | `AccountInfo`, `SessionToken`, login step/prompt kinds |
//! | `chat`    | `Chat`, `ChatKind`, `Member`, `LastMessage`           |
//! | `message` | `Message` with `(timestamp, id)` ordering             |
//!
//! Remote-service payload quirks are normalized into these types at the
//! connection boundary and never leak past it; the gateway serializes the
//! same types onto the subscriber wire (camelCase field names).

mod account;
mod chat;
mod ids;
mod message;

pub use account::{AccountInfo, LoginStep, PromptKind, SessionToken};
pub use chat::{Chat, ChatKind, LastMessage, Member};
pub use ids::{AccountId, ChatId, MessageId, UserId};
pub use message::Message;
