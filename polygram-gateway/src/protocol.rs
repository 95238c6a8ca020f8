//! The wire protocol: flat JSON frames tagged by `type`.
//!
//! Every frame is one JSON object; the `type` value selects the variant and
//! the remaining fields are camelCase. Client frames keep the historical
//! mixed tag style (`login_phone` vs `sendMessage`) because deployed UIs
//! already speak it. Frame shapes are pinned by `tests/protocol.rs`; the
//! mirror crate parses them byte-for-byte.

use serde::{Deserialize, Serialize};

use polygram_types::{
    AccountId, AccountInfo, Chat, ChatId, Message, MessageId, PromptKind, UserId,
};

// ─── Client → server ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Subscribe to (and, when needed, resume) an account.
    #[serde(rename = "auth", rename_all = "camelCase")]
    Auth { account_id: AccountId },

    #[serde(rename = "login_phone", rename_all = "camelCase")]
    LoginPhone { account_id: AccountId, phone_number: String },

    #[serde(rename = "login_code", rename_all = "camelCase")]
    LoginCode {
        account_id:      AccountId,
        phone_number:    String,
        phone_code_hash: String,
        code:            String,
    },

    #[serde(rename = "login_2fa", rename_all = "camelCase")]
    Login2fa { account_id: AccountId, password: String },

    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        account_id: AccountId,
        chat_id:    ChatId,
        message:    String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<MessageId>,
    },

    #[serde(rename = "toggleMute", rename_all = "camelCase")]
    ToggleMute { account_id: AccountId, chat_id: ChatId, muted: bool },

    #[serde(rename = "togglePin", rename_all = "camelCase")]
    TogglePin { account_id: AccountId, chat_id: ChatId, pinned: bool },

    #[serde(rename = "markAsRead", rename_all = "camelCase")]
    MarkAsRead { account_id: AccountId, chat_id: ChatId },

    #[serde(rename = "getChats", rename_all = "camelCase")]
    GetChats {
        account_id: AccountId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit:      Option<usize>,
    },

    #[serde(rename = "getChatHistory", rename_all = "camelCase")]
    GetChatHistory {
        account_id: AccountId,
        chat_id:    ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit:      Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset_id:  Option<MessageId>,
    },

    #[serde(rename = "getAccounts")]
    GetAccounts {},

    #[serde(rename = "removeAccount", rename_all = "camelCase")]
    RemoveAccount { account_id: AccountId },

    #[serde(rename = "joinChat", rename_all = "camelCase")]
    JoinChat { account_id: AccountId, invite: String },

    #[serde(rename = "setTyping", rename_all = "camelCase")]
    SetTyping { account_id: AccountId, chat_id: ChatId, typing: bool },

    #[serde(rename = "sendReaction", rename_all = "camelCase")]
    SendReaction {
        account_id: AccountId,
        chat_id:    ChatId,
        message_id: MessageId,
        emoji:      String,
    },

    #[serde(rename = "removeReaction", rename_all = "camelCase")]
    RemoveReaction { account_id: AccountId, chat_id: ChatId, message_id: MessageId },

    #[serde(rename = "deleteMessage", rename_all = "camelCase")]
    DeleteMessage { account_id: AccountId, chat_id: ChatId, message_id: MessageId },
}

impl ClientFrame {
    /// The account a frame operates on; `None` for connection-scoped frames.
    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            Self::Auth { account_id }
            | Self::LoginPhone { account_id, .. }
            | Self::LoginCode { account_id, .. }
            | Self::Login2fa { account_id, .. }
            | Self::SendMessage { account_id, .. }
            | Self::ToggleMute { account_id, .. }
            | Self::TogglePin { account_id, .. }
            | Self::MarkAsRead { account_id, .. }
            | Self::GetChats { account_id, .. }
            | Self::GetChatHistory { account_id, .. }
            | Self::RemoveAccount { account_id }
            | Self::JoinChat { account_id, .. }
            | Self::SetTyping { account_id, .. }
            | Self::SendReaction { account_id, .. }
            | Self::RemoveReaction { account_id, .. }
            | Self::DeleteMessage { account_id, .. } => Some(account_id),
            Self::GetAccounts {} => None,
        }
    }

    /// The tag value, used as the `op` of `ok` acks.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Auth { .. }           => "auth",
            Self::LoginPhone { .. }     => "login_phone",
            Self::LoginCode { .. }      => "login_code",
            Self::Login2fa { .. }       => "login_2fa",
            Self::SendMessage { .. }    => "sendMessage",
            Self::ToggleMute { .. }     => "toggleMute",
            Self::TogglePin { .. }      => "togglePin",
            Self::MarkAsRead { .. }     => "markAsRead",
            Self::GetChats { .. }       => "getChats",
            Self::GetChatHistory { .. } => "getChatHistory",
            Self::GetAccounts {}        => "getAccounts",
            Self::RemoveAccount { .. }  => "removeAccount",
            Self::JoinChat { .. }       => "joinChat",
            Self::SetTyping { .. }      => "setTyping",
            Self::SendReaction { .. }   => "sendReaction",
            Self::RemoveReaction { .. } => "removeReaction",
            Self::DeleteMessage { .. }  => "deleteMessage",
        }
    }
}

// ─── Server → client ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "auth_success", rename_all = "camelCase")]
    AuthSuccess {
        account_id:  AccountId,
        has_session: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        needs_login: Option<bool>,
    },

    #[serde(rename = "login_code_sent", rename_all = "camelCase")]
    LoginCodeSent { account_id: AccountId, phone_code_hash: String },

    #[serde(rename = "login_2fa_needed", rename_all = "camelCase")]
    Login2faNeeded {
        account_id: AccountId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint:       Option<String>,
    },

    /// An interactive login wants this value via the matching `login_*` frame.
    #[serde(rename = "login_prompt", rename_all = "camelCase")]
    LoginPrompt { account_id: AccountId, kind: PromptKind },

    /// The only frame that ever carries the session credential. Sent to the
    /// originating subscriber only, never on the bus.
    #[serde(rename = "login_success", rename_all = "camelCase")]
    LoginSuccess { account_id: AccountId, session_string: String, user: AccountInfo },

    #[serde(rename = "newMessage", rename_all = "camelCase")]
    NewMessage { account_id: AccountId, chat_id: ChatId, message: Message },

    #[serde(rename = "messageEdited", rename_all = "camelCase")]
    MessageEdited { account_id: AccountId, chat_id: ChatId, message: Message },

    #[serde(rename = "messageDeleted", rename_all = "camelCase")]
    MessageDeleted { account_id: AccountId, chat_id: ChatId, message_ids: Vec<MessageId> },

    #[serde(rename = "userTyping", rename_all = "camelCase")]
    UserTyping { account_id: AccountId, chat_id: ChatId, user_id: UserId, typing: bool },

    #[serde(rename = "userOnlineStatus", rename_all = "camelCase")]
    UserOnlineStatus { account_id: AccountId, user_id: UserId, online: bool },

    #[serde(rename = "notification", rename_all = "camelCase")]
    Notification { account_id: AccountId, text: String },

    #[serde(rename = "mention", rename_all = "camelCase")]
    Mention { account_id: AccountId, chat_id: ChatId, message_id: MessageId },

    #[serde(rename = "chatUpdated", rename_all = "camelCase")]
    ChatUpdated { account_id: AccountId, chat: Chat },

    #[serde(rename = "connectionState", rename_all = "camelCase")]
    ConnectionState { account_id: AccountId, online: bool },

    #[serde(rename = "chats", rename_all = "camelCase")]
    Chats { account_id: AccountId, chats: Vec<Chat> },

    #[serde(rename = "chatHistory", rename_all = "camelCase")]
    ChatHistory { account_id: AccountId, chat_id: ChatId, messages: Vec<Message> },

    #[serde(rename = "accounts", rename_all = "camelCase")]
    Accounts { accounts: Vec<AccountInfo> },

    /// Explicit ack for a command whose success produced no broadcast.
    #[serde(rename = "ok", rename_all = "camelCase")]
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_id: Option<AccountId>,
        op:         String,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        error:   String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind:    Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>, kind: &str) -> Self {
        Self::Error {
            error:   message.into(),
            kind:    Some(kind.to_string()),
            details: None,
        }
    }

    pub fn ok(account_id: Option<AccountId>, op: &str) -> Self {
        Self::Ok { account_id, op: op.to_string() }
    }
}
