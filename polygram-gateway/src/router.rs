//! Inbound frame dispatch and event fan-out.
//!
//! Every client frame resolves against the account manager; the reply (or a
//! typed `error`) goes only to the originating subscriber, while events the
//! command causes fan out on the account's bus to every subscriber. A
//! forwarder task per (connection, account) bridges the bus into the
//! connection's outbox.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use polygram_core::{AccountEvent, AccountManager, AuthStatus, CoreError, LoginOutcome};
use polygram_types::{AccountId, PromptKind};

use crate::GatewayState;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::Subscriber;

/// Convert a manager event to its wire frame.
pub fn event_frame(account: &AccountId, event: AccountEvent) -> ServerFrame {
    let account_id = account.clone();
    match event {
        AccountEvent::NewMessage { chat_id, message } => {
            ServerFrame::NewMessage { account_id, chat_id, message }
        }
        AccountEvent::MessageEdited { chat_id, message } => {
            ServerFrame::MessageEdited { account_id, chat_id, message }
        }
        AccountEvent::MessageDeleted { chat_id, message_ids } => {
            ServerFrame::MessageDeleted { account_id, chat_id, message_ids }
        }
        AccountEvent::Typing { chat_id, user_id, typing } => {
            ServerFrame::UserTyping { account_id, chat_id, user_id, typing }
        }
        AccountEvent::Online { user_id, online } => {
            ServerFrame::UserOnlineStatus { account_id, user_id, online }
        }
        AccountEvent::ChatUpdated(chat) => ServerFrame::ChatUpdated { account_id, chat },
        AccountEvent::Mention { chat_id, message_id } => {
            ServerFrame::Mention { account_id, chat_id, message_id }
        }
        AccountEvent::Notification(text) => ServerFrame::Notification { account_id, text },
        AccountEvent::LoginPrompt(kind) => ServerFrame::LoginPrompt { account_id, kind },
        AccountEvent::ConnectionState { online } => {
            ServerFrame::ConnectionState { account_id, online }
        }
    }
}

/// Bridge `account`'s event bus into the subscriber's outbox. One forwarder
/// per (connection, account); re-auth of the same account is a no-op. The
/// task dies with the connection (aborted on unregister).
pub fn spawn_forwarder(
    manager:    &Arc<AccountManager>,
    subscriber: &Arc<Subscriber>,
    account:    AccountId,
) {
    if !subscriber.grant(account.clone()) {
        return;
    }
    let mut rx = manager.subscribe(&account);
    let task_subscriber = subscriber.clone();
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => task_subscriber.send(event_frame(&account, event)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        "[gateway] subscriber {} lagged {n} event(s) on {account}",
                        task_subscriber.id
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    subscriber.add_forwarder(handle);
}

/// Resolve one inbound frame. Runs in its own task; a disconnect mid-command
/// silently discards the reply while the command still completes.
pub async fn handle_frame(state: Arc<GatewayState>, subscriber: Arc<Subscriber>, frame: ClientFrame) {
    if let ClientFrame::Auth { account_id } = frame {
        handle_auth(&state, &subscriber, account_id).await;
        return;
    }

    // Everything else requires a prior `auth` for the target account.
    let allowed = match frame.account_id() {
        Some(account) => subscriber.is_authed(account),
        None => subscriber.any_authed(),
    };
    if !allowed {
        subscriber.send(ServerFrame::error(
            format!("account not authenticated on this connection ({})", frame.op()),
            "unauthenticated",
        ));
        return;
    }

    if let Err(e) = dispatch(&state, &subscriber, frame).await {
        subscriber.send(ServerFrame::Error {
            error:   e.to_string(),
            kind:    Some(e.kind().to_string()),
            details: None,
        });
    }
}

async fn handle_auth(state: &Arc<GatewayState>, subscriber: &Arc<Subscriber>, account: AccountId) {
    match state.manager.auth_account(&account).await {
        Ok(status) => {
            // Subscribe regardless of login state: a pending account still
            // emits login prompts and, later, its first connectionState.
            spawn_forwarder(&state.manager, subscriber, account.clone());
            let has_session = status == AuthStatus::HasSession;
            subscriber.send(ServerFrame::AuthSuccess {
                account_id:  account,
                has_session,
                needs_login: (!has_session).then_some(true),
            });
        }
        Err(e) => subscriber.send(ServerFrame::Error {
            error:   e.to_string(),
            kind:    Some(e.kind().to_string()),
            details: None,
        }),
    }
}

async fn dispatch(
    state:      &Arc<GatewayState>,
    subscriber: &Arc<Subscriber>,
    frame:      ClientFrame,
) -> Result<(), CoreError> {
    let manager = &state.manager;
    let op = frame.op();
    match frame {
        ClientFrame::Auth { .. } => unreachable!("handled before dispatch"),

        // Login frames feed a waiting interactive prompt when one is
        // registered; otherwise they drive the request/response flow.
        ClientFrame::LoginPhone { account_id, phone_number } => {
            if manager.resolve_prompt(&account_id, PromptKind::Phone, phone_number.clone()) {
                subscriber.send(ServerFrame::ok(Some(account_id), op));
                return Ok(());
            }
            let phone_code_hash = manager.begin_login(&account_id, &phone_number).await?;
            subscriber.send(ServerFrame::LoginCodeSent { account_id, phone_code_hash });
            Ok(())
        }
        ClientFrame::LoginCode { account_id, phone_number, phone_code_hash, code } => {
            if manager.resolve_prompt(&account_id, PromptKind::Code, code.clone()) {
                subscriber.send(ServerFrame::ok(Some(account_id), op));
                return Ok(());
            }
            match manager.submit_code(&account_id, &phone_number, &phone_code_hash, &code).await? {
                LoginOutcome::Complete(done) => {
                    subscriber.send(ServerFrame::LoginSuccess {
                        account_id,
                        session_string: done.session.as_str().to_string(),
                        user: done.user,
                    });
                }
                LoginOutcome::NeedsPassword { hint } => {
                    subscriber.send(ServerFrame::Login2faNeeded { account_id, hint });
                }
            }
            Ok(())
        }
        ClientFrame::Login2fa { account_id, password } => {
            if manager.resolve_prompt(&account_id, PromptKind::Password, password.clone()) {
                subscriber.send(ServerFrame::ok(Some(account_id), op));
                return Ok(());
            }
            let done = manager.submit_password(&account_id, &password).await?;
            subscriber.send(ServerFrame::LoginSuccess {
                account_id,
                session_string: done.session.as_str().to_string(),
                user: done.user,
            });
            Ok(())
        }

        ClientFrame::SendMessage { account_id, chat_id, message, reply_to_id } => {
            manager.send_message(&account_id, chat_id, &message, reply_to_id).await?;
            // The message itself fans out as `newMessage` on the bus.
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::ToggleMute { account_id, chat_id, muted } => {
            manager.toggle_mute(&account_id, chat_id, muted).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::TogglePin { account_id, chat_id, pinned } => {
            manager.toggle_pin(&account_id, chat_id, pinned).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::MarkAsRead { account_id, chat_id } => {
            manager.mark_read(&account_id, chat_id).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::GetChats { account_id, limit } => {
            let chats = manager.get_chats(&account_id, limit.unwrap_or(100)).await?;
            subscriber.send(ServerFrame::Chats { account_id, chats });
            Ok(())
        }
        ClientFrame::GetChatHistory { account_id, chat_id, limit, offset_id } => {
            let messages = manager
                .get_history(&account_id, chat_id, limit.unwrap_or(50), offset_id)
                .await?;
            subscriber.send(ServerFrame::ChatHistory { account_id, chat_id, messages });
            Ok(())
        }
        ClientFrame::GetAccounts {} => {
            subscriber.send(ServerFrame::Accounts { accounts: manager.get_accounts() });
            Ok(())
        }
        ClientFrame::RemoveAccount { account_id } => {
            manager.remove_account(&account_id).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::JoinChat { account_id, invite } => {
            manager.join_chat(&account_id, &invite).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::SetTyping { account_id, chat_id, typing } => {
            manager.set_typing(&account_id, chat_id, typing).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::SendReaction { account_id, chat_id, message_id, emoji } => {
            manager.send_reaction(&account_id, chat_id, message_id, &emoji).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::RemoveReaction { account_id, chat_id, message_id } => {
            manager.remove_reaction(&account_id, chat_id, message_id).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
        ClientFrame::DeleteMessage { account_id, chat_id, message_id } => {
            manager.delete_message(&account_id, chat_id, message_id).await?;
            subscriber.send(ServerFrame::ok(Some(account_id), op));
            Ok(())
        }
    }
}
