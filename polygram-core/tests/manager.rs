//! Account manager behavior over the loopback service: event bookkeeping,
//! mention lifecycle, idempotent toggles, local permission and cooldown
//! checks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use polygram_core::{AccountEvent, AccountManager, CoreError, ManagerConfig, SessionStore};
use polygram_remote::loopback::{LOGIN_CODE, LoopbackService};
use polygram_remote::{RemoteConnector, RemoteRequest};
use polygram_types::{AccountId, ChatKind};

use common::{harness, harness_with, login, wait_for};

#[tokio::test]
async fn inbound_message_updates_cache_unread_and_fans_out() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", Some("ann"), None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    let mut rx1 = h.manager.subscribe(&a1);
    let mut rx2 = h.manager.subscribe(&a1);

    h.service.post_message(chat, bob, "hi there").unwrap();

    // Both subscribers of the same account observe the event.
    for rx in [&mut rx1, &mut rx2] {
        let event = wait_for(rx, |e| matches!(e, AccountEvent::NewMessage { .. })).await;
        let AccountEvent::NewMessage { message, .. } = event else { unreachable!() };
        assert_eq!(message.text, "hi there");
    }

    let chats = h.manager.get_chats(&a1, 10).await.unwrap();
    let record = chats.iter().find(|c| c.id == chat).unwrap();
    assert_eq!(record.unread_count, 1);
    assert_eq!(record.last_message.as_ref().unwrap().excerpt, "hi there");

    let history = h.manager.get_history(&a1, chat, 10, None).await.unwrap();
    assert_eq!(history.last().unwrap().text, "hi there");
}

#[tokio::test]
async fn mention_sets_flags_and_emits_after_new_message() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", Some("a1bot"), None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat_a = h.service.create_chat("chat-42", ChatKind::Group, &[ann, bob]);
    let chat_b = h.service.create_chat("other", ChatKind::Group, &[ann, bob]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    let mut rx = h.manager.subscribe(&a1);

    h.service.post_message(chat_a, bob, "hello @a1bot").unwrap();

    // newMessage first, then the mention for the same message.
    let first = wait_for(&mut rx, |e| matches!(e, AccountEvent::NewMessage { .. })).await;
    let AccountEvent::NewMessage { message, .. } = first else { unreachable!() };
    assert_eq!(message.text, "hello @a1bot");
    let second = wait_for(&mut rx, |e| matches!(e, AccountEvent::Mention { .. })).await;
    let AccountEvent::Mention { chat_id, message_id } = second else { unreachable!() };
    assert_eq!(chat_id, chat_a);
    assert_eq!(message_id, message.id);

    h.service.post_message(chat_b, bob, "again @a1bot").unwrap();
    wait_for(&mut rx, |e| matches!(e, AccountEvent::Mention { .. })).await;

    let flagged = |chats: &[polygram_types::Chat], id| {
        chats.iter().find(|c| c.id == id).unwrap().has_mentions
    };
    let chats = h.manager.get_chats(&a1, 10).await.unwrap();
    assert!(flagged(&chats, chat_a) && flagged(&chats, chat_b));
    assert!(h.manager.get_accounts()[0].has_mentions);

    // Opening one chat clears only its flag; the account flag stays while
    // the other chat is still flagged.
    h.manager.mark_read(&a1, chat_a).await.unwrap();
    let chats = h.manager.get_chats(&a1, 10).await.unwrap();
    assert!(!flagged(&chats, chat_a) && flagged(&chats, chat_b));
    assert!(h.manager.get_accounts()[0].has_mentions);

    h.manager.mark_read(&a1, chat_b).await.unwrap();
    assert!(!h.manager.get_accounts()[0].has_mentions);
}

#[tokio::test]
async fn own_handle_in_own_message_is_not_a_mention() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", Some("a1bot"), None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    let mut rx = h.manager.subscribe(&a1);

    h.manager.send_message(&a1, chat, "note to self @a1bot", None).await.unwrap();
    wait_for(&mut rx, |e| matches!(e, AccountEvent::NewMessage { .. })).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let chats = h.manager.get_chats(&a1, 10).await.unwrap();
    assert!(!chats.iter().find(|c| c.id == chat).unwrap().has_mentions);
}

#[tokio::test]
async fn mute_toggle_is_idempotent() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let chat = h.service.create_chat("Solo", ChatKind::Group, &[ann]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    let mut rx = h.manager.subscribe(&a1);

    let first = h.manager.toggle_mute(&a1, chat, true).await.unwrap();
    assert!(first.muted);
    wait_for(&mut rx, |e| matches!(e, AccountEvent::ChatUpdated(_))).await;

    // Already muted: acknowledged without a remote call or a broadcast.
    let second = h.manager.toggle_mute(&a1, chat, true).await.unwrap();
    assert!(second.muted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    // And toggling back returns to the original state.
    let third = h.manager.toggle_mute(&a1, chat, false).await.unwrap();
    assert!(!third.muted);
}

#[tokio::test]
async fn pin_toggle_round_trips() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let chat = h.service.create_chat("Solo", ChatKind::Group, &[ann]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;

    assert!(h.manager.toggle_pin(&a1, chat, true).await.unwrap().pinned);
    assert!(!h.manager.toggle_pin(&a1, chat, false).await.unwrap().pinned);
}

#[tokio::test]
async fn forbidden_chat_rejects_send_locally() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let chat = h.service.create_chat("ReadOnly", ChatKind::Channel, &[ann]);
    h.service.forbid_sending(chat);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;

    let err = h.manager.send_message(&a1, chat, "nope", None).await.unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied(_)));
}

#[tokio::test]
async fn send_cooldown_rate_limits_without_remote_call() {
    let h = harness_with(ManagerConfig {
        send_cooldown: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let chat = h.service.create_chat("Solo", ChatKind::Group, &[ann]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;

    h.manager.send_message(&a1, chat, "first", None).await.unwrap();
    let err = h.manager.send_message(&a1, chat, "too fast", None).await.unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { retry_after: Some(_) }));

    // The rejected send never reached the service.
    let history = h.manager.get_history(&a1, chat, 10, None).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn remove_account_purges_token_and_state() {
    let h = harness();
    h.service.register_user("+1555", "Ann", None, None);
    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    assert_eq!(h.manager.get_accounts().len(), 1);

    h.manager.remove_account(&a1).await.unwrap();
    assert!(h.manager.get_accounts().is_empty());

    let store = polygram_core::SessionStore::new(h.dir.path().join("sessions.json"));
    assert!(!store.load().unwrap().contains_key(&a1));
    assert!(matches!(
        h.manager.get_chats(&a1, 10).await.unwrap_err(),
        CoreError::UnknownAccount(_)
    ));
}

#[tokio::test]
async fn legacy_phone_key_is_rewritten_on_first_resume() {
    let dir = tempfile::tempdir().unwrap();
    let service = LoopbackService::new();
    let uid = service.register_user("+1555", "Ann", None, None);

    // Mint a token the way the old deployment did: one full login straight
    // against the service, then write the line-oriented session file.
    let client = service.connect(None).await.unwrap();
    let raw = client
        .invoke(RemoteRequest::RequestLoginCode { phone: "+1555".into() })
        .await
        .unwrap();
    let hash = raw["phone_code_hash"].as_str().unwrap().to_string();
    client
        .invoke(RemoteRequest::SubmitCode {
            phone:           "+1555".into(),
            phone_code_hash: hash,
            code:            LOGIN_CODE.into(),
        })
        .await
        .unwrap();
    let token = client.session_token();
    client.close().await;

    let legacy = dir.path().join("sessions.txt");
    std::fs::write(&legacy, format!("+1555:{}\n", token.as_str())).unwrap();

    let store = SessionStore::new(dir.path().join("sessions.json"));
    assert_eq!(store.import_legacy(&legacy).unwrap(), 1);
    let manager =
        AccountManager::new(Arc::new(service.clone()), store, ManagerConfig::default()).unwrap();

    let phone_id = AccountId::from_phone("+1555");
    let canonical = AccountId::from_user_id(uid);
    let info = manager.resume_account(&phone_id).await.unwrap();
    assert_eq!(info.id, canonical);

    // The live account is keyed canonically only, and so is the persisted
    // token, immediately rather than on the next snapshot.
    let accounts = manager.get_accounts();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, canonical);
    let persisted = SessionStore::new(dir.path().join("sessions.json")).load().unwrap();
    assert!(persisted.contains_key(&canonical));
    assert!(!persisted.contains_key(&phone_id));
}

#[tokio::test]
async fn reactions_and_deletes_flow_back_as_events() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    login(&h.manager, &a1, "+1555").await;
    let mut rx = h.manager.subscribe(&a1);

    let id = h.service.post_message(chat, bob, "react to me").unwrap();
    wait_for(&mut rx, |e| matches!(e, AccountEvent::NewMessage { .. })).await;

    h.manager.send_reaction(&a1, chat, id, "👍").await.unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, AccountEvent::MessageEdited { .. })).await;
    let AccountEvent::MessageEdited { message, .. } = event else { unreachable!() };
    assert_eq!(message.reactions.get("👍"), Some(&1));

    h.manager.delete_message(&a1, chat, id).await.unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, AccountEvent::MessageDeleted { .. })).await;
    let AccountEvent::MessageDeleted { message_ids, .. } = event else { unreachable!() };
    assert_eq!(message_ids, vec![id]);

    let history = h.manager.get_history(&a1, chat, 10, None).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn typing_events_track_and_fan_out() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    let b1 = AccountId::new("b1");
    login(&h.manager, &a1, "+1555").await;
    login(&h.manager, &b1, "+1666").await;
    let mut rx = h.manager.subscribe(&a1);

    h.manager.set_typing(&b1, chat, true).await.unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, AccountEvent::Typing { .. })).await;
    let AccountEvent::Typing { user_id, typing, .. } = event else { unreachable!() };
    assert_eq!(user_id, bob);
    assert!(typing);
    assert_eq!(h.manager.typing_users(&a1, chat), vec![bob]);

    h.manager.set_typing(&b1, chat, false).await.unwrap();
    wait_for(&mut rx, |e| matches!(e, AccountEvent::Typing { typing: false, .. })).await;
    assert!(h.manager.typing_users(&a1, chat).is_empty());
}
