use std::collections::BTreeMap;

use polygram_types::{
    AccountId, AccountInfo, Chat, ChatId, ChatKind, LastMessage, Message, MessageId, SessionToken,
    UserId,
};

fn message(id: i64, ts: i64, text: &str) -> Message {
    Message {
        id:        MessageId(id),
        chat_id:   ChatId(42),
        sender_id: UserId(7),
        text:      text.to_string(),
        timestamp: ts,
        from_self: false,
        reactions: BTreeMap::new(),
        read:      false,
        reply_to:  None,
        edited:    false,
        forwarded: false,
    }
}

#[test]
fn ordering_key_breaks_same_second_ties_by_id() {
    let a = message(10, 1_700_000_000, "a");
    let b = message(11, 1_700_000_000, "b");
    let c = message(12, 1_699_999_999, "c");
    assert!(a.ordering_key() < b.ordering_key(), "id must break timestamp ties");
    assert!(c.ordering_key() < a.ordering_key(), "earlier timestamp sorts first");
}

#[test]
fn mention_detection_is_case_insensitive_and_boundary_aware() {
    assert!(message(1, 0, "hello @A1bot").mentions("a1bot"));
    assert!(message(1, 0, "hello @a1bot!").mentions("A1bot"));
    assert!(message(1, 0, "@a1bot").mentions("@a1bot"), "leading @ on the handle is tolerated");
    assert!(!message(1, 0, "hello @a1botx").mentions("a1bot"), "longer handle must not match");
    assert!(!message(1, 0, "mail a1bot@example.com").mentions("a1bot"), "no @ prefix, no mention");
    assert!(message(1, 0, "@a1botx and @a1bot too").mentions("a1bot"), "later occurrence still found");
    assert!(!message(1, 0, "anything").mentions(""));
}

#[test]
fn message_wire_shape_uses_service_field_names() {
    let mut msg = message(3, 1_700_000_123, "hi");
    msg.from_self = true;
    msg.read = true;
    msg.reply_to = Some(MessageId(1));
    msg.reactions.insert("👍".to_string(), 2);

    let v = serde_json::to_value(&msg).unwrap();
    assert_eq!(v["id"], 3);
    assert_eq!(v["chatId"], 42);
    assert_eq!(v["senderId"], 7);
    assert_eq!(v["isFromSelf"], true);
    assert_eq!(v["readState"], true);
    assert_eq!(v["replyToId"], 1);
    assert_eq!(v["reactions"]["👍"], 2);
    assert!(v.get("forwarded").is_some());

    let back: Message = serde_json::from_value(v).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn message_optional_fields_default_when_absent() {
    let v = serde_json::json!({
        "id": 1, "chatId": 2, "senderId": 3, "text": "x", "timestamp": 4
    });
    let msg: Message = serde_json::from_value(v).unwrap();
    assert!(!msg.from_self);
    assert!(!msg.read);
    assert!(msg.reactions.is_empty());
    assert!(msg.reply_to.is_none());
}

#[test]
fn chat_defaults_allow_sending() {
    let v = serde_json::json!({
        "id": 9, "ownerAccountId": "acc_1", "title": "general", "kind": "group"
    });
    let chat: Chat = serde_json::from_value(v).unwrap();
    assert!(chat.can_send, "can_send defaults to true when the service omits it");
    assert_eq!(chat.kind, ChatKind::Group);
    assert_eq!(chat.owner_account_id, AccountId::from("acc_1"));
}

#[test]
fn chat_sort_puts_pinned_then_most_recent_first() {
    let base = Chat {
        id:               ChatId(1),
        owner_account_id: AccountId::from("acc_1"),
        title:            "a".into(),
        kind:             ChatKind::Private,
        unread_count:     0,
        last_message:     None,
        pinned:           false,
        muted:            false,
        has_mentions:     false,
        can_send:         true,
        participants:     None,
    };
    let old = Chat {
        id: ChatId(2),
        last_message: Some(LastMessage::of(&message(1, 100, "old"))),
        ..base.clone()
    };
    let fresh = Chat {
        id: ChatId(3),
        last_message: Some(LastMessage::of(&message(2, 200, "new"))),
        ..base.clone()
    };
    let pinned = Chat { id: ChatId(4), pinned: true, ..base.clone() };

    let mut chats = vec![old.clone(), fresh.clone(), pinned.clone()];
    chats.sort_by_key(|c| c.sort_key());
    let ids: Vec<_> = chats.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![pinned.id, fresh.id, old.id]);
}

#[test]
fn last_message_excerpt_is_bounded() {
    let long = "x".repeat(500);
    let summary = LastMessage::of(&message(5, 1, &long));
    assert!(summary.excerpt.chars().count() <= 81, "excerpt must stay bounded");
    assert!(summary.excerpt.ends_with('…'));
}

#[test]
fn session_token_debug_is_redacted() {
    let token = SessionToken::new("super-secret-token");
    let shown = format!("{token:?}");
    assert!(!shown.contains("super-secret"), "token value must never render: {shown}");
}

#[test]
fn account_info_never_serializes_a_token_field() {
    let info = AccountInfo::pending(AccountId::from("acc_9"));
    let v = serde_json::to_value(&info).unwrap();
    assert!(v.get("sessionToken").is_none());
    assert!(v.get("token").is_none());
    assert_eq!(v["isOnline"], false);
}

#[test]
fn account_id_derivations() {
    assert_eq!(AccountId::from_user_id(UserId(12)).as_str(), "acc_12");
    assert_eq!(AccountId::from_phone("+1 (555) 010-99").as_str(), "acc_ph_155501099");
}
