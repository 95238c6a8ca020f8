//! The mirror applied frame-by-frame: ordering, reconciliation, unread and
//! mention bookkeeping.

use polygram_gateway::ServerFrame;
use polygram_mirror::Mirror;
use polygram_types::{
    AccountId, Chat, ChatId, ChatKind, Message, MessageId, UserId,
};

fn a1() -> AccountId {
    AccountId::new("a1")
}

fn msg(id: i64, ts: i64, text: &str) -> Message {
    Message {
        id:        MessageId(id),
        chat_id:   ChatId(7),
        sender_id: UserId(3),
        text:      text.to_string(),
        timestamp: ts,
        from_self: false,
        reactions: Default::default(),
        read:      false,
        reply_to:  None,
        edited:    false,
        forwarded: false,
    }
}

fn chat(id: i64, title: &str) -> Chat {
    Chat {
        id:               ChatId(id),
        owner_account_id: a1(),
        title:            title.to_string(),
        kind:             ChatKind::Group,
        unread_count:     0,
        last_message:     None,
        pinned:           false,
        muted:            false,
        has_mentions:     false,
        can_send:         true,
        participants:     None,
    }
}

fn new_message(m: Message) -> ServerFrame {
    ServerFrame::NewMessage { account_id: a1(), chat_id: m.chat_id, message: m }
}

#[test]
fn messages_keep_order_and_edits_replace() {
    let mut mirror = Mirror::new();
    mirror.apply(new_message(msg(2, 1000, "second")));
    mirror.apply(new_message(msg(1, 999, "first")));

    let view = mirror.account(&a1()).unwrap();
    let texts: Vec<&str> = view.messages(ChatId(7)).iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);

    let mut edited = msg(2, 1000, "second, edited");
    edited.edited = true;
    mirror.apply(ServerFrame::MessageEdited {
        account_id: a1(),
        chat_id:    ChatId(7),
        message:    edited,
    });
    let view = mirror.account(&a1()).unwrap();
    assert_eq!(view.messages(ChatId(7)).len(), 2);
    assert_eq!(view.messages(ChatId(7))[1].text, "second, edited");
}

#[test]
fn deletes_remove_and_refresh_last_message() {
    let mut mirror = Mirror::new();
    mirror.apply(ServerFrame::Chats { account_id: a1(), chats: vec![chat(7, "Pair")] });
    mirror.apply(new_message(msg(1, 999, "keep")));
    mirror.apply(new_message(msg(2, 1000, "drop")));

    mirror.apply(ServerFrame::MessageDeleted {
        account_id:  a1(),
        chat_id:     ChatId(7),
        message_ids: vec![MessageId(2)],
    });

    let view = mirror.account(&a1()).unwrap();
    assert_eq!(view.messages(ChatId(7)).len(), 1);
    let last = view.chat(ChatId(7)).unwrap().last_message.as_ref().unwrap();
    assert_eq!(last.id, MessageId(1));
    assert_eq!(last.excerpt, "keep");
}

#[test]
fn unread_counts_incoming_only_and_fetched_wins() {
    let mut mirror = Mirror::new();
    mirror.apply(ServerFrame::Chats { account_id: a1(), chats: vec![chat(7, "Pair")] });

    mirror.apply(new_message(msg(1, 999, "peer")));
    let mut own = msg(2, 1000, "me");
    own.from_self = true;
    mirror.apply(new_message(own));

    let view = mirror.account(&a1()).unwrap();
    assert_eq!(view.chat(ChatId(7)).unwrap().unread_count, 1);

    // A refetched chat list overrides local bookkeeping.
    let mut fetched = chat(7, "Pair");
    fetched.unread_count = 0;
    mirror.apply(ServerFrame::Chats { account_id: a1(), chats: vec![fetched] });
    let view = mirror.account(&a1()).unwrap();
    assert_eq!(view.chat(ChatId(7)).unwrap().unread_count, 0);
}

#[test]
fn mention_flags_set_and_clear_via_chat_updated() {
    let mut mirror = Mirror::new();
    mirror.apply(ServerFrame::Chats { account_id: a1(), chats: vec![chat(7, "Pair")] });
    mirror.apply(new_message(msg(1, 999, "hello @a1bot")));
    mirror.apply(ServerFrame::Mention {
        account_id: a1(),
        chat_id:    ChatId(7),
        message_id: MessageId(1),
    });

    let view = mirror.account(&a1()).unwrap();
    assert!(view.chat(ChatId(7)).unwrap().has_mentions);
    assert_eq!(view.mentions, vec![(ChatId(7), MessageId(1))]);

    // After markAsRead the relay re-emits the chat with the flag cleared.
    let cleared = chat(7, "Pair");
    mirror.apply(ServerFrame::ChatUpdated { account_id: a1(), chat: cleared });
    let view = mirror.account(&a1()).unwrap();
    assert!(!view.chat(ChatId(7)).unwrap().has_mentions);
}

#[test]
fn chat_list_orders_pinned_then_recent() {
    let mut mirror = Mirror::new();
    let mut quiet = chat(1, "quiet");
    quiet.last_message = None;
    let mut busy = chat(2, "busy");
    busy.last_message = Some(polygram_types::LastMessage {
        id:        MessageId(9),
        sender_id: UserId(3),
        excerpt:   "x".to_string(),
        timestamp: 2000,
    });
    let mut pinned = chat(3, "pinned");
    pinned.pinned = true;
    mirror.apply(ServerFrame::Chats { account_id: a1(), chats: vec![quiet, busy, pinned] });

    let view = mirror.account(&a1()).unwrap();
    let titles: Vec<&str> = view.chats().iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["pinned", "busy", "quiet"]);
}

#[test]
fn typing_tracks_per_chat_and_clears_on_message() {
    let mut mirror = Mirror::new();
    mirror.apply(ServerFrame::UserTyping {
        account_id: a1(),
        chat_id:    ChatId(7),
        user_id:    UserId(3),
        typing:     true,
    });
    let view = mirror.account(&a1()).unwrap();
    assert_eq!(view.typing_users(ChatId(7)), vec![UserId(3)]);

    // The typed message arriving supersedes the indicator.
    mirror.apply(new_message(msg(1, 999, "done typing")));
    let view = mirror.account(&a1()).unwrap();
    assert!(view.typing_users(ChatId(7)).is_empty());
}

#[test]
fn connection_and_error_frames_update_status() {
    let mut mirror = Mirror::new();
    mirror.apply(ServerFrame::ConnectionState { account_id: a1(), online: true });
    assert!(mirror.account(&a1()).unwrap().online);

    mirror.apply(ServerFrame::error("rate limited, retry in 30s", "rate_limited"));
    assert_eq!(mirror.last_error.as_deref(), Some("rate limited, retry in 30s"));

    mirror.apply(ServerFrame::ok(Some(a1()), "sendMessage"));
    assert!(mirror.last_error.is_none());
}

#[test]
fn frames_parse_from_wire_text_and_apply() {
    // End-to-end shape check: raw gateway JSON drives the mirror.
    let raw = r#"{
        "type": "newMessage",
        "accountId": "a1",
        "chatId": 7,
        "message": {
            "id": 1, "chatId": 7, "senderId": 3, "text": "hi",
            "timestamp": 999, "isFromSelf": false, "readState": false,
            "edited": false, "forwarded": false
        }
    }"#;
    let frame: ServerFrame = serde_json::from_str(raw).unwrap();
    let mut mirror = Mirror::new();
    mirror.apply(frame);
    assert_eq!(mirror.account(&a1()).unwrap().messages(ChatId(7))[0].text, "hi");
}
