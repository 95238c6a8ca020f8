//! Full-stack frame routing over the loopback service, driven at router
//! level: every subscriber authenticated to an account sees that account's
//! events, replies go only to the originator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use polygram_core::{AccountManager, LoginOutcome, ManagerConfig, SessionStore};
use polygram_gateway::{
    ClientFrame, GatewayState, HEARTBEAT, ServerFrame, Subscriber, handle_frame, heartbeat_missed,
};
use polygram_remote::loopback::{LOGIN_CODE, LoopbackService};
use polygram_types::{AccountId, ChatKind};

struct Harness {
    service: LoopbackService,
    state:   Arc<GatewayState>,
    _dir:    tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions.json"));
    let service = LoopbackService::new();
    let manager =
        AccountManager::new(Arc::new(service.clone()), store, ManagerConfig::default()).unwrap();
    Harness { service, state: Arc::new(GatewayState::new(manager)), _dir: dir }
}

async fn login(state: &GatewayState, account: &AccountId, phone: &str) {
    let hash = state.manager.begin_login(account, phone).await.unwrap();
    match state.manager.submit_code(account, phone, &hash, LOGIN_CODE).await.unwrap() {
        LoginOutcome::Complete(_) => {}
        other => panic!("expected completed login, got {other:?}"),
    }
}

/// A fake socket: registry entry plus the receiving end of its outbox.
fn connect(state: &GatewayState) -> (Arc<Subscriber>, mpsc::Receiver<ServerFrame>) {
    let (tx, rx) = mpsc::channel(64);
    (state.registry.register(Uuid::new_v4(), tx), rx)
}

async fn wait_for<F>(rx: &mut mpsc::Receiver<ServerFrame>, mut want: F) -> ServerFrame
where
    F: FnMut(&ServerFrame) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = rx.recv().await.expect("outbox closed");
            if want(&frame) {
                return frame;
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

#[tokio::test]
async fn peer_message_fans_out_to_every_subscriber() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    login(&h.state, &a1, "+1555").await;

    let (sub1, mut rx1) = connect(&h.state);
    let (sub2, mut rx2) = connect(&h.state);
    for (sub, rx) in [(&sub1, &mut rx1), (&sub2, &mut rx2)] {
        handle_frame(h.state.clone(), sub.clone(), ClientFrame::Auth { account_id: a1.clone() })
            .await;
        let frame =
            wait_for(rx, |f| matches!(f, ServerFrame::AuthSuccess { .. })).await;
        assert!(matches!(
            frame,
            ServerFrame::AuthSuccess { has_session: true, needs_login: None, .. }
        ));
    }

    h.service.post_message(chat, bob, "hello both").unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let frame = wait_for(rx, |f| matches!(f, ServerFrame::NewMessage { .. })).await;
        let ServerFrame::NewMessage { account_id, message, .. } = frame else { unreachable!() };
        assert_eq!(account_id, a1);
        assert_eq!(message.text, "hello both");
    }
}

#[tokio::test]
async fn mention_scenario_across_two_accounts() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", Some("a1bot"), None);
    let bob = h.service.register_user("+1666", "Bob", None, None);
    let chat = h.service.create_chat("Pair", ChatKind::Private, &[ann, bob]);

    let a1 = AccountId::new("a1");
    let b1 = AccountId::new("b1");
    login(&h.state, &a1, "+1555").await;
    login(&h.state, &b1, "+1666").await;

    let (ann_sub, mut ann_rx) = connect(&h.state);
    handle_frame(h.state.clone(), ann_sub, ClientFrame::Auth { account_id: a1.clone() }).await;
    wait_for(&mut ann_rx, |f| matches!(f, ServerFrame::AuthSuccess { .. })).await;

    let (bob_sub, mut bob_rx) = connect(&h.state);
    handle_frame(h.state.clone(), bob_sub.clone(), ClientFrame::Auth { account_id: b1.clone() })
        .await;
    wait_for(&mut bob_rx, |f| matches!(f, ServerFrame::AuthSuccess { .. })).await;

    handle_frame(h.state.clone(), bob_sub, ClientFrame::SendMessage {
        account_id:  b1.clone(),
        chat_id:     chat,
        message:     "hello @a1bot".to_string(),
        reply_to_id: None,
    })
    .await;

    // The sender gets the ack; Ann's subscriber gets the message and then
    // the mention for it.
    wait_for(&mut bob_rx, |f| matches!(f, ServerFrame::Ok { .. })).await;
    let frame = wait_for(&mut ann_rx, |f| matches!(f, ServerFrame::NewMessage { .. })).await;
    let ServerFrame::NewMessage { message, .. } = frame else { unreachable!() };
    assert_eq!(message.text, "hello @a1bot");
    let frame = wait_for(&mut ann_rx, |f| matches!(f, ServerFrame::Mention { .. })).await;
    let ServerFrame::Mention { message_id, chat_id, .. } = frame else { unreachable!() };
    assert_eq!(chat_id, chat);
    assert_eq!(message_id, message.id);
}

#[tokio::test]
async fn commands_for_unauthenticated_accounts_are_rejected() {
    let h = harness();
    h.service.register_user("+1555", "Ann", None, None);
    let a1 = AccountId::new("a1");
    login(&h.state, &a1, "+1555").await;

    let (sub, mut rx) = connect(&h.state);
    handle_frame(h.state.clone(), sub, ClientFrame::GetChats {
        account_id: a1,
        limit:      None,
    })
    .await;

    let frame = wait_for(&mut rx, |f| matches!(f, ServerFrame::Error { .. })).await;
    let ServerFrame::Error { kind, .. } = frame else { unreachable!() };
    assert_eq!(kind.as_deref(), Some("unauthenticated"));
}

#[tokio::test]
async fn login_flow_over_frames() {
    let h = harness();
    h.service.register_user("+1555", "Ann", None, None);
    let a1 = AccountId::new("a1");

    let (sub, mut rx) = connect(&h.state);
    handle_frame(h.state.clone(), sub.clone(), ClientFrame::Auth { account_id: a1.clone() })
        .await;
    let frame = wait_for(&mut rx, |f| matches!(f, ServerFrame::AuthSuccess { .. })).await;
    assert!(matches!(
        frame,
        ServerFrame::AuthSuccess { has_session: false, needs_login: Some(true), .. }
    ));

    handle_frame(h.state.clone(), sub.clone(), ClientFrame::LoginPhone {
        account_id:   a1.clone(),
        phone_number: "+1555".to_string(),
    })
    .await;
    let frame = wait_for(&mut rx, |f| matches!(f, ServerFrame::LoginCodeSent { .. })).await;
    let ServerFrame::LoginCodeSent { phone_code_hash, .. } = frame else { unreachable!() };

    handle_frame(h.state.clone(), sub, ClientFrame::LoginCode {
        account_id:      a1.clone(),
        phone_number:    "+1555".to_string(),
        phone_code_hash,
        code:            LOGIN_CODE.to_string(),
    })
    .await;
    let frame = wait_for(&mut rx, |f| matches!(f, ServerFrame::LoginSuccess { .. })).await;
    let ServerFrame::LoginSuccess { user, session_string, .. } = frame else { unreachable!() };
    assert_eq!(user.display_name, "Ann");
    assert!(!session_string.is_empty());
}

#[tokio::test]
async fn idempotent_toggle_acks_without_a_second_chat_updated() {
    let h = harness();
    let ann = h.service.register_user("+1555", "Ann", None, None);
    let chat = h.service.create_chat("Solo", ChatKind::Group, &[ann]);

    let a1 = AccountId::new("a1");
    login(&h.state, &a1, "+1555").await;

    let (sub, mut rx) = connect(&h.state);
    handle_frame(h.state.clone(), sub.clone(), ClientFrame::Auth { account_id: a1.clone() })
        .await;
    wait_for(&mut rx, |f| matches!(f, ServerFrame::AuthSuccess { .. })).await;

    let toggle = ClientFrame::ToggleMute { account_id: a1.clone(), chat_id: chat, muted: true };
    handle_frame(h.state.clone(), sub.clone(), toggle.clone()).await;
    // The ack and the broadcast race through the same outbox; take both in
    // whichever order they land.
    let (mut saw_ack, mut saw_update) = (false, false);
    while !(saw_ack && saw_update) {
        match wait_for(&mut rx, |_| true).await {
            ServerFrame::Ok { .. } => saw_ack = true,
            ServerFrame::ChatUpdated { .. } => saw_update = true,
            other => panic!("unexpected frame {other:?}"),
        }
    }

    handle_frame(h.state.clone(), sub, toggle).await;
    wait_for(&mut rx, |f| matches!(f, ServerFrame::Ok { .. })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[test]
fn silent_peer_counts_as_dead_after_one_heartbeat_interval() {
    assert!(!heartbeat_missed(HEARTBEAT / 2));
    assert!(!heartbeat_missed(HEARTBEAT));
    assert!(heartbeat_missed(HEARTBEAT + Duration::from_secs(1)));
}
