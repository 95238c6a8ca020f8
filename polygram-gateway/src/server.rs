//! The axum WebSocket server.
//!
//! One route: `GET /ws` upgrades to a frame connection. Each socket gets a
//! uuid, a bounded outbox drained by a dedicated sender task, and a registry
//! entry; the read loop parses client frames and spawns the router on each.
//! The sender task also owns the heartbeat: a ping every 30 seconds, and a
//! close at the next tick after a ping goes unanswered.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::OUTBOX_DEPTH;
use crate::{GatewayState, router};

pub const HEARTBEAT: Duration = Duration::from_secs(30);

/// True once the peer's last inbound message (frame or pong) is older than
/// one heartbeat interval, meaning the previous ping went unanswered.
pub fn heartbeat_missed(idle: Duration) -> bool {
    idle > HEARTBEAT
}

pub fn app(state: Arc<GatewayState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// Serve the gateway on an already-bound listener until the task is dropped.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state:    Arc<GatewayState>,
) -> std::io::Result<()> {
    info!("[gateway] listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sink, mut stream) = socket.split();
    let id = Uuid::new_v4();

    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOX_DEPTH);
    let subscriber = state.registry.register(id, tx);

    // Updated by the read side on every inbound message (frames and pongs
    // both count as liveness).
    let last_seen = Arc::new(Mutex::new(Instant::now()));

    let sender = tokio::spawn({
        let last_seen = last_seen.clone();
        async move {
            let mut tick = tokio::time::interval(HEARTBEAT);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("[gateway] unserializable frame for {id}: {e}");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        if heartbeat_missed(last_seen.lock().unwrap().elapsed()) {
                            debug!("[gateway] subscriber {id} missed a heartbeat — closing");
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        *last_seen.lock().unwrap() = Instant::now();
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => {
                    tokio::spawn(router::handle_frame(
                        state.clone(),
                        subscriber.clone(),
                        frame,
                    ));
                }
                Err(e) => {
                    debug!("[gateway] subscriber {id} sent a malformed frame: {e}");
                    subscriber.send(ServerFrame::error(
                        format!("unparseable frame: {e}"),
                        "bad_request",
                    ));
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; pongs only refresh last_seen.
            _ => {}
        }
    }

    state.registry.remove(id);
    sender.abort();
}
