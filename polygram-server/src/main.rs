//! The relay binary: configuration, logging, bootstrap, shutdown.
//!
//! Wires the account manager to the in-process loopback service and serves
//! the WebSocket gateway on top of it. The real service SDK plugs in as an
//! external [`RemoteConnector`] implementation; the loopback ships seeded
//! with a demo account so the whole stack is exercisable out of the box.

mod config;

use std::error::Error;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polygram_core::{AccountManager, ManagerConfig, SessionStore};
use polygram_gateway::GatewayState;
use polygram_remote::RemoteConnector;
use polygram_remote::loopback::{LOGIN_CODE, LoopbackService};
use polygram_types::ChatKind;

use crate::config::load_settings;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("polygram-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = load_settings();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.clone())),
        )
        .init();

    info!("polygram relay v{}", env!("CARGO_PKG_VERSION"));
    info!("[config] listening on {}", settings.listen_addr);

    let store = SessionStore::new(&settings.session_file);
    if let Some(legacy) = &settings.legacy_session_file {
        match store.import_legacy(legacy) {
            Ok(0) => {}
            Ok(n) => info!("[session] imported {n} legacy session(s) from {}", legacy.display()),
            Err(e) => warn!("[session] legacy import from {} failed: {e}", legacy.display()),
        }
    }

    let service = seeded_loopback();
    let connector: Arc<dyn RemoteConnector> = Arc::new(service);

    let manager = AccountManager::new(connector, store, ManagerConfig {
        chat_cache_capacity: settings.chat_cache_capacity,
        send_cooldown:       settings.send_cooldown(),
        ..Default::default()
    })?;

    // Bring persisted accounts back without delaying the listener.
    let resumer = manager.clone();
    tokio::spawn(async move { resumer.resume_all().await });

    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    let state = Arc::new(GatewayState::new(manager.clone()));
    let gateway = tokio::spawn(polygram_gateway::serve(listener, state));

    tokio::signal::ctrl_c().await?;
    info!("[server] shutdown signal received");
    gateway.abort();
    manager.shutdown().await;
    Ok(())
}

/// A loopback world with one demo account so the gateway can be driven end
/// to end: login with the logged phone number and code.
fn seeded_loopback() -> LoopbackService {
    let service = LoopbackService::new();
    let demo = service.register_user("+15550001", "Demo", Some("demo"), None);
    let peer = service.register_user("+15550002", "Echo", Some("echo"), None);
    let lounge = service.create_chat("Lounge", ChatKind::Group, &[demo, peer]);
    let _ = service.post_message(lounge, peer, "welcome to polygram");
    info!("[server] demo account ready: phone +15550001, login code {LOGIN_CODE}");
    service
}
