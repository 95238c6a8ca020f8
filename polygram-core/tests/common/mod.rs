//! Shared harness: a manager wired to a fresh loopback service.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use polygram_core::{AccountEvent, AccountManager, LoginOutcome, ManagerConfig, SessionStore};
use polygram_remote::loopback::{LOGIN_CODE, LoopbackService};
use polygram_types::{AccountId, AccountInfo};
use tokio::sync::broadcast;

pub struct Harness {
    pub service: LoopbackService,
    pub manager: Arc<AccountManager>,
    // Keeps the session file alive for the test's duration.
    pub dir:     tempfile::TempDir,
}

pub fn harness_with(config: ManagerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions.json"));
    let service = LoopbackService::new();
    let manager = AccountManager::new(Arc::new(service.clone()), store, config).unwrap();
    Harness { service, manager, dir }
}

pub fn harness() -> Harness {
    harness_with(ManagerConfig::default())
}

/// Complete a passwordless login for `phone` under the given account id.
pub async fn login(manager: &AccountManager, account: &AccountId, phone: &str) -> AccountInfo {
    let hash = manager.begin_login(account, phone).await.unwrap();
    match manager.submit_code(account, phone, &hash, LOGIN_CODE).await.unwrap() {
        LoginOutcome::Complete(done) => done.user,
        other => panic!("expected completed login, got {other:?}"),
    }
}

/// Wait for the next event matching `want`, skipping everything else.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<AccountEvent>, mut want: F) -> AccountEvent
where
    F: FnMut(&AccountEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if want(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
