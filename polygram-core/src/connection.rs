//! One authenticated link to the remote service for exactly one account.
//!
//! `AccountConnection` wraps the raw [`RemoteClient`] with a hard per-call
//! timeout and owns the pump task: a single reader that pulls raw push
//! events in service order, validates them, and forwards them into the
//! manager's intake channel. When the link drops, the pump reconnects with
//! the saved token under the configured policy; events missed during the
//! outage are not replayed — the manager resyncs by refetching dialogs.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use polygram_remote::{
    ReconnectPolicy, RemoteClient, RemoteConnector, RemoteError, RemoteEvent, RemoteRequest,
    payload,
};
use polygram_types::{AccountId, SessionToken};

use crate::error::CoreError;

/// Hard deadline on every service call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry cadence once the reconnect policy is exhausted; the account stays
/// registered and offline, and keeps probing at this interval.
const BACKGROUND_RETRY: Duration = Duration::from_secs(30);

/// What the pump feeds into the manager's intake loop.
pub(crate) enum Intake {
    /// A validated push event, in service order.
    Event(RemoteEvent),
    /// Link state changed; `true` also triggers a dialog resync.
    Online(bool),
}

pub struct AccountConnection {
    /// Swapped in place on reconnect; calls always clone the current client.
    client: Arc<Mutex<Arc<dyn RemoteClient>>>,
    pump:   Mutex<Option<JoinHandle<()>>>,
}

impl AccountConnection {
    /// Connect with bounded retries under `policy`. Auth rejections are not
    /// retried — a bad token will not become good by waiting.
    pub(crate) async fn establish(
        connector: &Arc<dyn RemoteConnector>,
        token:     Option<&SessionToken>,
        policy:    &Arc<dyn ReconnectPolicy>,
    ) -> Result<Self, CoreError> {
        let client = connect_with_policy(connector, token, policy).await?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            pump:   Mutex::new(None),
        })
    }

    /// Spawn the event pump, forwarding into `intake` under `account`.
    /// Called once per connection, right after the slot is registered.
    pub(crate) fn start_pump(
        &self,
        account:   AccountId,
        connector: Arc<dyn RemoteConnector>,
        policy:    Arc<dyn ReconnectPolicy>,
        intake:    mpsc::UnboundedSender<(AccountId, Intake)>,
    ) {
        let slot = self.client.clone();
        let handle = tokio::spawn(async move {
            run_pump(account, slot, connector, policy, intake).await;
        });
        *self.pump.lock().unwrap() = Some(handle);
    }

    /// One service call with the hard timeout, errors converted to the core
    /// taxonomy at this boundary.
    pub(crate) async fn call(&self, req: RemoteRequest) -> Result<serde_json::Value, CoreError> {
        let client = self.client.lock().unwrap().clone();
        match tokio::time::timeout(CALL_TIMEOUT, client.invoke(req)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(RemoteError::Timeout.into()),
        }
    }

    /// The session's current (possibly rotated) token.
    pub(crate) fn token(&self) -> SessionToken {
        self.client.lock().unwrap().session_token()
    }

    /// Stop the pump and tear the link down.
    pub(crate) async fn close(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
        let client = self.client.lock().unwrap().clone();
        client.close().await;
    }
}

/// Connect loop shared by first connect and pump reconnects.
async fn connect_with_policy(
    connector: &Arc<dyn RemoteConnector>,
    token:     Option<&SessionToken>,
    policy:    &Arc<dyn ReconnectPolicy>,
) -> Result<Arc<dyn RemoteClient>, CoreError> {
    let mut attempt = 1u32;
    loop {
        match connector.connect(token).await {
            Ok(client) => return Ok(client),
            Err(e @ RemoteError::Service(_)) => return Err(e.into()),
            Err(e) => {
                let n = NonZeroU32::new(attempt).unwrap_or(NonZeroU32::MIN);
                match policy.next_delay(n) {
                    ControlFlow::Continue(delay) => {
                        debug!("[connection] connect attempt {attempt} failed ({e}), retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    ControlFlow::Break(()) => {
                        return Err(CoreError::Connection(format!(
                            "gave up after {attempt} attempt(s): {e}"
                        )));
                    }
                }
            }
        }
    }
}

async fn run_pump(
    account:   AccountId,
    slot:      Arc<Mutex<Arc<dyn RemoteClient>>>,
    connector: Arc<dyn RemoteConnector>,
    policy:    Arc<dyn ReconnectPolicy>,
    intake:    mpsc::UnboundedSender<(AccountId, Intake)>,
) {
    loop {
        let client = slot.lock().unwrap().clone();
        match client.next_event().await {
            Ok(raw) => match payload::parse_event(&account, &raw) {
                Ok(event) => {
                    if intake.send((account.clone(), Intake::Event(event))).is_err() {
                        return; // manager gone
                    }
                }
                Err(e) => warn!("[connection] {account}: dropping malformed event: {e}"),
            },
            Err(e) => {
                warn!("[connection] {account}: link lost ({e}) — reconnecting");
                let token = client.session_token();
                loop {
                    match connect_with_policy(&connector, Some(&token), &policy).await {
                        Ok(fresh) => {
                            *slot.lock().unwrap() = fresh;
                            if intake.send((account.clone(), Intake::Online(true))).is_err() {
                                return;
                            }
                            break;
                        }
                        Err(CoreError::Auth(_)) => {
                            // Token no longer valid; surface as revoked and stop.
                            let _ = intake
                                .send((account.clone(), Intake::Event(RemoteEvent::SessionRevoked)));
                            return;
                        }
                        Err(e) => {
                            warn!("[connection] {account}: reconnect failed ({e}), retrying in {BACKGROUND_RETRY:?}");
                            if intake.send((account.clone(), Intake::Online(false))).is_err() {
                                return;
                            }
                            tokio::time::sleep(BACKGROUND_RETRY).await;
                        }
                    }
                }
            }
        }
    }
}
