//! The subscriber registry: every live gateway connection, by uuid.
//!
//! A `Subscriber` is one WebSocket connection: a bounded outbox drained by
//! the connection's sender task, the set of accounts it has authenticated,
//! and the forwarder tasks bridging those accounts' event buses into the
//! outbox. Removing a subscriber aborts its forwarders, which is the
//! unsubscribe — nothing else holds the broadcast receivers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use polygram_types::AccountId;

use crate::protocol::ServerFrame;

/// Outbox depth per connection; a subscriber this far behind is dropping
/// frames, not blocking the relay.
pub const OUTBOX_DEPTH: usize = 64;

pub struct Subscriber {
    pub id:     Uuid,
    outbox:     mpsc::Sender<ServerFrame>,
    authed:     Mutex<HashSet<AccountId>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscriber {
    fn new(id: Uuid, outbox: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id,
            outbox,
            authed:     Mutex::new(HashSet::new()),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Queue a frame for this connection. A full outbox drops the frame with
    /// a warning; a slow consumer never blocks the sender.
    pub fn send(&self, frame: ServerFrame) {
        match self.outbox.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("[gateway] subscriber {} outbox full — dropping frame", self.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[gateway] subscriber {} gone — discarding frame", self.id);
            }
        }
    }

    pub fn is_authed(&self, account: &AccountId) -> bool {
        self.authed.lock().unwrap().contains(account)
    }

    pub fn any_authed(&self) -> bool {
        !self.authed.lock().unwrap().is_empty()
    }

    /// Record an authenticated account. Returns `false` when it was already
    /// present (re-auth keeps the existing forwarder).
    pub(crate) fn grant(&self, account: AccountId) -> bool {
        self.authed.lock().unwrap().insert(account)
    }

    pub(crate) fn add_forwarder(&self, handle: JoinHandle<()>) {
        self.forwarders.lock().unwrap().push(handle);
    }

    fn shutdown(&self) {
        for handle in self.forwarders.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// All live connections. Cheap to clone handles out of; safe from any task.
#[derive(Default)]
pub struct Registry {
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, outbox: mpsc::Sender<ServerFrame>) -> Arc<Subscriber> {
        let subscriber = Arc::new(Subscriber::new(id, outbox));
        self.subscribers.insert(id, subscriber.clone());
        debug!("[gateway] subscriber {id} connected ({} live)", self.subscribers.len());
        subscriber
    }

    /// Drop a connection and abort its forwarders.
    pub fn remove(&self, id: Uuid) {
        if let Some((_, subscriber)) = self.subscribers.remove(&id) {
            subscriber.shutdown();
            debug!("[gateway] subscriber {id} disconnected ({} live)", self.subscribers.len());
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
