//! WebSocket gateway for the multi-account relay.
//!
//! Subscribers connect over `GET /ws` and exchange flat JSON frames
//! ([`protocol`]). A connection authenticates per account, after which the
//! account's events fan out to it while its commands resolve against the
//! shared [`AccountManager`]; multiple connections per account and multiple
//! accounts per connection are both ordinary.

#![deny(unsafe_code)]

pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;

use std::sync::Arc;

use polygram_core::AccountManager;

pub use crate::protocol::{ClientFrame, ServerFrame};
pub use crate::registry::{OUTBOX_DEPTH, Registry, Subscriber};
pub use crate::router::{event_frame, handle_frame, spawn_forwarder};
pub use crate::server::{HEARTBEAT, app, heartbeat_missed, serve};

/// Shared state behind every connection: the one manager instance and the
/// live-subscriber registry.
pub struct GatewayState {
    pub manager:  Arc<AccountManager>,
    pub registry: Registry,
}

impl GatewayState {
    pub fn new(manager: Arc<AccountManager>) -> Self {
        Self { manager, registry: Registry::new() }
    }
}
