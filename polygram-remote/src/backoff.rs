//! Reconnect policies for (re)establishing sessions.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

/// Controls how connect and reconnect loops react to a failed attempt.
///
/// `Continue(d)` means "sleep `d`, then try again"; `Break` aborts the loop
/// and surfaces a connection error to the caller.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn next_delay(&self, attempt: NonZeroU32) -> ControlFlow<(), Duration>;
}

/// Never retry — the first failure is final.
pub struct NoRetries;

impl ReconnectPolicy for NoRetries {
    fn next_delay(&self, _: NonZeroU32) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Exponential backoff with a cap and a bounded attempt count.
pub struct Backoff {
    pub max_attempts: u32,
    pub base:         Duration,
    pub cap:          Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base:         Duration::from_secs(1),
            cap:          Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy for Backoff {
    fn next_delay(&self, attempt: NonZeroU32) -> ControlFlow<(), Duration> {
        if attempt.get() > self.max_attempts {
            return ControlFlow::Break(());
        }
        let shift = (attempt.get() - 1).min(16);
        let delay = self.base.saturating_mul(1u32 << shift);
        ControlFlow::Continue(delay.min(self.cap))
    }
}
