//! Login state machine bookkeeping and interactive prompt plumbing.
//!
//! The transitions themselves (which remote calls to make, how service
//! errors map back onto steps) live in the account manager; this module owns
//! the per-account [`LoginSession`] record that enforces step ordering and
//! expiry, and the [`PromptTable`] that lets an interactive login suspend on
//! "need code / need password" until a gateway frame supplies the value.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use polygram_types::{AccountId, AccountInfo, LoginStep, PromptKind, SessionToken};

use crate::error::CoreError;

/// A login step left incomplete this long expires the whole session, so a
/// half-finished login can never leak.
pub const LOGIN_STEP_TIMEOUT: Duration = Duration::from_secs(300);

// ─── LoginSession ─────────────────────────────────────────────────────────────

/// State of one in-progress login. Exactly one per account at a time.
pub struct LoginSession {
    pub account_id:      AccountId,
    pub phone:           String,
    pub step:            LoginStep,
    pub phone_code_hash: Option<String>,
    pub started:         Instant,
    pub last_touch:      Instant,
}

impl LoginSession {
    pub fn begin(account_id: AccountId, phone: String) -> Self {
        let now = Instant::now();
        Self {
            account_id,
            phone,
            step: LoginStep::AwaitingPhone,
            phone_code_hash: None,
            started: now,
            last_touch: now,
        }
    }

    /// Enforce step ordering: fail with `InvalidLoginState` unless the
    /// session sits exactly at `expected`.
    pub fn expect(&self, expected: LoginStep) -> Result<(), CoreError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidLoginState { expected: self.step })
        }
    }

    pub fn touch(&mut self) {
        self.last_touch = Instant::now();
    }

    pub fn expired(&self) -> bool {
        self.last_touch.elapsed() > LOGIN_STEP_TIMEOUT
    }
}

/// A finished login: the account summary plus the minted session token.
///
/// The token travels to the originating subscriber inside `login_success`
/// and nowhere else; it is never broadcast and never part of the summary.
#[derive(Clone, Debug)]
pub struct CompletedLogin {
    pub user:    AccountInfo,
    pub session: SessionToken,
}

/// Result of a code or password submission.
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    Complete(CompletedLogin),
    /// The account has 2FA enabled; the password step is next.
    NeedsPassword { hint: Option<String> },
}

// ─── PromptTable ──────────────────────────────────────────────────────────────

struct PendingPrompt {
    kind: PromptKind,
    tx:   oneshot::Sender<String>,
}

/// `account → pending prompt`, consulted by the gateway on every inbound
/// login frame. One pending prompt per account; registering a new one
/// cancels the old (the superseded waiter resolves empty and fails cleanly).
#[derive(Default)]
pub struct PromptTable {
    pending: Mutex<HashMap<AccountId, PendingPrompt>>,
}

impl PromptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until [`PromptTable::resolve`] supplies a value for
    /// `(account, kind)`, or until `timeout` elapses. A timed-out or
    /// cancelled wait resolves to the empty string, which downstream fails
    /// authentication cleanly instead of hanging forever.
    pub async fn request(
        &self,
        account: &AccountId,
        kind:    PromptKind,
        timeout: Duration,
    ) -> String {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.insert(account.clone(), PendingPrompt { kind, tx }).is_some() {
                debug!("[login] superseding pending {kind} prompt for {account}");
            }
        }
        let value = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => value,
            // Timeout or sender dropped: resolve empty.
            _ => String::new(),
        };
        self.pending.lock().unwrap().remove(account);
        value
    }

    /// Supply a value for the account's pending prompt. Returns `false` when
    /// nothing is waiting or the pending prompt asks for a different kind.
    pub fn resolve(&self, account: &AccountId, kind: PromptKind, value: String) -> bool {
        let mut pending = self.pending.lock().unwrap();
        match pending.get(account) {
            Some(p) if p.kind == kind => {}
            _ => return false,
        }
        let prompt = pending.remove(account).unwrap();
        prompt.tx.send(value).is_ok()
    }

    /// The kind the account's login is currently suspended on, if any.
    pub fn pending_kind(&self, account: &AccountId) -> Option<PromptKind> {
        self.pending.lock().unwrap().get(account).map(|p| p.kind)
    }

    /// Drop a pending prompt (account removal, login expiry).
    pub fn cancel(&self, account: &AccountId) {
        self.pending.lock().unwrap().remove(account);
    }
}
