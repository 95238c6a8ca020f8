//! The multi-account core.
//!
//! `AccountManager` is an explicit instance constructed once at process
//! start and handed by reference to the gateway — no global connection maps.
//! It owns every [`AccountConnection`], the login sessions and prompt table,
//! the per-account bounded caches, and one lazily-created broadcast channel
//! per account that subscribers attach to. A single intake task applies raw
//! connection events to the owning account's state (cache bookkeeping
//! happens exactly once, regardless of subscriber count) and re-emits them
//! as manager-level [`AccountEvent`]s; raw connection events never escape
//! unprocessed.
//!
//! Locking: the outer maps and each account's state use plain mutexes held
//! only for non-awaiting critical sections; every remote call happens with
//! all locks released, so one slow account never blocks another.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use polygram_remote::{
    Backoff, ReconnectPolicy, RemoteClient, RemoteConnector, RemoteError, RemoteEvent,
    RemoteRequest, payload, srp,
};
use polygram_types::{
    AccountId, AccountInfo, Chat, ChatId, LastMessage, LoginStep, Message, MessageId, PromptKind,
    SessionToken, UserId,
};

use crate::cache::{DEFAULT_CHAT_CAPACITY, MessageCache};
use crate::connection::{AccountConnection, CALL_TIMEOUT, Intake};
use crate::error::{AuthError, CoreError};
use crate::login::{CompletedLogin, LOGIN_STEP_TIMEOUT, LoginOutcome, LoginSession, PromptTable};
use crate::session_store::SessionStore;
use crate::typing::TypingTracker;

// ─── Events ───────────────────────────────────────────────────────────────────

/// Manager-level events fanned out per account. One broadcast channel per
/// account; a subscriber's receiver lifetime is tied to its gateway
/// connection, so dropping the receiver is the unsubscribe.
#[derive(Clone, Debug)]
pub enum AccountEvent {
    NewMessage { chat_id: ChatId, message: Message },
    MessageEdited { chat_id: ChatId, message: Message },
    MessageDeleted { chat_id: ChatId, message_ids: Vec<MessageId> },
    Typing { chat_id: ChatId, user_id: UserId, typing: bool },
    Online { user_id: UserId, online: bool },
    ChatUpdated(Chat),
    /// An inbound message mentions the account's own handle.
    Mention { chat_id: ChatId, message_id: MessageId },
    /// Human-readable notification line (unmuted inbound messages, session
    /// revocations).
    Notification(String),
    /// An interactive login is waiting for this value.
    LoginPrompt(PromptKind),
    ConnectionState { online: bool },
}

/// Reply to a gateway `auth`: can the account be served right away?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// A live or resumable session exists.
    HasSession,
    /// No usable token; the login flow is required.
    NeedsLogin,
}

// ─── Config ───────────────────────────────────────────────────────────────────

pub struct ManagerConfig {
    pub chat_cache_capacity:   usize,
    /// Minimum gap between sends into the same chat; `None` disables the
    /// check.
    pub send_cooldown:         Option<Duration>,
    pub snapshot_interval:     Duration,
    pub housekeeping_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chat_cache_capacity:   DEFAULT_CHAT_CAPACITY,
            send_cooldown:         None,
            snapshot_interval:     Duration::from_secs(300),
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

// ─── Per-account state ────────────────────────────────────────────────────────

struct AccountState {
    info:        AccountInfo,
    chats:       HashMap<ChatId, Chat>,
    chats_fresh: bool,
    cache:       MessageCache,
    typing:      TypingTracker,
    cooldowns:   HashMap<ChatId, Instant>,
}

impl AccountState {
    fn new(info: AccountInfo, cache_capacity: usize) -> Self {
        Self {
            info,
            chats: HashMap::new(),
            chats_fresh: false,
            cache: MessageCache::new(cache_capacity),
            typing: TypingTracker::new(),
            cooldowns: HashMap::new(),
        }
    }

    /// Fold a fetched chat in. Fetched values win, except the local mention
    /// flag, which only `mark_read` clears.
    fn merge_chat(&mut self, mut fetched: Chat) -> Chat {
        if let Some(existing) = self.chats.get(&fetched.id) {
            fetched.has_mentions = fetched.has_mentions || existing.has_mentions;
        }
        self.chats.insert(fetched.id, fetched.clone());
        fetched
    }

    /// Account-level unread/mention rollup from the per-chat records.
    fn recompute_rollup(&mut self) {
        self.info.unread_count = self.chats.values().map(|c| c.unread_count).sum();
        self.info.has_mentions = self.chats.values().any(|c| c.has_mentions);
    }
}

struct AccountSlot {
    connection: AccountConnection,
    state:      Mutex<AccountState>,
}

// ─── AccountManager ───────────────────────────────────────────────────────────

pub struct AccountManager {
    connector: Arc<dyn RemoteConnector>,
    store:     SessionStore,
    config:    ManagerConfig,
    policy:    Arc<dyn ReconnectPolicy>,

    slots:   Mutex<HashMap<AccountId, Arc<AccountSlot>>>,
    tokens:  Mutex<HashMap<AccountId, SessionToken>>,
    logins:  Mutex<HashMap<AccountId, LoginSession>>,
    /// Unauthenticated clients carrying in-progress logins.
    pending: Mutex<HashMap<AccountId, Arc<dyn RemoteClient>>>,
    prompts: PromptTable,
    buses:   Mutex<HashMap<AccountId, broadcast::Sender<AccountEvent>>>,

    intake_tx: mpsc::UnboundedSender<(AccountId, Intake)>,
    tasks:     Mutex<Vec<JoinHandle<()>>>,
}

impl AccountManager {
    /// Build the manager, load persisted tokens, and spawn the intake and
    /// housekeeping tasks.
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        store:     SessionStore,
        config:    ManagerConfig,
    ) -> Result<Arc<Self>, CoreError> {
        let tokens = store.load().map_err(|e| CoreError::Corrupt(e.to_string()))?;
        info!("[manager] loaded {} persisted session(s)", tokens.len());

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            connector,
            store,
            config,
            policy: Arc::new(Backoff::default()),
            slots: Mutex::new(HashMap::new()),
            tokens: Mutex::new(tokens),
            logins: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            prompts: PromptTable::new(),
            buses: Mutex::new(HashMap::new()),
            intake_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let intake = tokio::spawn(Self::run_intake(manager.clone(), intake_rx));
        let housekeeping = tokio::spawn(Self::run_housekeeping(manager.clone()));
        *manager.tasks.lock().unwrap() = vec![intake, housekeeping];
        Ok(manager)
    }

    // ── Subscription ──────────────────────────────────────────────────────

    /// A receiver for the account's event channel, created lazily.
    pub fn subscribe(&self, account: &AccountId) -> broadcast::Receiver<AccountEvent> {
        let mut buses = self.buses.lock().unwrap();
        buses
            .entry(account.clone())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    fn emit(&self, account: &AccountId, event: AccountEvent) {
        if let Some(bus) = self.buses.lock().unwrap().get(account) {
            // No receivers is fine; events are best-effort fan-out.
            let _ = bus.send(event);
        }
    }

    // ── Accounts ──────────────────────────────────────────────────────────

    fn slot(&self, account: &AccountId) -> Result<Arc<AccountSlot>, CoreError> {
        self.slots
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .ok_or_else(|| CoreError::UnknownAccount(account.clone()))
    }

    /// Account summaries for every live account. Never includes tokens.
    pub fn get_accounts(&self) -> Vec<AccountInfo> {
        let slots: Vec<Arc<AccountSlot>> = self.slots.lock().unwrap().values().cloned().collect();
        let mut infos: Vec<AccountInfo> =
            slots.iter().map(|s| s.state.lock().unwrap().info.clone()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// The gateway's on-ramp: resolve an `auth` frame for `account`.
    pub async fn auth_account(&self, account: &AccountId) -> Result<AuthStatus, CoreError> {
        if self.slots.lock().unwrap().contains_key(account) {
            return Ok(AuthStatus::HasSession);
        }
        let token = self.tokens.lock().unwrap().get(account).cloned();
        match token {
            None => Ok(AuthStatus::NeedsLogin),
            Some(_) => match self.resume_account(account).await {
                Ok(_) => Ok(AuthStatus::HasSession),
                Err(CoreError::Auth(_)) => {
                    // Token rejected: purge it, the account must re-login.
                    warn!("[manager] stored token for {account} rejected — purging");
                    self.tokens.lock().unwrap().remove(account);
                    self.snapshot();
                    Ok(AuthStatus::NeedsLogin)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Resume one account from its persisted token. Idempotent for a live
    /// account; when two resumes race, the slots map picks one winner and
    /// the loser's fresh connection is torn down.
    pub async fn resume_account(&self, account: &AccountId) -> Result<AccountInfo, CoreError> {
        if let Ok(slot) = self.slot(account) {
            return Ok(slot.state.lock().unwrap().info.clone());
        }
        let token = self
            .tokens
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .ok_or_else(|| CoreError::UnknownAccount(account.clone()))?;

        let connection =
            AccountConnection::establish(&self.connector, Some(&token), &self.policy).await?;

        let raw = connection.call(RemoteRequest::GetMe).await?;
        let mut info = payload::parse_account(&raw).map_err(CoreError::from)?;

        // Keys imported from the legacy phone:token format move under the
        // canonical id once the service says who the account is.
        let account = self.migrate_legacy_key(account, &info);
        let account = &account;
        info.id = account.clone();
        info.online = true;

        let slot = Arc::new(AccountSlot {
            connection,
            state: Mutex::new(AccountState::new(info.clone(), self.config.chat_cache_capacity)),
        });

        // Re-check under the lock: a concurrent resume may have registered
        // while this one was connecting. At most one live connection per
        // account, so the duplicate link is closed, not swapped in.
        let winner = {
            let mut slots = self.slots.lock().unwrap();
            match slots.entry(account.clone()) {
                Entry::Occupied(occupied) => Some(occupied.get().clone()),
                Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                    None
                }
            }
        };
        if let Some(winner) = winner {
            debug!("[manager] concurrent resume of {account} — closing the duplicate link");
            slot.connection.close().await;
            return Ok(winner.state.lock().unwrap().info.clone());
        }

        // The service may have rotated the token during resume.
        self.tokens.lock().unwrap().insert(account.clone(), slot.connection.token());
        slot.connection.start_pump(
            account.clone(),
            self.connector.clone(),
            self.policy.clone(),
            self.intake_tx.clone(),
        );

        if let Err(e) = self.refresh_chats(account, &slot).await {
            warn!("[manager] initial dialog fetch for {account} failed: {e}");
        }
        self.emit(account, AccountEvent::ConnectionState { online: true });
        info!("[manager] resumed account {account}");
        Ok(info)
    }

    /// Move a legacy `acc_ph_<digits>` key under the canonical id derived
    /// from the remote user record, bus subscribers included. Returns the
    /// id the account lives under from here on.
    fn migrate_legacy_key(&self, account: &AccountId, info: &AccountInfo) -> AccountId {
        let canonical = info.id.clone();
        if !account.is_legacy_phone() || *account == canonical {
            return account.clone();
        }
        {
            let mut tokens = self.tokens.lock().unwrap();
            if let Some(token) = tokens.remove(account) {
                tokens.entry(canonical.clone()).or_insert(token);
            }
        }
        {
            let mut buses = self.buses.lock().unwrap();
            if let Some(bus) = buses.remove(account) {
                buses.entry(canonical.clone()).or_insert(bus);
            }
        }
        self.snapshot();
        info!("[manager] migrated legacy account key {account} -> {canonical}");
        canonical
    }

    /// Resume every account with a persisted token (boot path). Failures
    /// are logged per account and do not block the others.
    pub async fn resume_all(&self) {
        let ids: Vec<AccountId> = self.tokens.lock().unwrap().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.resume_account(&id).await {
                warn!("[manager] resume of {id} failed: {e}");
            }
        }
    }

    /// Disconnect, sign out remotely (best effort), purge the token and all
    /// owned state for `account`.
    pub async fn remove_account(&self, account: &AccountId) -> Result<(), CoreError> {
        let slot = self.slots.lock().unwrap().remove(account);
        if let Some(slot) = &slot {
            if let Err(e) = slot.connection.call(RemoteRequest::SignOut).await {
                warn!("[manager] sign-out of {account} failed (removing anyway): {e}");
            }
            slot.connection.close().await;
        }
        self.tokens.lock().unwrap().remove(account);
        self.snapshot();
        self.logins.lock().unwrap().remove(account);
        self.pending.lock().unwrap().remove(account);
        self.prompts.cancel(account);
        self.buses.lock().unwrap().remove(account);
        info!("[manager] removed account {account}");
        Ok(())
    }

    // ── Login: request/response mode ──────────────────────────────────────

    /// Start (or restart) a login for `account`: sends the code and returns
    /// the correlation hash required by [`AccountManager::submit_code`].
    pub async fn begin_login(&self, account: &AccountId, phone: &str) -> Result<String, CoreError> {
        if self.slots.lock().unwrap().contains_key(account) {
            return Err(CoreError::InvalidLoginState { expected: LoginStep::Complete });
        }
        let client = match self.pending.lock().unwrap().get(account) {
            Some(c) => Some(c.clone()),
            None => None,
        };
        let client = match client {
            Some(c) => c,
            None => {
                let fresh = call_connect(&self.connector).await?;
                self.pending.lock().unwrap().insert(account.clone(), fresh.clone());
                fresh
            }
        };

        let raw = call_raw(&client, RemoteRequest::RequestLoginCode { phone: phone.to_string() })
            .await?;
        let hash = payload::parse_login_sent(&raw).map_err(CoreError::from)?;

        let mut session = LoginSession::begin(account.clone(), phone.to_string());
        session.step = LoginStep::AwaitingCode;
        session.phone_code_hash = Some(hash.clone());
        self.logins.lock().unwrap().insert(account.clone(), session);
        debug!("[manager] login code sent for {account}");
        Ok(hash)
    }

    /// Submit the received login code. Succeeds outright, or branches to the
    /// password step when the account has 2FA enabled.
    pub async fn submit_code(
        &self,
        account:         &AccountId,
        phone:           &str,
        phone_code_hash: &str,
        code:            &str,
    ) -> Result<LoginOutcome, CoreError> {
        self.expect_login_step(account, LoginStep::AwaitingCode)?;
        let client = self.pending_client(account)?;

        let result = call_raw(&client, RemoteRequest::SubmitCode {
            phone:           phone.to_string(),
            phone_code_hash: phone_code_hash.to_string(),
            code:            code.to_string(),
        })
        .await;

        match result {
            Ok(raw) => {
                let done = self.finalize_login(account, &client, &raw).await?;
                Ok(LoginOutcome::Complete(done))
            }
            Err(e) if is_service(&e, "SESSION_PASSWORD_NEEDED") => {
                // Normal branch, not a failure: the account has 2FA.
                let hint = match call_raw(&client, RemoteRequest::GetPasswordChallenge).await {
                    Ok(raw) => payload::parse_password_challenge(&raw)
                        .ok()
                        .and_then(|c| c.hint),
                    Err(_) => None,
                };
                self.advance_login(account, LoginStep::AwaitingPassword);
                Ok(LoginOutcome::NeedsPassword { hint })
            }
            Err(e) => {
                let core: CoreError = e.into();
                if matches!(core, CoreError::Auth(AuthError::CodeExpired)) {
                    // Expired hash forces a restart from the phone step.
                    self.advance_login(account, LoginStep::AwaitingPhone);
                }
                Err(core)
            }
        }
    }

    /// Submit the 2FA password: fetches the SRP challenge, computes the real
    /// proof, and checks it.
    pub async fn submit_password(
        &self,
        account:  &AccountId,
        password: &str,
    ) -> Result<CompletedLogin, CoreError> {
        self.expect_login_step(account, LoginStep::AwaitingPassword)?;
        let client = self.pending_client(account)?;

        let raw = call_raw(&client, RemoteRequest::GetPasswordChallenge).await?;
        let challenge = payload::parse_password_challenge(&raw).map_err(CoreError::from)?;
        let proof = srp::prove(&challenge, password).map_err(CoreError::from)?;

        let raw = call_raw(&client, RemoteRequest::CheckPassword {
            srp_id: proof.srp_id,
            g_a:    proof.g_a.to_vec(),
            m1:     proof.m1.to_vec(),
        })
        .await?;
        // Invalid password leaves the session at AwaitingPassword for retry.
        self.finalize_login(account, &client, &raw).await
    }

    fn expect_login_step(&self, account: &AccountId, expected: LoginStep) -> Result<(), CoreError> {
        let mut logins = self.logins.lock().unwrap();
        match logins.get_mut(account) {
            None => Err(CoreError::InvalidLoginState { expected: LoginStep::AwaitingPhone }),
            Some(session) if session.expired() => {
                logins.remove(account);
                self.prompts.cancel(account);
                Err(CoreError::InvalidLoginState { expected: LoginStep::AwaitingPhone })
            }
            Some(session) => {
                session.touch();
                session.expect(expected)
            }
        }
    }

    fn advance_login(&self, account: &AccountId, step: LoginStep) {
        if let Some(session) = self.logins.lock().unwrap().get_mut(account) {
            session.step = step;
            if step == LoginStep::AwaitingPhone {
                session.phone_code_hash = None;
            }
            session.touch();
        }
    }

    fn pending_client(&self, account: &AccountId) -> Result<Arc<dyn RemoteClient>, CoreError> {
        self.pending
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .ok_or_else(|| CoreError::Connection("no login in progress".into()))
    }

    /// Completed login: persist the token durably right now (never only on
    /// the periodic snapshot), then bring the account up from it.
    async fn finalize_login(
        &self,
        account: &AccountId,
        client:  &Arc<dyn RemoteClient>,
        raw:     &serde_json::Value,
    ) -> Result<CompletedLogin, CoreError> {
        payload::parse_authorization(raw).map_err(CoreError::from)?;
        let token = client.session_token();
        self.tokens.lock().unwrap().insert(account.clone(), token.clone());
        self.snapshot();

        self.logins.lock().unwrap().remove(account);
        let removed = self.pending.lock().unwrap().remove(account);
        if let Some(login_client) = removed {
            login_client.close().await;
        }
        self.prompts.cancel(account);

        let info = self.resume_account(account).await?;
        // Resume may have rotated the token; report the one now on file.
        let session = self
            .tokens
            .lock()
            .unwrap()
            .get(&info.id)
            .cloned()
            .unwrap_or(token);
        info!("[manager] login complete for {account}");
        Ok(CompletedLogin { user: info, session })
    }

    // ── Login: interactive mode ───────────────────────────────────────────

    /// Drive the whole handshake by prompting subscribers for each value.
    /// Every wait is bounded; an unanswered prompt resolves empty and fails
    /// authentication cleanly instead of deadlocking.
    pub async fn interactive_login(&self, account: &AccountId) -> Result<CompletedLogin, CoreError> {
        self.emit(account, AccountEvent::LoginPrompt(PromptKind::Phone));
        let phone = self.prompts.request(account, PromptKind::Phone, LOGIN_STEP_TIMEOUT).await;
        if phone.is_empty() {
            return Err(AuthError::NotAuthorized.into());
        }

        let hash = self.begin_login(account, &phone).await?;

        self.emit(account, AccountEvent::LoginPrompt(PromptKind::Code));
        let code = self.prompts.request(account, PromptKind::Code, LOGIN_STEP_TIMEOUT).await;
        if code.is_empty() {
            return Err(AuthError::NotAuthorized.into());
        }

        match self.submit_code(account, &phone, &hash, &code).await? {
            LoginOutcome::Complete(done) => Ok(done),
            LoginOutcome::NeedsPassword { .. } => {
                self.emit(account, AccountEvent::LoginPrompt(PromptKind::Password));
                let password =
                    self.prompts.request(account, PromptKind::Password, LOGIN_STEP_TIMEOUT).await;
                if password.is_empty() {
                    return Err(AuthError::NotAuthorized.into());
                }
                self.submit_password(account, &password).await
            }
        }
    }

    /// Route a gateway-supplied value to a suspended interactive login.
    pub fn resolve_prompt(&self, account: &AccountId, kind: PromptKind, value: String) -> bool {
        self.prompts.resolve(account, kind, value)
    }

    // ── Chats & messages ──────────────────────────────────────────────────

    async fn refresh_chats(&self, account: &AccountId, slot: &Arc<AccountSlot>) -> Result<(), CoreError> {
        let raw = slot.connection.call(RemoteRequest::GetDialogs { limit: 100 }).await?;
        let fetched = payload::parse_dialogs(account, &raw).map_err(CoreError::from)?;
        let mut state = slot.state.lock().unwrap();
        for chat in fetched {
            state.merge_chat(chat);
        }
        state.chats_fresh = true;
        state.recompute_rollup();
        Ok(())
    }

    /// The account's chat list, pinned first then most recently active,
    /// refetched when not yet loaded.
    pub async fn get_chats(&self, account: &AccountId, limit: usize) -> Result<Vec<Chat>, CoreError> {
        let slot = self.slot(account)?;
        let fresh = slot.state.lock().unwrap().chats_fresh;
        if !fresh {
            self.refresh_chats(account, &slot).await?;
        }
        let state = slot.state.lock().unwrap();
        let mut chats: Vec<Chat> = state.chats.values().cloned().collect();
        chats.sort_by_key(Chat::sort_key);
        chats.truncate(limit);
        Ok(chats)
    }

    /// Recent history, cache first with remote fallthrough; fetched pages
    /// are folded back into the cache under its bound.
    pub async fn get_history(
        &self,
        account: &AccountId,
        chat:    ChatId,
        limit:   usize,
        before:  Option<MessageId>,
    ) -> Result<Vec<Message>, CoreError> {
        let slot = self.slot(account)?;
        if before.is_none() {
            let state = slot.state.lock().unwrap();
            if state.cache.len(chat) >= limit {
                return Ok(state.cache.recent(chat, limit));
            }
        }
        let raw = slot
            .connection
            .call(RemoteRequest::GetHistory { chat_id: chat, limit: limit as u32, before_id: before })
            .await?;
        let mut page = payload::parse_history(&raw).map_err(CoreError::from)?;
        page.sort_by_key(Message::ordering_key);
        let mut state = slot.state.lock().unwrap();
        state.cache.extend(page.iter().cloned());
        Ok(page)
    }

    /// Send a message, enforcing the local permission and cooldown checks
    /// before any remote call is attempted.
    pub async fn send_message(
        &self,
        account:  &AccountId,
        chat:     ChatId,
        text:     &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, CoreError> {
        let slot = self.slot(account)?;
        {
            let mut state = slot.state.lock().unwrap();
            if let Some(record) = state.chats.get(&chat) {
                if !record.can_send {
                    return Err(CoreError::PermissionDenied(format!(
                        "sending into chat {chat} is not allowed"
                    )));
                }
            }
            if let Some(window) = self.config.send_cooldown {
                if let Some(last) = state.cooldowns.get(&chat) {
                    let elapsed = last.elapsed();
                    if elapsed < window {
                        let retry_after = (window - elapsed).as_secs().max(1);
                        return Err(CoreError::RateLimited { retry_after: Some(retry_after) });
                    }
                }
                state.cooldowns.insert(chat, Instant::now());
            }
        }
        let raw = slot
            .connection
            .call(RemoteRequest::SendMessage {
                chat_id:  chat,
                text:     text.to_string(),
                reply_to,
            })
            .await?;
        let message = payload::parse_message(&raw).map_err(CoreError::from)?;
        // The service echoes the send as a push event, which the intake loop
        // applies; inserting here just makes the cache current immediately.
        let mut state = slot.state.lock().unwrap();
        state.cache.insert(message.clone());
        if let Some(record) = state.chats.get_mut(&chat) {
            record.last_message = Some(LastMessage::of(&message));
        }
        Ok(message)
    }

    /// Idempotent mute toggle: when the chat is already in the target state
    /// the current record is acknowledged without a remote call, so two
    /// rapid toggles to the same value make at most one call.
    pub async fn toggle_mute(
        &self,
        account: &AccountId,
        chat:    ChatId,
        muted:   bool,
    ) -> Result<Chat, CoreError> {
        self.toggle_chat_flag(account, chat, muted, true).await
    }

    /// Idempotent pin toggle; see [`AccountManager::toggle_mute`].
    pub async fn toggle_pin(
        &self,
        account: &AccountId,
        chat:    ChatId,
        pinned:  bool,
    ) -> Result<Chat, CoreError> {
        self.toggle_chat_flag(account, chat, pinned, false).await
    }

    async fn toggle_chat_flag(
        &self,
        account: &AccountId,
        chat:    ChatId,
        target:  bool,
        mute:    bool,
    ) -> Result<Chat, CoreError> {
        let slot = self.slot(account)?;
        {
            let state = slot.state.lock().unwrap();
            let record = state
                .chats
                .get(&chat)
                .ok_or_else(|| CoreError::NotFound(format!("chat {chat}")))?;
            let current = if mute { record.muted } else { record.pinned };
            if current == target {
                return Ok(record.clone());
            }
        }
        let req = if mute {
            RemoteRequest::SetMuted { chat_id: chat, muted: target }
        } else {
            RemoteRequest::SetPinned { chat_id: chat, pinned: target }
        };
        let raw = slot.connection.call(req).await?;
        let fetched = payload::parse_chat(account, &raw).map_err(CoreError::from)?;
        let merged = slot.state.lock().unwrap().merge_chat(fetched);
        self.emit(account, AccountEvent::ChatUpdated(merged.clone()));
        Ok(merged)
    }

    /// Open (read) a chat: zero its unread count, clear its mention flag,
    /// and recompute the account flag — which stays set while any other
    /// chat still carries a mention.
    pub async fn mark_read(&self, account: &AccountId, chat: ChatId) -> Result<(), CoreError> {
        let slot = self.slot(account)?;
        let up_to = {
            let state = slot.state.lock().unwrap();
            state
                .chats
                .get(&chat)
                .and_then(|c| c.last_message.as_ref().map(|m| m.id))
                .or_else(|| state.cache.recent(chat, 1).last().map(|m| m.id))
        };
        if let Some(up_to) = up_to {
            slot.connection
                .call(RemoteRequest::MarkRead { chat_id: chat, up_to })
                .await?;
        }
        let updated = {
            let mut state = slot.state.lock().unwrap();
            if let Some(up_to) = up_to {
                state.cache.mark_read_up_to(chat, up_to);
            }
            let updated = state.chats.get_mut(&chat).map(|record| {
                record.unread_count = 0;
                record.has_mentions = false;
                record.clone()
            });
            state.recompute_rollup();
            updated
        };
        if let Some(chat) = updated {
            self.emit(account, AccountEvent::ChatUpdated(chat));
        }
        Ok(())
    }

    pub async fn join_chat(&self, account: &AccountId, invite: &str) -> Result<Chat, CoreError> {
        let slot = self.slot(account)?;
        let raw = slot
            .connection
            .call(RemoteRequest::JoinChat { invite: invite.to_string() })
            .await?;
        let fetched = payload::parse_chat(account, &raw).map_err(CoreError::from)?;
        let merged = slot.state.lock().unwrap().merge_chat(fetched);
        self.emit(account, AccountEvent::ChatUpdated(merged.clone()));
        Ok(merged)
    }

    pub async fn set_typing(
        &self,
        account: &AccountId,
        chat:    ChatId,
        typing:  bool,
    ) -> Result<(), CoreError> {
        let slot = self.slot(account)?;
        slot.connection
            .call(RemoteRequest::SetTyping { chat_id: chat, typing })
            .await?;
        Ok(())
    }

    pub async fn send_reaction(
        &self,
        account: &AccountId,
        chat:    ChatId,
        message: MessageId,
        emoji:   &str,
    ) -> Result<(), CoreError> {
        let slot = self.slot(account)?;
        slot.connection
            .call(RemoteRequest::SendReaction {
                chat_id:    chat,
                message_id: message,
                emoji:      emoji.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        account: &AccountId,
        chat:    ChatId,
        message: MessageId,
    ) -> Result<(), CoreError> {
        let slot = self.slot(account)?;
        slot.connection
            .call(RemoteRequest::RemoveReaction { chat_id: chat, message_id: message })
            .await?;
        Ok(())
    }

    pub async fn delete_message(
        &self,
        account: &AccountId,
        chat:    ChatId,
        message: MessageId,
    ) -> Result<(), CoreError> {
        let slot = self.slot(account)?;
        let result = slot
            .connection
            .call(RemoteRequest::DeleteMessage { chat_id: chat, message_id: message })
            .await;
        if let Err(CoreError::NotFound(_)) = &result {
            // Gone remotely: invalidate the cached copy rather than crash.
            slot.state.lock().unwrap().cache.apply_delete(chat, &[message]);
        }
        result.map(|_| ())
    }

    /// Users currently typing in `chat`, entries older than 5 s excluded.
    pub fn typing_users(&self, account: &AccountId, chat: ChatId) -> Vec<UserId> {
        self.slot(account)
            .map(|slot| slot.state.lock().unwrap().typing.typing_users(chat))
            .unwrap_or_default()
    }

    // ── Persistence ───────────────────────────────────────────────────────

    /// Write the current token map to the session store.
    pub fn snapshot(&self) {
        let tokens = self.tokens.lock().unwrap().clone();
        let count = tokens.len();
        match self.store.save(&tokens) {
            Ok(()) => debug!("[session] saved {count} account(s)"),
            Err(e) => warn!("[session] snapshot failed: {e}"),
        }
    }

    /// Graceful shutdown: final snapshot, stop background tasks, close every
    /// connection.
    pub async fn shutdown(&self) {
        self.snapshot();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        let slots: Vec<Arc<AccountSlot>> =
            self.slots.lock().unwrap().drain().map(|(_, s)| s).collect();
        for slot in slots {
            slot.connection.close().await;
        }
        info!("[manager] shut down");
    }

    // ── Intake ────────────────────────────────────────────────────────────

    async fn run_intake(
        manager: Arc<Self>,
        mut rx:  mpsc::UnboundedReceiver<(AccountId, Intake)>,
    ) {
        while let Some((account, intake)) = rx.recv().await {
            match intake {
                Intake::Event(event) => manager.apply_event(&account, event).await,
                Intake::Online(online) => {
                    let Ok(slot) = manager.slot(&account) else { continue };
                    let changed = {
                        let mut state = slot.state.lock().unwrap();
                        let changed = state.info.online != online;
                        state.info.online = online;
                        if online {
                            state.chats_fresh = false;
                        }
                        changed
                    };
                    // Coming (back) online is always announced — it is the
                    // subscribers' resync signal; repeated offline reports
                    // from the retry loop are deduplicated.
                    if changed || online {
                        manager.emit(&account, AccountEvent::ConnectionState { online });
                    }
                    if online {
                        // Push events during the outage are lost; reconcile
                        // by refetching, off the intake loop.
                        let manager = manager.clone();
                        let slot = slot.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.refresh_chats(&account, &slot).await {
                                warn!("[manager] resync of {account} failed: {e}");
                            }
                        });
                    }
                }
            }
        }
    }

    /// Apply one validated remote event to the owning account and re-emit
    /// it at manager level. Bookkeeping happens here exactly once.
    async fn apply_event(&self, account: &AccountId, event: RemoteEvent) {
        let Ok(slot) = self.slot(account) else { return };
        match event {
            RemoteEvent::NewMessage(message) => {
                let chat_id = message.chat_id;
                let (mentioned, notify) = {
                    let mut state = slot.state.lock().unwrap();
                    state.cache.insert(message.clone());
                    let handle = state.info.handle.clone().unwrap_or_default();
                    let mentioned = !message.from_self && message.mentions(&handle);
                    let mut notify = None;
                    if let Some(record) = state.chats.get_mut(&chat_id) {
                        record.last_message = Some(LastMessage::of(&message));
                        if !message.from_self {
                            record.unread_count += 1;
                            if !record.muted {
                                notify = Some(format!("{}: {}", record.title, message.text));
                            }
                        }
                        if mentioned {
                            record.has_mentions = true;
                        }
                    }
                    if mentioned {
                        state.info.has_mentions = true;
                    }
                    state.recompute_rollup();
                    (mentioned, notify)
                };
                self.emit(account, AccountEvent::NewMessage { chat_id, message: message.clone() });
                if mentioned {
                    self.emit(account, AccountEvent::Mention { chat_id, message_id: message.id });
                }
                if let Some(text) = notify {
                    self.emit(account, AccountEvent::Notification(text));
                }
            }
            RemoteEvent::MessageEdited(message) => {
                let chat_id = message.chat_id;
                {
                    let mut state = slot.state.lock().unwrap();
                    state.cache.insert(message.clone());
                    if let Some(record) = state.chats.get_mut(&chat_id) {
                        if record.last_message.as_ref().is_some_and(|m| m.id == message.id) {
                            record.last_message = Some(LastMessage::of(&message));
                        }
                    }
                }
                self.emit(account, AccountEvent::MessageEdited { chat_id, message });
            }
            RemoteEvent::MessageDeleted { chat_id, message_ids } => {
                {
                    let mut state = slot.state.lock().unwrap();
                    state.cache.apply_delete(chat_id, &message_ids);
                    let newest = state.cache.recent(chat_id, 1).pop();
                    if let Some(record) = state.chats.get_mut(&chat_id) {
                        if record
                            .last_message
                            .as_ref()
                            .is_some_and(|m| message_ids.contains(&m.id))
                        {
                            record.last_message = newest.as_ref().map(LastMessage::of);
                        }
                    }
                }
                self.emit(account, AccountEvent::MessageDeleted { chat_id, message_ids });
            }
            RemoteEvent::Typing { chat_id, user_id, typing } => {
                slot.state.lock().unwrap().typing.set(chat_id, user_id, typing);
                self.emit(account, AccountEvent::Typing { chat_id, user_id, typing });
            }
            RemoteEvent::Online { user_id, online } => {
                self.emit(account, AccountEvent::Online { user_id, online });
            }
            RemoteEvent::ChatUpdated(chat) => {
                let merged = slot.state.lock().unwrap().merge_chat(chat);
                self.emit(account, AccountEvent::ChatUpdated(merged));
            }
            RemoteEvent::SessionRevoked => {
                warn!("[manager] session for {account} revoked by the service");
                self.slots.lock().unwrap().remove(account);
                self.tokens.lock().unwrap().remove(account);
                self.snapshot();
                slot.connection.close().await;
                self.emit(account, AccountEvent::ConnectionState { online: false });
                self.emit(
                    account,
                    AccountEvent::Notification("session revoked — login required".into()),
                );
            }
        }
    }

    // ── Housekeeping ──────────────────────────────────────────────────────

    async fn run_housekeeping(manager: Arc<Self>) {
        let mut tick = tokio::time::interval(manager.config.housekeeping_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_snapshot = Instant::now();
        loop {
            tick.tick().await;

            // Expire leaked logins and their prompts.
            let expired: Vec<AccountId> = {
                let mut logins = manager.logins.lock().unwrap();
                let expired: Vec<AccountId> = logins
                    .iter()
                    .filter(|(_, s)| s.expired())
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &expired {
                    logins.remove(id);
                }
                expired
            };
            for id in expired {
                warn!("[manager] login for {id} expired without completing");
                manager.prompts.cancel(&id);
                manager.pending.lock().unwrap().remove(&id);
            }

            // Prune stale typing entries.
            let slots: Vec<Arc<AccountSlot>> =
                manager.slots.lock().unwrap().values().cloned().collect();
            for slot in slots {
                slot.state.lock().unwrap().typing.prune();
            }

            if last_snapshot.elapsed() >= manager.config.snapshot_interval {
                manager.snapshot();
                last_snapshot = Instant::now();
            }
        }
    }
}

// ─── Free helpers ─────────────────────────────────────────────────────────────

/// Connect an unauthenticated login client, without retries (the caller is
/// an interactive user who can simply try again).
async fn call_connect(
    connector: &Arc<dyn RemoteConnector>,
) -> Result<Arc<dyn RemoteClient>, CoreError> {
    match tokio::time::timeout(CALL_TIMEOUT, connector.connect(None)).await {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(RemoteError::Timeout.into()),
    }
}

/// One raw call on a login client with the standard hard timeout.
async fn call_raw(
    client: &Arc<dyn RemoteClient>,
    req:    RemoteRequest,
) -> Result<serde_json::Value, RemoteError> {
    match tokio::time::timeout(CALL_TIMEOUT, client.invoke(req)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

fn is_service(e: &RemoteError, name: &str) -> bool {
    e.is(name)
}
