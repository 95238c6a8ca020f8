//! Relay configuration from `POLYGRAM_*` environment variables.
//!
//! Every setting has a default so the relay starts with zero configuration;
//! an unparseable value falls back to the default with a warning rather
//! than refusing to boot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Address the WebSocket gateway binds.
    /// Env: `POLYGRAM_LISTEN_ADDR`, default `127.0.0.1:8787`.
    pub listen_addr:         SocketAddr,
    /// Session token store.
    /// Env: `POLYGRAM_SESSION_FILE`, default `./polygram-sessions.json`.
    pub session_file:        PathBuf,
    /// Older line-oriented `phone:token` file imported once at startup.
    /// Env: `POLYGRAM_LEGACY_SESSION_FILE`, no default.
    pub legacy_session_file: Option<PathBuf>,
    /// Per-chat message cache bound.
    /// Env: `POLYGRAM_CHAT_CACHE`, default 100.
    pub chat_cache_capacity: usize,
    /// Minimum gap between sends into one chat, milliseconds; absent means
    /// no cooldown. Env: `POLYGRAM_SEND_COOLDOWN_MS`.
    pub send_cooldown_ms:    Option<u64>,
    /// Log filter used when `RUST_LOG` is unset.
    /// Env: `POLYGRAM_LOG`, default `info`.
    pub log_filter:          String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr:         ([127, 0, 0, 1], 8787).into(),
            session_file:        PathBuf::from("./polygram-sessions.json"),
            legacy_session_file: None,
            chat_cache_capacity: 100,
            send_cooldown_ms:    None,
            log_filter:          "info".to_string(),
        }
    }
}

impl Settings {
    pub fn send_cooldown(&self) -> Option<Duration> {
        self.send_cooldown_ms.map(Duration::from_millis)
    }
}

/// Read settings from the environment, defaults where unset or invalid.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(value) = std::env::var("POLYGRAM_LISTEN_ADDR") {
        match value.parse::<SocketAddr>() {
            Ok(addr) => settings.listen_addr = addr,
            Err(_) => warn!("[config] invalid POLYGRAM_LISTEN_ADDR {value:?}, using default"),
        }
    }

    if let Ok(value) = std::env::var("POLYGRAM_SESSION_FILE") {
        settings.session_file = PathBuf::from(value);
    }

    if let Ok(value) = std::env::var("POLYGRAM_LEGACY_SESSION_FILE") {
        if !value.is_empty() {
            settings.legacy_session_file = Some(PathBuf::from(value));
        }
    }

    if let Ok(value) = std::env::var("POLYGRAM_CHAT_CACHE") {
        match value.parse::<usize>() {
            Ok(n) if n > 0 => settings.chat_cache_capacity = n,
            _ => warn!("[config] invalid POLYGRAM_CHAT_CACHE {value:?}, using default"),
        }
    }

    if let Ok(value) = std::env::var("POLYGRAM_SEND_COOLDOWN_MS") {
        match value.parse::<u64>() {
            Ok(0) => settings.send_cooldown_ms = None,
            Ok(ms) => settings.send_cooldown_ms = Some(ms),
            Err(_) => warn!("[config] invalid POLYGRAM_SEND_COOLDOWN_MS {value:?}, ignoring"),
        }
    }

    if let Ok(value) = std::env::var("POLYGRAM_LOG") {
        if !value.is_empty() {
            settings.log_filter = value;
        }
    }

    settings
}
