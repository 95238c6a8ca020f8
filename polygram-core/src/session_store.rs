//! Durable session-token storage.
//!
//! One pretty-printed JSON object per file, `account id → token`. Writes go
//! through a temp file and an atomic rename, so a reader (or a crash) never
//! observes a half-written file. A corrupt file is quarantined to a
//! timestamped `.bak` beside it and treated as empty — startup never aborts
//! over bad session state, the affected accounts just re-login.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use polygram_types::{AccountId, SessionToken};

pub struct SessionStore {
    path: PathBuf,
    /// Serializes writers so the periodic snapshot and an explicit
    /// login-completion save cannot interleave.
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted map. Missing file → empty map (and an empty file
    /// is created so later saves have a parent directory). Corrupt file →
    /// quarantine + empty map.
    pub fn load(&self) -> io::Result<HashMap<AccountId, SessionToken>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.save(&HashMap::new())?;
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e),
        };
        match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(map) => Ok(map
                .into_iter()
                .map(|(id, token)| (AccountId::new(id), SessionToken::new(token)))
                .collect()),
            Err(e) => {
                let backup = self.quarantine()?;
                warn!(
                    "[session] {} is corrupt ({e}) — quarantined to {}",
                    self.path.display(),
                    backup.display()
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Persist the map atomically: write `<path>.tmp`, then rename over the
    /// target.
    pub fn save(&self, map: &HashMap<AccountId, SessionToken>) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let plain: HashMap<&str, &str> = map
            .iter()
            .map(|(id, token)| (id.as_str(), token.as_str()))
            .collect();
        let body = serde_json::to_string_pretty(&plain)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// One-shot import of the legacy line-oriented `phone:token` format.
    ///
    /// Imported entries are keyed by a phone-derived account id and merged
    /// under "existing keys win"; the legacy file itself is left untouched.
    /// Returns how many entries were merged in.
    pub fn import_legacy(&self, legacy: &Path) -> io::Result<usize> {
        let raw = match fs::read_to_string(legacy) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut map = self.load()?;
        let mut merged = 0;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((phone, token)) = line.split_once(':') else {
                warn!("[session] skipping malformed legacy line: {line:?}");
                continue;
            };
            let id = AccountId::from_phone(phone);
            if !map.contains_key(&id) {
                map.insert(id, SessionToken::new(token.trim()));
                merged += 1;
            }
        }
        if merged > 0 {
            self.save(&map)?;
            info!("[session] imported {merged} legacy account(s) from {}", legacy.display());
        }
        Ok(merged)
    }

    fn quarantine(&self) -> io::Result<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sessions".to_string());
        let backup = self.path.with_file_name(format!("{name}.{stamp}.bak"));
        fs::rename(&self.path, &backup)?;
        Ok(backup)
    }
}
