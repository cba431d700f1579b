//! Session Store: the single bearer credential, persisted across restarts.
//!
//! The credential lives in a small JSON document under the fixed key
//! [`CREDENTIAL_KEY`]. The gateway client reads it on every request, so
//! setting or clearing it takes effect for all future calls. There is no
//! expiry or refresh logic; a rejected credential shows up as an ordinary
//! gateway failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::error::Result;

/// Key the credential is stored under.
pub const CREDENTIAL_KEY: &str = "auth_token";

#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    token: RwLock<Option<String>>,
}

impl SessionStore {
    /// Open the store backed by `path`, resuming any persisted credential.
    ///
    /// An unreadable or malformed file is treated as "no session".
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let token = read_token(&path);
        if token.is_some() {
            debug!(path = %path.display(), "resumed persisted session");
        }
        Self { path: Some(path), token: RwLock::new(token) }
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self { path: None, token: RwLock::new(None) }
    }

    /// Set (`Some`) or clear (`None`) the credential and persist the change.
    ///
    /// Idempotent: clearing an absent credential is a no-op on disk.
    pub fn set_credential(&self, token: Option<String>) -> Result<()> {
        let token = token.filter(|t| !t.trim().is_empty());
        if let Some(path) = &self.path {
            match &token {
                Some(t) => write_token(path, t)?,
                None => {
                    if path.exists() {
                        std::fs::remove_file(path)?;
                    }
                }
            }
        }
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
        Ok(())
    }

    pub fn credential(&self) -> Option<String> {
        self.token.read().ok().and_then(|g| g.clone())
    }

    /// Whether the staff-only views may be used.
    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_token(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<BTreeMap<String, String>>(&text) {
        Ok(mut map) => map.remove(CREDENTIAL_KEY),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed session file");
            None
        }
    }
}

fn write_token(path: &Path, token: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut map = BTreeMap::new();
    map.insert(CREDENTIAL_KEY, token);
    let body = serde_json::to_string(&map).unwrap_or_default();
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_starts_unauthenticated() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_set_then_clear() {
        let store = SessionStore::in_memory();
        store.set_credential(Some("tok".to_string())).unwrap();
        assert_eq!(store.credential().as_deref(), Some("tok"));
        store.set_credential(None).unwrap();
        assert!(store.credential().is_none());
        store.set_credential(None).unwrap();
        assert!(store.credential().is_none());
    }

    #[test]
    fn test_blank_token_clears() {
        let store = SessionStore::in_memory();
        store.set_credential(Some("tok".to_string())).unwrap();
        store.set_credential(Some("  ".to_string())).unwrap();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_credential_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        SessionStore::open(&path).set_credential(Some("abc123".to_string())).unwrap();

        let reopened = SessionStore::open(&path);
        assert_eq!(reopened.credential().as_deref(), Some("abc123"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains(CREDENTIAL_KEY), "fixed key on disk: {raw}");
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = SessionStore::open(&path);
        store.set_credential(Some("abc".to_string())).unwrap();
        assert!(path.exists());
        store.set_credential(None).unwrap();
        assert!(!path.exists());
        assert!(SessionStore::open(&path).credential().is_none());
    }

    #[test]
    fn test_malformed_file_is_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(SessionStore::open(&path).credential().is_none());
    }
}
