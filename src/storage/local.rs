//! Local filesystem session store.
//!
//! ## File Layout
//!
//! ```text
//! cookies.json
//! {
//!   "cookies": { "name": "value", ... },
//!   "user_agent": "Mozilla/5.0 ..."
//! }
//! ```
//!
//! A bare `{ "name": "value" }` object, as written by older tooling, is also
//! accepted and loaded without a user-agent.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::{AppError, Result};
use crate::models::SessionState;
use crate::storage::SessionStore;

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSession {
    Full(FullRecord),
    Bare(BTreeMap<String, String>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FullRecord {
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    user_agent: Option<String>,
}

impl From<StoredSession> for SessionState {
    fn from(stored: StoredSession) -> Self {
        match stored {
            StoredSession::Full(record) => SessionState::new(record.cookies, record.user_agent),
            StoredSession::Bare(cookies) => SessionState::new(cookies, None),
        }
    }
}

/// Session store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes atomically (write to a unique temp file, then rename).
    ///
    /// Each save gets its own temp file, so concurrent saves never share one.
    async fn write_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| AppError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::store(format!("session write task failed: {e}")))?
    }

    /// Read bytes, returning None if the file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionState>> {
        let Some(bytes) = self.read_bytes().await? else {
            log::debug!("No session file at {}", self.path.display());
            return Ok(None);
        };
        let stored: StoredSession = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::store(format!("{} is not a session jar: {}", self.path.display(), e))
        })?;
        Ok(Some(stored.into()))
    }

    async fn save(&self, state: &SessionState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_bytes(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn jar() -> SessionState {
        SessionState::new(
            BTreeMap::from([("sessid".to_string(), "abc".to_string())]),
            Some("Agent/1.0".to_string()),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path().join("nested/cookies.json"));

        store.save(&jar()).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, Some(jar()));
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path().join("cookies.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_bare_cookie_map() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cookies.json");
        tokio::fs::write(&path, br#"{"u": "2a1b", "v": "1700000000"}"#)
            .await
            .unwrap();

        let loaded = FileSessionStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(loaded.cookies.len(), 2);
        assert_eq!(loaded.cookies["u"], "2a1b");
        assert_eq!(loaded.user_agent, None);
    }

    #[tokio::test]
    async fn test_load_garbage_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cookies.json");
        tokio::fs::write(&path, b"[1, 2, 3]").await.unwrap();

        let result = FileSessionStore::new(&path).load().await;
        assert!(matches!(result, Err(AppError::Store(_))));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path().join("cookies.json"));

        store.save(&jar()).await.unwrap();
        store.save(&SessionState::default()).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(dir_entries(&tmp), vec!["cookies.json".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_one_valid_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::new(tmp.path().join("cookies.json"));
        let other = SessionState::new(
            BTreeMap::from([("u".to_string(), "2".to_string())]),
            None,
        );

        let first = jar();
        let third = jar();
        let (a, b, c) = tokio::join!(
            store.save(&first),
            store.save(&other),
            store.save(&third)
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded == jar() || loaded == other);
        assert_eq!(dir_entries(&tmp), vec!["cookies.json".to_string()]);
    }
}
