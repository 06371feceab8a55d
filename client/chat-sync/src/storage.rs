//! Durable client-local key/value storage
//!
//! Reads and writes are synchronous. Every value is a JSON document; a value
//! that fails to parse is treated as absent and never surfaced to the user.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> SyncResult<()>;
    fn remove(&self, key: &str) -> SyncResult<()>;
}

/// Logical key layout. Each key is owned by exactly one component.
pub mod keys {
    pub const ACTIVE_SESSION: &str = "session.active";
    pub const THEME: &str = "ui.theme";

    pub fn seen_boundary(category: &str, user_id: &str) -> String {
        format!("seen.{category}.{user_id}")
    }

    pub fn local_clear(user_id: &str) -> String {
        format!("chat.clear.{user_id}")
    }
}

pub fn read_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%key, error = %e, "ignoring malformed local storage value");
            None
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> SyncResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.inner.lock().remove(key);
        Ok(())
    }
}

/// Single JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or starts) the store at `path`. A corrupt file starts empty.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let cache = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "local state file is corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(SyncError::Storage(format!("{}: {e}", path.display()))),
        };

        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn flush(&self, snapshot: &BTreeMap<String, String>) -> SyncResult<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| SyncError::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), value.to_string());
        self.flush(&cache)
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut cache = self.cache.lock();
        if cache.remove(key).is_some() {
            self.flush(&cache)?;
        }
        Ok(())
    }
}

/// Active-session credential and UI preference persisted next to the ledgers
pub struct SessionStore<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> SessionStore<'a> {
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    pub fn active_credential(&self) -> Option<String> {
        read_json::<String>(self.store, keys::ACTIVE_SESSION).filter(|c| !c.is_empty())
    }

    pub fn set_active_credential(&self, credential: &str) -> SyncResult<()> {
        write_json(self.store, keys::ACTIVE_SESSION, &credential)
    }

    /// Drops the stored credential after the server rejected it
    pub fn invalidate(&self) -> SyncResult<()> {
        self.store.remove(keys::ACTIVE_SESSION)
    }

    pub fn theme(&self) -> Option<String> {
        read_json(self.store, keys::THEME)
    }

    pub fn set_theme(&self, theme: &str) -> SyncResult<()> {
        write_json(self.store, keys::THEME, &theme)
    }
}
