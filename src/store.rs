//! Durable key-value storage for the pending-event snapshot

use crate::errors::{DispatchError, Result};
use crate::event::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// String key-value persistence. Absent keys load as `None`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;
    async fn delete_key(&self, key: &str) -> Result<()>;
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open `dir`, creating it when missing
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory the snapshot files live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DispatchError::Store(format!("invalid store key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)?).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");

        // Readers only ever see a complete file
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Load the snapshot stored under `key` and delete it.
///
/// Absent, unreadable or malformed data yields an empty list. The key is
/// removed in every case so the same snapshot is never replayed twice.
pub async fn take_snapshot(store: &dyn DurableStore, key: &str) -> Vec<Event> {
    let events = match store.get_string(key).await {
        Ok(Some(json)) if !json.trim().is_empty() => {
            match serde_json::from_str::<Vec<Event>>(&json) {
                Ok(events) => events,
                Err(e) => {
                    warn!("Discarding malformed snapshot under {}: {}", key, e);
                    Vec::new()
                }
            }
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!("Failed to read snapshot under {}: {}", key, e);
            Vec::new()
        }
    };

    if let Err(e) = store.delete_key(key).await {
        warn!("Failed to delete snapshot under {}: {}", key, e);
    }

    debug!("Restored {} events from snapshot {}", events.len(), key);
    events
}

/// Overwrite the snapshot under `key` with `events`, which may be empty
pub async fn write_snapshot(store: &dyn DurableStore, key: &str, events: &[Event]) -> Result<()> {
    let json = serde_json::to_string(events)?;
    store.set_string(key, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn sample(n: usize) -> Vec<Event> {
        (0..n).map(|i| Event::new(format!("event-{}", i), "session")).collect()
    }

    #[tokio::test]
    async fn test_memory_store_operations() {
        let store = MemoryStore::new();

        assert_eq!(store.get_string("k").await.unwrap(), None);
        assert_ok!(store.set_string("k", "v").await);
        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("v"));
        assert_ok!(store.delete_key("k").await);
        assert_eq!(store.get_string("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested")).await.unwrap();

        assert_eq!(store.get_string("aptabase_key").await.unwrap(), None);
        assert_ok!(store.set_string("aptabase_key", "[1]").await);
        assert_ok!(store.set_string("aptabase_key", "[2]").await);
        assert_eq!(
            store.get_string("aptabase_key").await.unwrap().as_deref(),
            Some("[2]")
        );

        assert_ok!(store.delete_key("aptabase_key").await);
        assert_ok!(store.delete_key("aptabase_key").await);
        assert_eq!(store.get_string("aptabase_key").await.unwrap(), None);
        assert!(!store.dir().join("aptabase_key.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        assert_err!(store.set_string("../escape", "x").await);
        assert_err!(store.get_string("").await);
    }

    #[tokio::test]
    async fn test_snapshot_is_taken_once() {
        let store = MemoryStore::new();
        let events = sample(3);

        write_snapshot(&store, "key", &events).await.unwrap();

        assert_eq!(take_snapshot(&store, "key").await, events);
        assert_eq!(store.get_string("key").await.unwrap(), None);
        assert!(take_snapshot(&store, "key").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_empty_and_cleared() {
        let store = MemoryStore::new();
        store.set_string("key", "{not json").await.unwrap();

        assert!(take_snapshot(&store, "key").await.is_empty());
        assert_eq!(store.get_string("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_snapshot_overwrites_previous() {
        let store = MemoryStore::new();
        write_snapshot(&store, "key", &sample(2)).await.unwrap();
        write_snapshot(&store, "key", &[]).await.unwrap();

        assert_eq!(store.get_string("key").await.unwrap().as_deref(), Some("[]"));
        assert!(take_snapshot(&store, "key").await.is_empty());
    }
}
