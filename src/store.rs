//! Durable string-keyed storage for JSON documents.
//!
//! The store has no transactional guarantees across keys: every document
//! (play history, genre cache, liked songs, playlists, downloads) lives under
//! its own key and is replaced as a whole.
//!
//! Two implementations are provided:
//! * [`MemoryStore`] keeps documents in process memory
//! * [`FileStore`] keeps one JSON file per key in a directory

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Well-known document keys.
pub mod keys {
    pub const PLAY_HISTORY: &str = "play_history";
    pub const GENRE_CACHE: &str = "genre_cache";
    pub const LIKED_SONGS: &str = "liked_songs";
    pub const PLAYLISTS: &str = "playlists";
    pub const DOWNLOADS: &str = "downloads";
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Reads and deserializes the document under `key`.
///
/// # Errors
///
/// Returns [`PersistenceFailure`](crate::error::ErrorKind::PersistenceFailure)
/// if the store cannot be read or the document does not parse.
pub async fn load<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(value) => serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| Error::persistence_failure(format!("{key} is corrupt: {e}"))),
        None => Ok(None),
    }
}

/// Serializes `value` and stores it under `key`.
pub async fn save<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_string(value)
        .map_err(|e| Error::persistence_failure(format!("cannot encode {key}: {e}")))?;
    store.set(key, value).await
}

/// Like [`save`], but logs and drops failures. Persistence is fire-and-forget
/// throughout the library.
pub async fn save_or_warn<T>(store: &dyn KeyValueStore, key: &str, value: &T)
where
    T: Serialize + ?Sized,
{
    if let Err(e) = save(store, key, value).await {
        warn!("failed to persist {key}: {e}");
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store in `dir`, creating the directory when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!("file store in {}", dir.display());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        // Keys become file names: keep them to a portable character set.
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|chr| chr.is_ascii_alphanumeric() || chr == '_' || chr == '-');
        if !valid {
            return Err(Error::invalid_argument(format!("invalid store key {key:?}")));
        }

        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::persistence_failure(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let path = self.path(key)?;

        // Write next to the target and rename, so readers never observe a
        // partially written document.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, value)
            .await
            .map_err(|e| Error::persistence_failure(format!("cannot write {key}: {e}")))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| Error::persistence_failure(format!("cannot replace {key}: {e}")))?;

        trace!("stored {key}");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::persistence_failure(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn file_store_replaces_and_removes_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data")).await.unwrap();

        assert_eq!(store.get(keys::PLAYLISTS).await.unwrap(), None);

        store.set(keys::PLAYLISTS, "[1]".to_owned()).await.unwrap();
        store.set(keys::PLAYLISTS, "[1,2]".to_owned()).await.unwrap();
        assert_eq!(
            store.get(keys::PLAYLISTS).await.unwrap().as_deref(),
            Some("[1,2]")
        );

        store.remove(keys::PLAYLISTS).await.unwrap();
        store.remove(keys::PLAYLISTS).await.unwrap();
        assert_eq!(store.get(keys::PLAYLISTS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let err = store.set("../escape", String::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn corrupt_documents_are_persistence_failures() {
        let store = MemoryStore::new();
        store.set(keys::DOWNLOADS, "{not json".to_owned()).await.unwrap();

        let err = load::<HashMap<String, String>>(&store, keys::DOWNLOADS)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
    }
}
