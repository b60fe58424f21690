//! Document storage for registry records.
//!
//! Records live in named collections and are addressed by key. Each record
//! is one JSON document.

use crate::error::SupervisorError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";

/// One JSON file per record under `<root>/<collection>/<key>.json`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root
            .join(collection)
            .join(format!("{}.{}", key, RECORD_EXTENSION))
    }

    async fn write(&self, collection: &str, key: &str, data: &[u8]) -> Result<(), SupervisorError> {
        let path = self.record_path(collection, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Wrote {} bytes to {:?}", data.len(), path);
        Ok(())
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, SupervisorError> {
        match fs::read(self.record_path(collection, key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Vec<u8>>, SupervisorError> {
        let dir = self.root.join(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match fs::read(&path).await {
                Ok(data) => records.push(data),
                // Deleted between listing and reading.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        Ok(records)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, SupervisorError> {
        match fs::remove_file(self.record_path(collection, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for testing or when persistence is disabled.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    async fn write(&self, collection: &str, key: &str, data: &[u8]) -> Result<(), SupervisorError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, SupervisorError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Vec<u8>>, SupervisorError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, SupervisorError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false))
    }
}

/// Storage backend for registry records.
pub enum Store {
    /// JSON files on disk
    File(FileStore),
    /// In-memory only (no persistence)
    Memory(MemoryStore),
}

impl Store {
    /// File-backed store rooted at `root`.
    pub fn file(root: impl Into<PathBuf>) -> Self {
        let store = FileStore::new(root);
        info!("Using file storage at {:?}", store.root());
        Store::File(store)
    }

    /// Memory-only store.
    pub fn memory() -> Self {
        Store::Memory(MemoryStore::default())
    }

    /// Serialize and write one record.
    pub async fn write<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
    ) -> Result<(), SupervisorError> {
        let data = serde_json::to_vec_pretty(value)?;
        match self {
            Store::File(s) => s.write(collection, key, &data).await,
            Store::Memory(s) => s.write(collection, key, &data).await,
        }
    }

    /// Read one record, `None` if absent.
    pub async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, SupervisorError> {
        let data = match self {
            Store::File(s) => s.read(collection, key).await?,
            Store::Memory(s) => s.read(collection, key).await?,
        };
        data.map(|d| serde_json::from_slice(&d).map_err(SupervisorError::from))
            .transpose()
    }

    /// Read every record of a collection. Records that fail to decode are
    /// logged and skipped.
    pub async fn read_all<T: DeserializeOwned>(
        &self,
        collection: &str,
    ) -> Result<Vec<T>, SupervisorError> {
        let raw = match self {
            Store::File(s) => s.read_all(collection).await?,
            Store::Memory(s) => s.read_all(collection).await?,
        };

        Ok(raw
            .iter()
            .filter_map(|data| match serde_json::from_slice(data) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(collection, "Skipping undecodable record: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Remove one record. Returns whether it existed.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<bool, SupervisorError> {
        match self {
            Store::File(s) => s.delete(collection, key).await,
            Store::Memory(s) => s.delete(collection, key).await,
        }
    }
}
