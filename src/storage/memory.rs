use dashmap::DashMap;
use std::path::{Path, PathBuf};

use super::KvStorage;
use crate::error::{NamingError, Result};

const SNAPSHOT_FILE: &str = "kv.snapshot";

pub struct MemoryKvStorage {
    data: DashMap<String, Vec<u8>>,
    snapshot_dir: Option<PathBuf>,
}

impl MemoryKvStorage {
    /// Store without a snapshot location; snapshots are no-ops.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            snapshot_dir: None,
        }
    }

    pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            data: DashMap::new(),
            snapshot_dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot_dir.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }
}

impl Default for MemoryKvStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStorage for MemoryKvStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn do_snapshot(&self) -> Result<()> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };

        let mut entries: Vec<(String, Vec<u8>)> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let encoded = bincode::serialize(&entries)
            .map_err(|e| NamingError::Storage(format!("snapshot encode failed: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // previous snapshot stays intact until the rename
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("Snapshot written: {} entries to {:?}", entries.len(), path);
        Ok(())
    }

    fn snapshot_load(&self) -> Result<usize> {
        let Some(path) = self.snapshot_path() else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }

        let bytes = std::fs::read(&path)?;
        let entries: Vec<(String, Vec<u8>)> = bincode::deserialize(&bytes)
            .map_err(|e| NamingError::Storage(format!("snapshot decode failed: {e}")))?;

        self.data.clear();
        let count = entries.len();
        for (key, value) in entries {
            self.data.insert(key, value);
        }

        tracing::info!("Snapshot loaded: {} entries from {:?}", count, path);
        Ok(count)
    }
}
