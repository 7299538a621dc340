//! Durable key-value record store
//!
//! The manager's process may be torn down between invocations, so every
//! piece of connection and subscription state lives behind [`RecordStore`].
//! Keys are plain strings built by the repositories; values are opaque bytes.
//!
//! [`SledRecordStore`] is the production implementation. Every mutating call
//! is flushed to disk before it returns.

use async_trait::async_trait;
use chainsub_core::{Error, Result};
use std::path::Path;

/// Read-modify-write function passed to [`RecordStore::update`]
///
/// Receives the current value (if any) and returns the new one; returning
/// `None` removes the key. May be invoked more than once if another writer
/// races on the same key, so it must not have side effects that cannot be
/// repeated.
pub type UpdateFn<'a> = &'a (dyn Fn(Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync);

/// Durable storage of byte records addressed by string keys
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read one record
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write one record, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove one record, returning the previous value
    async fn remove(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All records whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Atomically replace a record with `f(current)` and return the new value
    async fn update(&self, key: &str, f: UpdateFn<'_>) -> Result<Option<Vec<u8>>>;

    /// Remove every record whose key starts with `prefix`
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let entries = self.scan_prefix(prefix).await?;
        let count = entries.len();
        for (key, _) in entries {
            self.remove(&key).await?;
        }
        Ok(count)
    }
}

/// Record store backed by a sled tree
#[derive(Clone)]
pub struct SledRecordStore {
    db: sled::Db,
    records: sled::Tree,
}

impl SledRecordStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open sled database: {}", e)))?;
        Self::from_db(db)
    }

    /// Open a store that is deleted when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Storage(format!("Failed to open temporary database: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let records = db
            .open_tree("records")
            .map_err(|e| Error::Storage(format!("Failed to open records tree: {}", e)))?;
        Ok(Self { db, records })
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush records: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .records
            .get(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read '{}': {}", key, e)))?;
        Ok(value.map(|v| v.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.records
            .insert(key.as_bytes(), value)
            .map_err(|e| Error::Storage(format!("Failed to write '{}': {}", key, e)))?;
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let previous = self
            .records
            .remove(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to remove '{}': {}", key, e)))?;
        if previous.is_some() {
            self.flush().await?;
        }
        Ok(previous.map(|v| v.to_vec()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.records.scan_prefix(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|e| Error::Storage(format!("Failed to scan '{}': {}", prefix, e)))?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Storage(format!("Non UTF-8 key under '{}': {}", prefix, e)))?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }

    async fn update(&self, key: &str, f: UpdateFn<'_>) -> Result<Option<Vec<u8>>> {
        let value = self
            .records
            .update_and_fetch(key.as_bytes(), |current| f(current))
            .map_err(|e| Error::Storage(format!("Failed to update '{}': {}", key, e)))?;
        self.flush().await?;
        Ok(value.map(|v| v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SledRecordStore::temporary().unwrap();

        store.set("a:1", b"one".to_vec()).await.unwrap();
        assert_eq!(store.get("a:1").await.unwrap(), Some(b"one".to_vec()));

        assert_eq!(store.remove("a:1").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("a:1").await.unwrap(), None);
        assert_eq!(store.remove("a:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_and_clear_prefix() {
        let store = SledRecordStore::temporary().unwrap();
        store.set("sub:1", vec![1]).await.unwrap();
        store.set("sub:2", vec![2]).await.unwrap();
        store.set("conn:1", vec![3]).await.unwrap();

        let subs = store.scan_prefix("sub:").await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0, "sub:1");

        assert_eq!(store.clear_prefix("sub:").await.unwrap(), 2);
        assert!(store.scan_prefix("sub:").await.unwrap().is_empty());
        assert!(store.get("conn:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_is_read_modify_write() {
        let store = SledRecordStore::temporary().unwrap();
        let increment = |current: Option<&[u8]>| -> Option<Vec<u8>> {
            let n = current.map(|b| b[0]).unwrap_or(0);
            Some(vec![n + 1])
        };

        assert_eq!(store.update("counter", &increment).await.unwrap(), Some(vec![1]));
        assert_eq!(store.update("counter", &increment).await.unwrap(), Some(vec![2]));

        let delete = |_: Option<&[u8]>| -> Option<Vec<u8>> { None };
        assert_eq!(store.update("counter", &delete).await.unwrap(), None);
        assert_eq!(store.get("counter").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chainsub.db");

        {
            let store = SledRecordStore::open(&path).unwrap();
            store.set("connection:network:mainnet", b"x".to_vec()).await.unwrap();
        }

        let store = SledRecordStore::open(&path).unwrap();
        assert_eq!(
            store.get("connection:network:mainnet").await.unwrap(),
            Some(b"x".to_vec())
        );
    }

    #[tokio::test]
    async fn test_updates_and_removals_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chainsub.db");
        let increment = |current: Option<&[u8]>| -> Option<Vec<u8>> {
            let n = current.map(|b| b[0]).unwrap_or(0);
            Some(vec![n + 1])
        };

        {
            let store = SledRecordStore::open(&path).unwrap();
            store.update("counter", &increment).await.unwrap();
            store.update("counter", &increment).await.unwrap();
            store.set("stale", vec![9]).await.unwrap();
            store.remove("stale").await.unwrap();
        }

        let store = SledRecordStore::open(&path).unwrap();
        assert_eq!(store.get("counter").await.unwrap(), Some(vec![2]));
        assert_eq!(store.get("stale").await.unwrap(), None);
    }
}
