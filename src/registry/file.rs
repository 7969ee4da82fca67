//! JSON-file counter store for single-process deployments and the CLI.
//!
//! Transactions are serialised by an async mutex; the record is written
//! atomically (temp file + rename) so a crash never leaves a half-written
//! counter behind. Not safe for several processes sharing one file.

use super::store::{CounterRecord, CounterStore, CounterValue, UpdateFn};
use crate::error::{StoreError, TransactError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// A [`CounterStore`] backed by one JSON file.
#[derive(Debug)]
pub struct JsonFileCounterStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<CounterRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, record: &CounterRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Corrupt(format!("serialise counter: {e}")))?;

        // Atomic write: write to temp, then rename
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(
            "counter written to {}: {}/{}",
            self.path.display(),
            record.year,
            record.last_number
        );
        Ok(())
    }
}

#[async_trait]
impl CounterStore for JsonFileCounterStore {
    async fn get(&self) -> Result<Option<CounterRecord>, StoreError> {
        self.read().await
    }

    async fn transact(&self, update: &UpdateFn) -> Result<CounterRecord, TransactError> {
        let _guard = self.lock.lock().await;
        let current = self.read().await?;
        let next = update(current.as_ref()).map_err(TransactError::Rejected)?;
        let record = next.stamped(Utc::now());
        self.write(&record).await?;
        Ok(record)
    }

    async fn put(&self, value: CounterValue) -> Result<CounterRecord, StoreError> {
        let _guard = self.lock.lock().await;
        let record = value.stamped(Utc::now());
        self.write(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileCounterStore::new(dir.path().join("counter.json"));
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/counter.json");
        let store = JsonFileCounterStore::new(&path);
        store
            .put(CounterValue {
                year: 2025,
                last_number: 41,
            })
            .await
            .unwrap();

        let reopened = JsonFileCounterStore::new(&path);
        let rec = reopened.get().await.unwrap().unwrap();
        assert_eq!((rec.year, rec.last_number), (2025, 41));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("lastNumber"), "got: {raw}");
    }

    #[tokio::test]
    async fn invalid_json_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = JsonFileCounterStore::new(&path);
        assert!(matches!(store.get().await, Err(StoreError::Corrupt(_))));
    }
}
