//! ReDB-backed [`KeyValueStore`] for hosts that want durable local state.
//!
//! One table, string keys, raw byte payloads.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, TableDefinition};

use crate::error::{CoreKitError, CoreKitResult};
use crate::storage::KeyValueStore;

const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("corekit_kv");

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> CoreKitResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| CoreKitError::Storage(e.to_string()))?;
        Self::init(db, path)
    }

    /// Open an in-memory database for testing.
    #[cfg(test)]
    pub fn open_memory() -> CoreKitResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| CoreKitError::Storage(e.to_string()))?;
        Self::init(db, Path::new(":memory:"))
    }

    fn init(db: Database, path: &Path) -> CoreKitResult<Self> {
        let write_txn = db.begin_write()?;
        {
            // Opening the table creates it if it doesn't exist
            let _ = write_txn.open_table(KV)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Opened core kit store");

        Ok(Self { db: Arc::new(db) })
    }

    fn read(&self, key: &str) -> CoreKitResult<Vec<u8>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()).unwrap_or_default())
    }

    fn write(&self, key: &str, payload: &[u8]) -> CoreKitResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(key, payload)?;
        }
        write_txn.commit()?;
        tracing::debug!(key, bytes = payload.len(), "Stored entry");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RedbStore {
    async fn get(&self, key: &str) -> CoreKitResult<Vec<u8>> {
        self.read(key)
    }

    async fn set(&self, key: &str, payload: &[u8]) -> CoreKitResult<()> {
        self.write(key, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redb_store_crud() -> CoreKitResult<()> {
        let store = RedbStore::open_memory()?;

        assert!(store.get("corekitStore").await?.is_empty());

        store.set("corekitStore", br#"{"a":1}"#).await?;
        assert_eq!(store.get("corekitStore").await?, br#"{"a":1}"#.to_vec());

        store.set("corekitStore", b"{}").await?;
        assert_eq!(store.get("corekitStore").await?, b"{}".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_redb_store_survives_reopen() -> CoreKitResult<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested").join("corekit.redb");

        {
            let store = RedbStore::open(&path)?;
            store.set("k", b"persisted").await?;
        }

        let reopened = RedbStore::open(&path)?;
        assert_eq!(reopened.get("k").await?, b"persisted".to_vec());
        Ok(())
    }
}
