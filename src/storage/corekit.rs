//! JSON object store layered over a [`KeyValueStore`].
//!
//! All entries live in one JSON object written under the configured store key,
//! so a host only ever sees a single opaque record.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{CoreKitError, CoreKitResult};
use crate::storage::KeyValueStore;

#[derive(Clone)]
pub struct CoreKitStorage {
    storage: Arc<dyn KeyValueStore>,
    store_key: String,
}

impl CoreKitStorage {
    pub fn new(store_key: impl Into<String>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            store_key: store_key.into(),
        }
    }

    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Load the whole store. A missing or non-object payload reads as empty.
    pub async fn get_store(&self) -> CoreKitResult<Map<String, Value>> {
        let raw = self.storage.get(&self.store_key).await?;
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    async fn put_store(&self, store: &Map<String, Value>) -> CoreKitResult<()> {
        let payload = serde_json::to_vec(store)?;
        self.storage.set(&self.store_key, &payload).await
    }

    /// Read one entry. Fails with `NotFound` if absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CoreKitResult<T> {
        let mut store = self.get_store().await?;
        let value = store
            .remove(key)
            .ok_or_else(|| CoreKitError::NotFound(format!("key {key} value not found")))?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn set<T: Serialize>(&self, key: &str, payload: &T) -> CoreKitResult<()> {
        let mut store = self.get_store().await?;
        store.insert(key.to_string(), serde_json::to_value(payload)?);
        self.put_store(&store).await
    }

    pub async fn remove(&self, key: &str) -> CoreKitResult<()> {
        let mut store = self.get_store().await?;
        if store.remove(key).is_some() {
            self.put_store(&store).await?;
        }
        Ok(())
    }

    /// Replace the store with an empty object, returning the previous raw payload.
    pub async fn reset_store(&self) -> CoreKitResult<Vec<u8>> {
        let previous = self.storage.get(&self.store_key).await?;
        self.put_store(&Map::new()).await?;
        tracing::debug!(store_key = %self.store_key, "Reset core kit store");
        Ok(previous)
    }

    pub async fn to_json_string(&self) -> CoreKitResult<String> {
        let raw = self.storage.get(&self.store_key).await?;
        String::from_utf8(raw).map_err(|e| CoreKitError::Deserialization(format!("invalid store: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
    }

    fn storage() -> CoreKitStorage {
        CoreKitStorage::new("corekitStore", Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_entries_share_one_record() -> CoreKitResult<()> {
        let store = storage();
        store.set("a", &Entry { name: "first".into() }).await?;
        store.set("b", &Entry { name: "second".into() }).await?;

        let a: Entry = store.get("a").await?;
        assert_eq!(a.name, "first");

        let raw: Value = serde_json::from_str(&store.to_json_string().await?)?;
        assert_eq!(raw["b"]["name"], "second");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let store = storage();
        let result: CoreKitResult<Entry> = store.get("nope").await;
        assert!(matches!(result, Err(CoreKitError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_and_reset() -> CoreKitResult<()> {
        let store = storage();
        store.set("a", &1u32).await?;
        store.set("b", &2u32).await?;

        store.remove("a").await?;
        assert!(store.get::<u32>("a").await.is_err());
        assert_eq!(store.get::<u32>("b").await?, 2);

        let previous = store.reset_store().await?;
        assert!(!previous.is_empty());
        assert!(store.get_store().await?.is_empty());
        Ok(())
    }
}
