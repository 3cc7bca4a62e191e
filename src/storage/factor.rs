//! Local cache of a recovery factor keyed by the wallet's metadata public key.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{CoreKitError, CoreKitResult};
use crate::storage::CoreKitStorage;

const FACTOR_KEY_FIELD: &str = "factorKey";

#[async_trait]
pub trait FactorStorage: Send + Sync {
    async fn set_factor(&self, metadata_pub_key: &str, factor_key: &str) -> CoreKitResult<()>;

    /// Fails with `NotFound` when no factor is cached for the key.
    async fn get_factor(&self, metadata_pub_key: &str) -> CoreKitResult<String>;
}

/// Stores `{"factorKey": ...}` under the metadata public key inside the core kit store.
#[derive(Clone)]
pub struct DeviceFactorStorage {
    storage: CoreKitStorage,
}

impl DeviceFactorStorage {
    pub fn new(storage: CoreKitStorage) -> Self {
        Self { storage }
    }

    /// Drop whatever is cached for this metadata key.
    pub async fn reset(&self, metadata_pub_key: &str) -> CoreKitResult<()> {
        self.storage.set(metadata_pub_key, &Map::new()).await
    }

    async fn local_metadata(&self, metadata_pub_key: &str) -> Map<String, Value> {
        self.storage
            .get::<Map<String, Value>>(metadata_pub_key)
            .await
            .unwrap_or_default()
    }
}

#[async_trait]
impl FactorStorage for DeviceFactorStorage {
    async fn set_factor(&self, metadata_pub_key: &str, factor_key: &str) -> CoreKitResult<()> {
        let mut local = self.local_metadata(metadata_pub_key).await;
        local.insert(FACTOR_KEY_FIELD.to_string(), Value::String(factor_key.to_string()));
        self.storage.set(metadata_pub_key, &local).await?;
        tracing::debug!(metadata_pub_key, "Cached device factor");
        Ok(())
    }

    async fn get_factor(&self, metadata_pub_key: &str) -> CoreKitResult<String> {
        self.local_metadata(metadata_pub_key)
            .await
            .get(FACTOR_KEY_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreKitError::NotFound("device factor not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::InMemoryStore;

    fn factor_storage() -> DeviceFactorStorage {
        DeviceFactorStorage::new(CoreKitStorage::new(
            "corekitStore",
            Arc::new(InMemoryStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_set_and_get_factor() -> CoreKitResult<()> {
        let storage = factor_storage();
        storage.set_factor("02abc", "deadbeef").await?;
        assert_eq!(storage.get_factor("02abc").await?, "deadbeef");

        storage.set_factor("02abc", "cafebabe").await?;
        assert_eq!(storage.get_factor("02abc").await?, "cafebabe");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_factor_is_not_found() {
        let storage = factor_storage();
        let err = storage.get_factor("02abc").await.unwrap_err();
        assert!(matches!(err, CoreKitError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reset_removes_factor() -> CoreKitResult<()> {
        let storage = factor_storage();
        storage.set_factor("02abc", "deadbeef").await?;
        storage.reset("02abc").await?;
        assert!(storage.get_factor("02abc").await.is_err());
        Ok(())
    }
}
