//! Storage layer for the core kit.
//!
//! The host application supplies a [`KeyValueStore`]. The kit keeps a single
//! JSON object under one store key ([`CoreKitStorage`]) and layers the device
//! factor cache on top of it ([`DeviceFactorStorage`]).

pub mod corekit;
pub mod factor;
pub mod redb;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreKitResult;

pub use self::corekit::CoreKitStorage;
pub use self::factor::{DeviceFactorStorage, FactorStorage};
pub use self::redb::RedbStore;

/// Minimal persistence contract the kit requires from its host.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns an empty payload when the key is absent.
    async fn get(&self, key: &str) -> CoreKitResult<Vec<u8>>;

    async fn set(&self, key: &str, payload: &[u8]) -> CoreKitResult<()>;
}

/// Process-local store, lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
    memory: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> CoreKitResult<Vec<u8>> {
        Ok(self.memory.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, payload: &[u8]) -> CoreKitResult<()> {
        self.memory
            .write()
            .await
            .insert(key.to_string(), payload.to_vec());
        Ok(())
    }
}
