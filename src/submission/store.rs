//! Keyed persistent store for the enrollment hand-off.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DatabaseError;

/// Backend-agnostic key/value store. Values are JSON documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite the value under `key`.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError>;

    /// Remove `key`. Returns whether anything was removed.
    async fn clear(&self, key: &str) -> Result<bool, DatabaseError>;

    /// Read and remove in one go, for entries meant to be consumed once.
    async fn take(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.clear(key).await?;
        }
        Ok(value)
    }
}

/// In-memory store (tests and ephemeral runs).
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), DatabaseError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn clear(&self, key: &str) -> Result<bool, DatabaseError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        Ok(self.entries.write().await.remove(key))
    }
}
