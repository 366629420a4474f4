// In-memory cache storage backend
// Author: kelexine (https://github.com/kelexine)

use super::models::{RequestKey, ResponseSnapshot};
use super::storage::CacheStorage;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

type Store = HashMap<RequestKey, ResponseSnapshot>;

/// Cache stores held in process memory. Used for tests and for deployments
/// that do not need the cache to outlive the process.
#[derive(Default)]
pub struct MemoryStorage {
    /// Stores in creation order.
    stores: RwLock<Vec<(String, Store)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(name: &str) -> ProxyError {
    ProxyError::Storage(format!("cache store '{}' does not exist", name))
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        if stores.iter().any(|(n, _)| n == name) {
            return Ok(false);
        }
        stores.push((name.to_string(), Store::new()));
        debug!("Created cache store {}", name);
        Ok(true)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.iter().any(|(n, _)| n == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|(n, _)| n.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|(n, _)| n != name);
        Ok(stores.len() != before)
    }

    async fn match_key(&self, name: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        let stores = self.stores.read().await;
        Ok(stores
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, store)| store.get(key).cloned()))
    }

    async fn put(&self, name: &str, key: RequestKey, response: ResponseSnapshot) -> Result<()> {
        let mut stores = self.stores.write().await;
        let (_, store) = stores
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| missing(name))?;
        store.insert(key, response);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, ResponseSnapshot)>) -> Result<()> {
        // Single write lock: the batch becomes visible all at once
        let mut stores = self.stores.write().await;
        let (_, store) = stores
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| missing(name))?;
        store.extend(entries);
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>> {
        let stores = self.stores.read().await;
        let (_, store) = stores
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| missing(name))?;
        Ok(store.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};

    fn snapshot(body: &'static str) -> ResponseSnapshot {
        ResponseSnapshot::new(StatusCode::OK, HeaderMap::new(), body)
    }

    #[tokio::test]
    async fn test_keys_in_creation_order() {
        let storage = MemoryStorage::new();
        assert!(storage.open("lazarus-v2").await.unwrap());
        assert!(storage.open("lazarus-v1").await.unwrap());
        assert!(!storage.open("lazarus-v2").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["lazarus-v2", "lazarus-v1"]);
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let storage = MemoryStorage::new();
        storage.open("v1").await.unwrap();
        let key = RequestKey::get("/api/notes");

        storage.put("v1", key.clone(), snapshot("old")).await.unwrap();
        storage.put("v1", key.clone(), snapshot("new")).await.unwrap();

        let hit = storage.match_key("v1", &key).await.unwrap().unwrap();
        assert_eq!(hit.body, "new");
        assert_eq!(storage.entries("v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_into_deleted_store_fails() {
        let storage = MemoryStorage::new();
        storage.open("v1").await.unwrap();
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());

        let result = storage.put("v1", RequestKey::get("/"), snapshot("shell")).await;
        assert!(result.is_err());
        assert!(!storage.has("v1").await.unwrap());
    }
}
