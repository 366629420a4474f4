//! The cache storage abstraction: a set of named stores, each a
//! key → response map.

// Author: kelexine (https://github.com/kelexine)

use super::models::{RequestKey, ResponseSnapshot};
use crate::error::Result;
use async_trait::async_trait;

/// Named, versioned cache stores.
///
/// Writes to a single key are atomic and last-write-wins. Writing into a
/// store that does not exist fails, so a store purged during activation is
/// never resurrected by a late write.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if absent. Returns `true` when it was created.
    async fn open(&self, name: &str) -> Result<bool>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Store names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a whole store. Returns `true` when it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn match_key(&self, name: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>>;

    async fn put(&self, name: &str, key: RequestKey, response: ResponseSnapshot) -> Result<()>;

    /// Commit a batch of entries. A batch that cannot be fully prepared
    /// writes nothing; backends that commit entry by entry may leave part of
    /// a batch behind if the commit itself fails.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, ResponseSnapshot)>) -> Result<()>;

    /// Keys currently held by a store.
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>>;
}
