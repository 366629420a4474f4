// Cache storage module
// Author: kelexine (https://github.com/kelexine)

pub mod disk;
pub mod memory;
pub mod models;
pub mod storage;
pub mod store;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use models::{RequestKey, ResponseSnapshot};
pub use storage::CacheStorage;
pub use store::Cache;

use crate::config::{CacheSettings, StorageBackend};
use crate::error::Result;
use std::sync::Arc;

/// Build the storage backend selected in the configuration.
pub async fn open_storage(settings: &CacheSettings) -> Result<Arc<dyn CacheStorage>> {
    let storage: Arc<dyn CacheStorage> = match settings.backend {
        StorageBackend::Disk => Arc::new(DiskStorage::new(&settings.dir).await?),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}
