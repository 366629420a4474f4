//! Durable cache storage on the local filesystem.
//!
//! Layout under the root directory:
//!
//! ```text
//! order.json                 store names in creation order
//! <encoded store name>/      one directory per store
//!     <sha256 of key>.json   one serialized entry per request key
//! .staging/<uuid>/           batches being prepared by `put_all`
//! ```
//!
//! Every entry write lands in a temporary file first and is renamed into
//! place, so readers see either the previous or the new entry, never a torn
//! one.

// Author: kelexine (https://github.com/kelexine)

use super::models::{RequestKey, ResponseSnapshot, StoredEntry};
use super::storage::CacheStorage;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ORDER_FILE: &str = "order.json";
const STAGING_DIR: &str = ".staging";

/// Cache stores persisted as directories of JSON entries.
pub struct DiskStorage {
    root: PathBuf,
    /// Serializes store creation/deletion so `order.json` stays consistent.
    order_lock: Mutex<()>,
}

impl DiskStorage {
    /// Open (and create if needed) the storage root.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("Disk cache storage at {}", root.display());
        Ok(Self {
            root,
            order_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') {
            return Err(ProxyError::Storage(format!("invalid cache store name '{}'", name)));
        }
        Ok(self.root.join(urlencoding::encode(name).as_ref()))
    }

    fn entry_path(dir: &Path, key: &RequestKey) -> PathBuf {
        dir.join(format!("{}.json", key.digest()))
    }

    async fn require_store(&self, name: &str) -> Result<PathBuf> {
        let dir = self.store_dir(name)?;
        if !fs::try_exists(&dir).await? {
            return Err(ProxyError::Storage(format!(
                "cache store '{}' does not exist",
                name
            )));
        }
        Ok(dir)
    }

    async fn read_order(&self) -> Result<Vec<String>> {
        match fs::read(self.root.join(ORDER_FILE)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_order(&self, order: &[String]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(order)?;
        write_atomic(&self.root.join(ORDER_FILE), &bytes).await
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to a hidden sibling of `path`, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ProxyError::Internal(format!("no parent for {}", path.display())))?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name)?;
        let _guard = self.order_lock.lock().await;

        let created = !fs::try_exists(&dir).await?;
        if created {
            fs::create_dir_all(&dir).await?;
            debug!("Created cache store {} at {}", name, dir.display());
        }

        let mut order = self.read_order().await?;
        if !order.iter().any(|n| n == name) {
            order.push(name.to_string());
            self.write_order(&order).await?;
        }
        Ok(created)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.store_dir(name)?).await?)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let order = self.read_order().await?;

        // Directories present on disk, decoded back to store names
        let mut on_disk = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            match urlencoding::decode(&file_name) {
                Ok(name) => on_disk.push(name.into_owned()),
                Err(e) => warn!("Skipping undecodable cache directory {}: {}", file_name, e),
            }
        }

        let mut keys: Vec<String> = order
            .into_iter()
            .filter(|name| on_disk.contains(name))
            .collect();
        // Stores created outside this process's bookkeeping go last, by name
        let mut unordered: Vec<String> = on_disk
            .into_iter()
            .filter(|name| !keys.contains(name))
            .collect();
        unordered.sort();
        keys.extend(unordered);
        Ok(keys)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name)?;
        let _guard = self.order_lock.lock().await;

        let existed = match fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let mut order = self.read_order().await?;
        let before = order.len();
        order.retain(|n| n != name);
        if order.len() != before {
            self.write_order(&order).await?;
        }
        Ok(existed)
    }

    async fn match_key(&self, name: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        let dir = self.store_dir(name)?;
        let Some(entry) = Self::read_entry(&Self::entry_path(&dir, key)).await? else {
            return Ok(None);
        };
        if &entry.key != key {
            warn!("Digest collision for {} {}, treating as miss", key.method, key.url);
            return Ok(None);
        }
        let (_, snapshot) = entry.into_snapshot()?;
        Ok(Some(snapshot))
    }

    async fn put(&self, name: &str, key: RequestKey, response: ResponseSnapshot) -> Result<()> {
        let dir = self.require_store(name).await?;
        let bytes = serde_json::to_vec(&StoredEntry::from_snapshot(&key, &response))?;
        write_atomic(&Self::entry_path(&dir, &key), &bytes).await
    }

    /// Stages the batch under `.staging/<uuid>` and renames each entry into
    /// the store. A failure while staging leaves the store untouched; the
    /// rename pass is best-effort. The staging directory is removed either way.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, ResponseSnapshot)>) -> Result<()> {
        let dir = self.require_store(name).await?;
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&staging).await?;

        // Stage the whole batch first; nothing reaches the store on failure
        let mut staged = Vec::with_capacity(entries.len());
        for (key, response) in &entries {
            let path = Self::entry_path(&staging, key);
            let result = match serde_json::to_vec(&StoredEntry::from_snapshot(key, response)) {
                Ok(bytes) => fs::write(&path, bytes).await.map_err(ProxyError::from),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => staged.push((path, Self::entry_path(&dir, key))),
                Err(e) => {
                    let _ = fs::remove_dir_all(&staging).await;
                    return Err(e);
                }
            }
        }

        // Renames are not transactional: entries moved before a failure stay
        for (from, to) in staged {
            if let Err(e) = fs::rename(&from, &to).await {
                warn!("Commit to cache store {} failed at {}: {}", name, to.display(), e);
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e.into());
            }
        }
        let _ = fs::remove_dir_all(&staging).await;
        debug!("Committed {} entries to cache store {}", entries.len(), name);
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>> {
        let dir = self.require_store(name).await?;
        let mut keys = Vec::new();
        let mut read = fs::read_dir(&dir).await?;
        while let Some(entry) = read.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') || !file_name.ends_with(".json") {
                continue;
            }
            if let Some(stored) = Self::read_entry(&entry.path()).await? {
                keys.push(stored.key);
            }
        }
        Ok(keys)
    }
}
