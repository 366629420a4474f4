// Handle to one named cache store
// Author: kelexine (https://github.com/kelexine)

use super::models::{RequestKey, ResponseSnapshot};
use super::storage::CacheStorage;
use crate::error::{ProxyError, Result};
use crate::upstream::{Fetcher, ProxiedRequest};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// A cache store bound to its name.
#[derive(Clone)]
pub struct Cache {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl Cache {
    /// Open (creating if absent) the store called `name`.
    /// Returns the handle and whether the store was created.
    pub async fn open(storage: Arc<dyn CacheStorage>, name: &str) -> Result<(Self, bool)> {
        let created = storage.open(name).await?;
        Ok((
            Self {
                storage,
                name: name.to_string(),
            },
            created,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        self.storage.match_key(&self.name, key).await
    }

    pub async fn put(&self, key: RequestKey, response: ResponseSnapshot) -> Result<()> {
        self.storage.put(&self.name, key, response).await
    }

    /// Fetch every path and store the responses as one batch, together with
    /// a manifest listing the paths.
    ///
    /// All fetches run concurrently and must resolve with a 2xx status;
    /// otherwise the whole operation fails and nothing is written.
    pub async fn add_all(&self, fetcher: &dyn Fetcher, paths: &[String]) -> Result<usize> {
        let fetches = paths.iter().map(|path| async move {
            let request = ProxiedRequest::get(path);
            let response = fetcher.fetch(&request).await?;
            if !response.is_ok() {
                return Err(ProxyError::BadStatus {
                    url: path.clone(),
                    status: response.status.as_u16(),
                });
            }
            Ok((RequestKey::get(path), response))
        });

        let mut entries = try_join_all(fetches).await?;
        let count = entries.len();
        entries.push((RequestKey::manifest(), Self::manifest_response(paths)?));
        self.storage.put_all(&self.name, entries).await?;
        debug!("Cached {} assets in {}", count, self.name);
        Ok(count)
    }

    /// The asset list recorded by the last successful `add_all`, if any.
    pub async fn installed_assets(&self) -> Result<Option<Vec<String>>> {
        match self.match_request(&RequestKey::manifest()).await? {
            Some(manifest) => Ok(Some(serde_json::from_slice(&manifest.body)?)),
            None => Ok(None),
        }
    }

    fn manifest_response(paths: &[String]) -> Result<ResponseSnapshot> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(ResponseSnapshot::new(
            StatusCode::OK,
            headers,
            serde_json::to_vec(paths)?,
        ))
    }
}
