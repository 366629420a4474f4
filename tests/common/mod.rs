// Shared fixtures for integration tests
// Author: kelexine (https://github.com/kelexine)

#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use lazarus_sw::cache::{CacheStorage, MemoryStorage, RequestKey, ResponseSnapshot};
use lazarus_sw::config::{CacheSettings, RoutingConfig};
use lazarus_sw::error::{ProxyError, Result};
use lazarus_sw::upstream::{Fetcher, ProxiedRequest};
use lazarus_sw::worker::{Registration, WorkerSettings, WriteBehind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// In-process stand-in for the app server with an offline switch.
pub struct FakeUpstream {
    routes: Mutex<HashMap<String, (StatusCode, Vec<u8>)>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeUpstream {
    /// An online upstream serving every default static asset.
    pub fn new() -> Arc<Self> {
        let upstream = Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        };
        for path in static_assets() {
            upstream.route(&path, StatusCode::OK, format!("asset {}", path));
        }
        Arc::new(upstream)
    }

    pub fn route(&self, path: &str, status: StatusCode, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .insert(path.to_string(), (status, body.into()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of fetches issued for `path_and_query`, offline ones included.
    pub fn calls_to(&self, path_and_query: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| *call == path_and_query)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Fetcher for FakeUpstream {
    async fn fetch(&self, request: &ProxiedRequest) -> Result<ResponseSnapshot> {
        self.calls.lock().push(request.path_and_query.clone());

        if !self.online.load(Ordering::SeqCst) {
            return Err(ProxyError::UpstreamUnavailable(format!(
                "{} {}: connection refused",
                request.method, request.path_and_query
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let routes = self.routes.lock();
        Ok(match routes.get(&request.path_and_query) {
            Some((status, body)) => ResponseSnapshot::new(*status, headers, body.clone()),
            None => ResponseSnapshot::new(StatusCode::NOT_FOUND, headers, "not found"),
        })
    }
}

pub fn static_assets() -> Vec<String> {
    CacheSettings::default().static_assets
}

pub fn settings(version: &str) -> WorkerSettings {
    WorkerSettings {
        version: version.to_string(),
        static_assets: static_assets(),
        routing: RoutingConfig::default(),
        sync_tag: "sync-notes".to_string(),
        skip_waiting: true,
    }
}

/// In-memory storage whose store deletions can be held open, to observe
/// requests that arrive while an activation is purging old versions.
pub struct GatedStorage {
    inner: MemoryStorage,
    hold_deletes: AtomicBool,
    delete_started: Notify,
    release: Notify,
}

impl GatedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            hold_deletes: AtomicBool::new(false),
            delete_started: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Make the next `delete` wait for `release_deletes`.
    pub fn hold_deletes(&self) {
        self.hold_deletes.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held `delete` has started.
    pub async fn delete_started(&self) {
        self.delete_started.notified().await;
    }

    pub fn release_deletes(&self) {
        self.hold_deletes.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait]
impl CacheStorage for GatedStorage {
    async fn open(&self, name: &str) -> Result<bool> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if self.hold_deletes.load(Ordering::SeqCst) {
            self.delete_started.notify_one();
            self.release.notified().await;
        }
        self.inner.delete(name).await
    }

    async fn match_key(&self, name: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        self.inner.match_key(name, key).await
    }

    async fn put(&self, name: &str, key: RequestKey, response: ResponseSnapshot) -> Result<()> {
        self.inner.put(name, key, response).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, ResponseSnapshot)>) -> Result<()> {
        self.inner.put_all(name, entries).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>> {
        self.inner.entries(name).await
    }
}

/// A registration over the given storage and a fake upstream.
pub struct Harness {
    pub storage: Arc<dyn CacheStorage>,
    pub upstream: Arc<FakeUpstream>,
    pub registration: Arc<Registration>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
        let upstream = FakeUpstream::new();
        let writes = WriteBehind::spawn(storage.clone(), 64);
        let registration = Arc::new(Registration::new(
            storage.clone(),
            upstream.clone(),
            writes,
            RoutingConfig::default(),
        ));
        Self {
            storage,
            upstream,
            registration,
        }
    }

    /// Install and activate `version`.
    pub async fn install(&self, version: &str) {
        self.registration
            .update(settings(version))
            .await
            .expect("install should succeed");
    }

    pub async fn get(&self, path: &str) -> Result<lazarus_sw::worker::FetchOutcome> {
        self.registration.handle_fetch(ProxiedRequest::get(path)).await
    }

    pub async fn store_names(&self) -> Vec<String> {
        self.storage.keys().await.unwrap()
    }

    pub async fn flush(&self) {
        self.registration.write_behind().flush().await;
    }
}
