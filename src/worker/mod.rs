//! The offline cache worker.
//!
//! A [`ServiceWorker`] is one version of the worker: a version tag, the asset
//! list it installs and the routing rules it applies. It reacts to four
//! lifecycle signals through a single dispatch table:
//!
//! - `Install`: cache the static assets into the store named by the version.
//! - `Activate`: purge every store of other versions.
//! - `Fetch`: route an intercepted request through a caching strategy.
//! - `Sync`: background-sync hook for offline note edits.
//!
//! A [`Registration`] owns the installing/waiting/active slots and decides
//! which worker controls requests.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod lifecycle;
mod router;
mod sync;
mod write_behind;

pub use lifecycle::{AssetDiff, Registration, RegistrationStatus, WorkerInfo, WorkerState};
pub use router::{classify, FetchOutcome, RequestClass, ResponseSource};
pub use sync::SyncOutcome;
pub use write_behind::{WriteBehind, WriteStats};

use crate::cache::CacheStorage;
use crate::config::{AppConfig, RoutingConfig};
use crate::error::{ProxyError, Result};
use crate::upstream::{Fetcher, ProxiedRequest};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything that distinguishes one worker version from another.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Version tag; also the name of this worker's cache store.
    pub version: String,
    pub static_assets: Vec<String>,
    pub routing: RoutingConfig,
    pub sync_tag: String,
    pub skip_waiting: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            version: config.cache.version.trim().to_string(),
            static_assets: config.cache.static_assets.clone(),
            routing: config.routing.clone(),
            sync_tag: config.sync.tag.clone(),
            skip_waiting: config.lifecycle.skip_waiting,
        }
    }
}

/// Lifecycle signals a worker reacts to.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(ProxiedRequest),
    Sync { tag: String },
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Sync { .. } => "sync",
        }
    }
}

/// What a handled event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed { assets: usize },
    Activated { purged: Vec<String> },
    Response(FetchOutcome),
    Sync(SyncOutcome),
}

/// Collects the asynchronous work spawned while handling an event so the
/// event is only considered finished once all of it has completed.
pub struct ExtendableEvent<'a, T = ()> {
    pending: Vec<BoxFuture<'a, Result<T>>>,
}

impl<'a, T: Send + 'a> ExtendableEvent<'a, T> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Extend the event until `work` completes.
    pub fn wait_until(&mut self, work: impl Future<Output = Result<T>> + Send + 'a) {
        self.pending.push(work.boxed());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every piece of extended work. Fails with the first error.
    pub async fn settle(self) -> Result<Vec<T>> {
        try_join_all(self.pending).await
    }
}

impl<'a, T: Send + 'a> Default for ExtendableEvent<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One version of the offline cache worker.
pub struct ServiceWorker {
    id: uuid::Uuid,
    settings: WorkerSettings,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    writes: WriteBehind,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
}

impl ServiceWorker {
    pub fn new(
        settings: WorkerSettings,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        writes: WriteBehind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            settings,
            storage,
            fetcher,
            writes,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.settings.version
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    /// Ask to be activated as soon as installation completes.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id.to_string(),
            version: self.settings.version.clone(),
            state: self.state(),
        }
    }

    /// Route a lifecycle signal to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => self
                .on_install()
                .await
                .map(|assets| EventOutcome::Installed { assets }),
            WorkerEvent::Activate => self
                .on_activate()
                .await
                .map(|purged| EventOutcome::Activated { purged }),
            WorkerEvent::Fetch(request) => {
                if !self.state().can_handle_fetch() {
                    return Err(ProxyError::NoController);
                }
                self.on_fetch(request).await.map(EventOutcome::Response)
            }
            WorkerEvent::Sync { tag } => self.on_sync(&tag).await.map(EventOutcome::Sync),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settle_waits_for_all_work() {
        let mut event: ExtendableEvent<'_, u32> = ExtendableEvent::new();
        event.wait_until(async { Ok(1) });
        event.wait_until(async {
            tokio::task::yield_now().await;
            Ok(2)
        });
        assert_eq!(event.len(), 2);
        assert_eq!(event.settle().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_settle_fails_with_first_error() {
        let mut event: ExtendableEvent<'_> = ExtendableEvent::new();
        event.wait_until(async { Ok(()) });
        event.wait_until(async { Err(ProxyError::Storage("quota exceeded".to_string())) });
        assert!(event.settle().await.is_err());
    }

    #[test]
    fn test_empty_event_settles_immediately() {
        let event: ExtendableEvent<'_> = ExtendableEvent::default();
        assert!(event.is_empty());
        assert!(tokio_test::block_on(event.settle()).unwrap().is_empty());
    }
}
