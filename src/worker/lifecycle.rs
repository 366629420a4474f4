// Worker lifecycle: install, activate and the registration that owns them
// Author: kelexine (https://github.com/kelexine)

use super::{
    classify, EventOutcome, ExtendableEvent, FetchOutcome, ResponseSource, ServiceWorker,
    SyncOutcome, WorkerEvent, WorkerSettings, WriteBehind,
};
use crate::cache::{Cache, CacheStorage};
use crate::config::RoutingConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::upstream::{Fetcher, ProxiedRequest};
use crate::utils::retry;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    /// Fetches are only routed to a worker once it has taken over.
    pub fn can_handle_fetch(self) -> bool {
        matches!(self, WorkerState::Activating | WorkerState::Activated)
    }
}

/// Difference between two asset lists.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssetDiff {
    /// In the new list only.
    pub added: Vec<String>,
    /// In the installed list only.
    pub removed: Vec<String>,
}

impl AssetDiff {
    pub fn between(installed: &[String], configured: &[String]) -> Self {
        let installed: BTreeSet<&str> = installed.iter().map(String::as_str).collect();
        let configured: BTreeSet<&str> = configured.iter().map(String::as_str).collect();

        Self {
            added: configured.difference(&installed).map(|s| s.to_string()).collect(),
            removed: installed.difference(&configured).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl ServiceWorker {
    /// Open this version's store and cache every static asset atomically.
    ///
    /// A store created by a failed install is deleted again so no half-made
    /// version is left behind.
    pub(crate) async fn on_install(&self) -> Result<usize> {
        let version = self.settings.version.clone();
        let mut event: ExtendableEvent<'_, usize> = ExtendableEvent::new();

        event.wait_until(async {
            let (cache, created) = Cache::open(self.storage.clone(), &version).await?;
            info!("Caching {} static assets into {}", self.settings.static_assets.len(), version);

            match cache
                .add_all(self.fetcher.as_ref(), &self.settings.static_assets)
                .await
            {
                Ok(count) => Ok(count),
                Err(e) => {
                    if created {
                        if let Err(cleanup) = self.storage.delete(&version).await {
                            warn!("Failed to remove store {} after failed install: {}", version, cleanup);
                        }
                    }
                    Err(e)
                }
            }
        });

        // Signalled as soon as caching starts, not after it finishes
        if self.settings.skip_waiting {
            self.skip_waiting();
        }

        let counts = event.settle().await.map_err(|e| ProxyError::InstallFailed {
            version: version.clone(),
            reason: e.to_string(),
        })?;
        Ok(counts.into_iter().sum())
    }

    /// Delete every cache store whose name is not this worker's version.
    pub(crate) async fn on_activate(&self) -> Result<Vec<String>> {
        let version = self.settings.version.clone();
        let activation_error = |e: ProxyError| ProxyError::ActivationFailed {
            version: version.clone(),
            reason: e.to_string(),
        };

        let names = self.storage.keys().await.map_err(activation_error)?;
        let mut event: ExtendableEvent<'_, String> = ExtendableEvent::new();

        for name in names.into_iter().filter(|name| *name != version) {
            let storage = self.storage.clone();
            event.wait_until(async move {
                storage.delete(&name).await?;
                info!("Deleted stale cache store {}", name);
                Ok(name)
            });
        }

        let purged = event.settle().await.map_err(activation_error)?;

        if let Ok(remaining) = self.storage.keys().await {
            metrics::update_cache_stores(remaining.len());
        }
        Ok(purged)
    }

    /// Compare this worker's asset list with the one installed into `store`.
    /// `None` when the store does not exist or holds no install manifest.
    pub async fn diff_assets(&self, store: &str) -> Result<Option<AssetDiff>> {
        if !self.storage.has(store).await? {
            return Ok(None);
        }
        let (cache, _) = Cache::open(self.storage.clone(), store).await?;
        Ok(cache
            .installed_assets()
            .await?
            .map(|installed| AssetDiff::between(&installed, &self.settings.static_assets)))
    }
}

/// Serializable view of a worker for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub version: String,
    pub state: WorkerState,
}

/// Serializable view of the registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub installing: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    pub active: Option<WorkerInfo>,
    pub controller: Option<String>,
    pub pending_writes: usize,
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
    controller: Option<Arc<ServiceWorker>>,
}

/// Owns the worker versions for one scope and routes events to them.
pub struct Registration {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    writes: WriteBehind,
    /// Classifies requests that arrive while no worker is in control.
    routing: RoutingConfig,
    slots: RwLock<Slots>,
}

impl Registration {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        writes: WriteBehind,
        routing: RoutingConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            writes,
            routing,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Build a worker that shares this registration's storage, fetcher and
    /// write-behind queue.
    pub fn new_worker(&self, settings: WorkerSettings) -> Arc<ServiceWorker> {
        Arc::new(ServiceWorker::new(
            settings,
            self.storage.clone(),
            self.fetcher.clone(),
            self.writes.clone(),
        ))
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn write_behind(&self) -> &WriteBehind {
        &self.writes
    }

    pub fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().active.clone()
    }

    pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().waiting.clone()
    }

    pub fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.slots.read().controller.clone()
    }

    /// Take over the store left by a previous run so it keeps serving while
    /// a new version installs. The most recently created store that holds a
    /// committed install wins; stores left by an interrupted install are
    /// skipped.
    ///
    /// `settings` supplies routing rules; its version is replaced by the
    /// adopted store's name. Returns the adopted version, if any.
    pub async fn resume_existing(&self, settings: &WorkerSettings) -> Result<Option<String>> {
        if self.active().is_some() {
            return Ok(None);
        }
        let Some(previous) = self.last_installed_store().await? else {
            debug!("No previous cache store to resume");
            return Ok(None);
        };

        let worker = self.new_worker(WorkerSettings {
            version: previous.clone(),
            ..settings.clone()
        });
        worker.set_state(WorkerState::Activated);

        let mut slots = self.slots.write();
        slots.active = Some(worker.clone());
        slots.controller = Some(worker);
        info!("Resumed cache store {} from a previous run", previous);
        Ok(Some(previous))
    }

    /// Newest store whose install committed its asset manifest.
    async fn last_installed_store(&self) -> Result<Option<String>> {
        for name in self.storage.keys().await?.into_iter().rev() {
            let (cache, _) = Cache::open(self.storage.clone(), &name).await?;
            match cache.installed_assets().await {
                Ok(Some(_)) => return Ok(Some(name)),
                Ok(None) => debug!("Skipping cache store {} with no completed install", name),
                Err(e) => warn!("Skipping unreadable cache store {}: {}", name, e),
            }
        }
        Ok(None)
    }

    /// Register a fresh worker built from `settings`.
    pub async fn update(&self, settings: WorkerSettings) -> Result<()> {
        let worker = self.new_worker(settings);
        self.register(worker).await
    }

    /// Keep re-registering `settings` in the background with exponential
    /// backoff until an install succeeds or the schedule runs out.
    pub fn spawn_install_retry(self: &Arc<Self>, settings: WorkerSettings) -> JoinHandle<()> {
        let registration = self.clone();
        tokio::spawn(async move {
            let version = settings.version.clone();
            let result = retry::with_backoff(
                "Install",
                retry::create_backoff(),
                |e: &ProxyError| matches!(e, ProxyError::InstallFailed { .. }),
                || registration.update(settings.clone()),
            )
            .await;

            match result {
                Ok(()) => info!("Install of {} succeeded on retry", version),
                Err(e) => error!("Giving up on installing {}: {}", version, e),
            }
        })
    }

    /// Install `worker` and, when allowed, activate it.
    ///
    /// On install failure the worker becomes redundant and whatever was
    /// active keeps control.
    pub async fn register(&self, worker: Arc<ServiceWorker>) -> Result<()> {
        self.log_asset_changes(&worker).await;

        worker.set_state(WorkerState::Installing);
        self.slots.write().installing = Some(worker.clone());

        let installed = worker.dispatch(WorkerEvent::Install).await;
        self.slots.write().installing = None;

        match installed {
            Ok(EventOutcome::Installed { assets }) => {
                worker.set_state(WorkerState::Installed);
                metrics::record_lifecycle("install", "ok");
                info!("Installed {} ({} assets cached)", worker.version(), assets);
            }
            Ok(other) => {
                worker.set_state(WorkerState::Redundant);
                return Err(ProxyError::Internal(format!(
                    "install produced unexpected outcome {:?}",
                    other
                )));
            }
            Err(e) => {
                worker.set_state(WorkerState::Redundant);
                metrics::record_lifecycle("install", "failed");
                match self.active() {
                    Some(active) => error!("{}; {} stays in control", e, active.version()),
                    None => error!("{}; no version is in control", e),
                }
                return Err(e);
            }
        }

        let promote = {
            let mut slots = self.slots.write();
            if slots.active.is_none() || worker.skip_waiting_requested() {
                true
            } else {
                if let Some(previous) = slots.waiting.replace(worker.clone()) {
                    previous.set_state(WorkerState::Redundant);
                }
                false
            }
        };

        if promote {
            self.activate(worker).await;
        } else {
            info!("{} is waiting to activate", worker.version());
        }
        Ok(())
    }

    /// Report how the new worker's asset list differs from what is installed.
    /// The same tag with a different list means stale entries will survive,
    /// since only a version change purges a store.
    async fn log_asset_changes(&self, worker: &ServiceWorker) {
        match worker.diff_assets(worker.version()).await {
            Ok(Some(diff)) if !diff.is_empty() => warn!(
                "Asset list changed without a version bump for {} (added: {:?}, removed: {:?}); bump cache.version to purge stale entries",
                worker.version(),
                diff.added,
                diff.removed
            ),
            Ok(_) => {}
            Err(e) => debug!("Could not diff assets for {}: {}", worker.version(), e),
        }

        let Some(active) = self.active() else {
            return;
        };
        if active.version() == worker.version() {
            return;
        }
        if let Ok(Some(diff)) = worker.diff_assets(active.version()).await {
            info!(
                "Upgrading {} -> {}: {} assets added, {} removed",
                active.version(),
                worker.version(),
                diff.added.len(),
                diff.removed.len()
            );
        }
    }

    /// Promote the waiting worker, if any. Returns whether one was activated.
    pub async fn skip_waiting(&self) -> bool {
        let waiting = self.slots.write().waiting.take();
        match waiting {
            Some(worker) => {
                worker.skip_waiting();
                self.activate(worker).await;
                true
            }
            None => false,
        }
    }

    /// Make `worker` the active version, purge other stores and claim
    /// control. An activation error is logged and counted; the worker still
    /// takes over, as the purge can be retried by the next activation.
    ///
    /// The previous version keeps handling fetches until the claim.
    async fn activate(&self, worker: Arc<ServiceWorker>) {
        let previous_active = {
            let mut slots = self.slots.write();
            if slots
                .waiting
                .as_ref()
                .is_some_and(|waiting| Arc::ptr_eq(waiting, &worker))
            {
                slots.waiting = None;
            }
            slots.active.replace(worker.clone())
        };
        worker.set_state(WorkerState::Activating);

        match worker.dispatch(WorkerEvent::Activate).await {
            Ok(EventOutcome::Activated { purged }) => {
                metrics::record_lifecycle("activate", "ok");
                info!("Activated {} (purged {} stale stores)", worker.version(), purged.len());
            }
            Ok(other) => warn!("activate produced unexpected outcome {:?}", other),
            Err(e) => {
                metrics::record_lifecycle("activate", "failed");
                error!("{}", e);
            }
        }
        worker.set_state(WorkerState::Activated);

        self.claim(worker, previous_active);
    }

    /// Route all subsequent fetches to `worker` without waiting for a reload,
    /// then retire the versions it replaced.
    fn claim(&self, worker: Arc<ServiceWorker>, previous_active: Option<Arc<ServiceWorker>>) {
        let previous = self.slots.write().controller.replace(worker.clone());

        match &previous {
            Some(previous) if !Arc::ptr_eq(previous, &worker) => {
                info!("Clients claimed by {} (was {})", worker.version(), previous.version())
            }
            Some(_) => {}
            None => info!("Clients claimed by {}", worker.version()),
        }

        for replaced in previous.iter().chain(previous_active.iter()) {
            if !Arc::ptr_eq(replaced, &worker) {
                replaced.set_state(WorkerState::Redundant);
            }
        }
    }

    /// Hand an intercepted request to the controlling worker. Without one
    /// the request goes straight to the network, uncached.
    pub async fn handle_fetch(&self, request: ProxiedRequest) -> Result<FetchOutcome> {
        let Some(controller) = self.controller() else {
            let class = classify(request.path(), &self.routing);
            let response = self.fetcher.fetch(&request).await?;
            return Ok(FetchOutcome {
                class,
                source: ResponseSource::Network,
                response,
            });
        };
        match controller.dispatch(WorkerEvent::Fetch(request)).await? {
            EventOutcome::Response(outcome) => Ok(outcome),
            other => Err(ProxyError::Internal(format!(
                "fetch produced unexpected outcome {:?}",
                other
            ))),
        }
    }

    /// Deliver a background-sync signal to the active worker.
    pub async fn handle_sync(&self, tag: &str) -> Result<SyncOutcome> {
        let active = self.active().ok_or(ProxyError::NoController)?;
        match active
            .dispatch(WorkerEvent::Sync {
                tag: tag.to_string(),
            })
            .await?
        {
            EventOutcome::Sync(outcome) => Ok(outcome),
            other => Err(ProxyError::Internal(format!(
                "sync produced unexpected outcome {:?}",
                other
            ))),
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        let slots = self.slots.read();
        RegistrationStatus {
            installing: slots.installing.as_ref().map(|w| w.info()),
            waiting: slots.waiting.as_ref().map(|w| w.info()),
            active: slots.active.as_ref().map(|w| w.info()),
            controller: slots.controller.as_ref().map(|w| w.version().to_string()),
            pending_writes: self.writes.pending(),
        }
    }
}
