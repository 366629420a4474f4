// Write-behind queue for cache stores
// Author: kelexine (https://github.com/kelexine)
//
// Responses are returned to the page before they are stored. Writes go
// through a bounded queue drained by a single task, so they are applied in
// enqueue order and a failed write is logged and counted instead of lost.

use crate::cache::{CacheStorage, RequestKey, ResponseSnapshot};
use crate::metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum Command {
    Put {
        cache: String,
        key: RequestKey,
        response: ResponseSnapshot,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    stored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Counts of write-behind outcomes since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub stored: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle to the background cache writer. Cheap to clone.
#[derive(Clone)]
pub struct WriteBehind {
    tx: mpsc::Sender<Command>,
    pending: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl WriteBehind {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(storage: Arc<dyn CacheStorage>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(Counters::default());

        tokio::spawn(run(storage, rx, pending.clone(), counters.clone()));

        Self {
            tx,
            pending,
            counters,
        }
    }

    /// Queue a write without waiting. Returns `false` when the write was
    /// dropped because the queue is full or the writer has stopped.
    pub fn enqueue(&self, cache: &str, key: RequestKey, response: ResponseSnapshot) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let url = key.url.clone();

        match self.tx.try_send(Command::Put {
            cache: cache.to_string(),
            key,
            response,
        }) {
            Ok(()) => true,
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_write("dropped");
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "writer stopped",
                };
                warn!("Dropped cache write for {} into {}: {}", url, cache, reason);
                false
            }
        }
    }

    /// Wait until every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Writes queued but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WriteStats {
        WriteStats {
            stored: self.counters.stored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run(
    storage: Arc<dyn CacheStorage>,
    mut rx: mpsc::Receiver<Command>,
    pending: Arc<AtomicUsize>,
    counters: Arc<Counters>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Put {
                cache,
                key,
                response,
            } => {
                match storage.put(&cache, key.clone(), response).await {
                    Ok(()) => {
                        counters.stored.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_write("stored");
                        debug!("Stored {} {} in {}", key.method, key.url, cache);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_write("failed");
                        warn!("Cache write for {} into {} failed: {}", key.url, cache, e);
                    }
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Write-behind queue closed");
}
