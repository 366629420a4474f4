// Background sync hook for offline note edits
// Author: kelexine (https://github.com/kelexine)

use super::{ExtendableEvent, ServiceWorker};
use crate::error::Result;
use crate::metrics;
use tracing::{debug, info};

/// What a sync signal led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// The tag is not one this worker handles.
    Ignored,
}

impl ServiceWorker {
    pub(crate) async fn on_sync(&self, tag: &str) -> Result<SyncOutcome> {
        if tag != self.settings.sync_tag {
            debug!("Ignoring sync signal with tag {}", tag);
            metrics::record_lifecycle("sync", "ignored");
            return Ok(SyncOutcome::Ignored);
        }

        let mut event: ExtendableEvent<'_> = ExtendableEvent::new();
        event.wait_until(sync_notes());
        event.settle().await?;

        metrics::record_lifecycle("sync", "ok");
        Ok(SyncOutcome::Synced)
    }
}

/// Hook for replaying note edits queued while offline. Only logs for now.
// TODO: push queued edits to /api/notes once the page starts recording them
async fn sync_notes() -> Result<()> {
    info!("Syncing notes...");
    Ok(())
}
