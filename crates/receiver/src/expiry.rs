//! Background eviction of stale transfers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chunkferry_store::{PieceStore, StoreError};

use crate::{BlobStore, ReceiverError};

/// Schedules one deferred staleness check per transfer.
///
/// Every piece write re-schedules the transfer's check, superseding the
/// previous pending one. The check races with concurrent piece arrival by
/// design: a piece landing just as expiry fires simply restarts
/// accumulation.
#[derive(Clone)]
pub struct ExpiryMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    store: Arc<dyn PieceStore>,
    blob: Arc<dyn BlobStore>,
    generation: AtomicU64,
    tasks: Mutex<HashMap<String, ScheduledCheck>>,
}

struct ScheduledCheck {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ExpiryMonitor {
    pub fn new(store: Arc<dyn PieceStore>, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                store,
                blob,
                generation: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedules a staleness check for `id` after `delay`, replacing any
    /// check already pending for the same transfer.
    pub fn schedule(&self, id: &str, delay: Duration) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_id = id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = inner.check(&task_id).await {
                warn!(upload_id = %task_id, error = %e, "expiry check failed");
            }
            let mut tasks = inner.tasks.lock().unwrap();
            if tasks.get(&task_id).is_some_and(|c| c.generation == generation) {
                tasks.remove(&task_id);
            }
        });

        let mut tasks = self.inner.tasks.lock().unwrap();
        if let Some(previous) = tasks.insert(id.to_string(), ScheduledCheck { generation, handle })
        {
            previous.handle.abort();
        }
    }

    /// Drops the pending check for `id`, if any.
    pub fn cancel(&self, id: &str) {
        if let Some(check) = self.inner.tasks.lock().unwrap().remove(id) {
            check.handle.abort();
        }
    }

    /// Runs the staleness check immediately. Returns whether the transfer
    /// was evicted.
    pub async fn check_now(&self, id: &str) -> Result<bool, ReceiverError> {
        self.inner.check(id).await
    }
}

impl MonitorInner {
    async fn check(&self, id: &str) -> Result<bool, ReceiverError> {
        if self.store.get_num_pieces(id).await? == 0 {
            return Ok(false);
        }
        let Some(update_time) = found(self.store.get_update_time(id).await)? else {
            return Ok(false);
        };
        let Some(expiry) = found(self.store.get_chunk_expiry(id).await)? else {
            return Ok(false);
        };

        let age = (Utc::now() - update_time).to_std().unwrap_or_default();
        if age < expiry {
            return Ok(false);
        }

        let Some(pieces) = found(self.store.get_all_pieces(id).await)? else {
            return Ok(false);
        };
        for record in pieces.values() {
            if let Err(e) = self.blob.delete(&record.location).await {
                // The metadata is going away regardless; orphaned bytes are
                // a cleanup concern, not a correctness one.
                warn!(location = %record.location, error = %e, "failed to delete expired piece");
            }
        }
        self.store.expire_transfer(id).await?;
        info!(upload_id = %id, pieces = pieces.len(), "stale transfer expired");
        Ok(true)
    }
}

/// Collapses `NotFound` into `None`: a transfer vanishing mid-check means
/// someone else already cleaned it up.
fn found<T>(result: Result<T, StoreError>) -> Result<Option<T>, ReceiverError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
