//! Optimistic local writes and their reconciliation.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::SyncEngine;
use crate::cache::{CacheEntry, Credential};
use crate::error::SyncError;
use crate::models::SnapshotPatch;

/// Called with the server's snapshot once a reconciliation refresh succeeds.
pub type ReconcileCallback = Box<dyn FnOnce(&CacheEntry) + Send + 'static>;

/// Replace every partition present in `patch` and restamp.
pub fn apply_patch(base: CacheEntry, patch: SnapshotPatch, now: DateTime<Utc>) -> CacheEntry {
    let mut snapshot = base.snapshot;
    snapshot.merge(patch);
    CacheEntry::new(snapshot, now)
}

/// The outcome of an optimistic update.
///
/// The optimistic entry is already stored and announced when this is
/// returned. Awaiting `wait` is the only way to observe a failed
/// reconciliation; otherwise it is logged and the optimistic entry stays.
#[must_use = "call wait() or detach()"]
pub struct ReconcileHandle {
    optimistic: CacheEntry,
    task: JoinHandle<Result<CacheEntry, SyncError>>,
}

impl ReconcileHandle {
    pub fn optimistic(&self) -> &CacheEntry {
        &self.optimistic
    }

    /// Wait for the server's snapshot to replace the optimistic one.
    pub async fn wait(self) -> Result<CacheEntry, SyncError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SyncError::Cancelled),
            Err(e) => Err(SyncError::TaskFailed(e.to_string())),
        }
    }

    /// Let reconciliation finish in the background.
    pub fn detach(self) {}
}

impl SyncEngine {
    /// Merge `patch` into the cached snapshot immediately, then reconcile
    /// with the server in the background.
    ///
    /// Announces the optimistic entry in-process and to other contexts.
    /// When the reconciliation refresh lands it replaces the optimistic
    /// entry wholesale, is announced again and is passed to `on_reconciled`.
    /// Must be called within a Tokio runtime.
    pub fn update_cache(
        &self,
        scope: &str,
        credential: &Credential,
        patch: SnapshotPatch,
        on_reconciled: Option<ReconcileCallback>,
    ) -> ReconcileHandle {
        let inner = &self.inner;
        let key = self.key_for(scope, credential);
        let hint = patch.hint();
        let now = Utc::now();

        let base = inner.store.get(&key, now).unwrap_or_else(CacheEntry::empty);
        let optimistic = inner.store.set(&key, apply_patch(base, patch, now));
        debug!(key = %key, partitions = %hint, "Applied optimistic update");
        inner.notifier.emit(&key, &optimistic);
        inner.broadcast(scope, &hint);

        let pending = inner.refresh(key.clone(), credential.clone());
        let task = tokio::spawn(async move {
            let result = pending.await;
            match &result {
                Ok(entry) => {
                    debug!(key = %key, hash = %entry.content_hash, "Optimistic update reconciled");
                    if let Some(callback) = on_reconciled {
                        callback(entry);
                    }
                }
                Err(e) if e.is_cancelled() => debug!(key = %key, "Reconciliation cancelled"),
                Err(e) => warn!(key = %key, error = %e, "Reconciliation failed, keeping optimistic entry"),
            }
            result
        });

        ReconcileHandle { optimistic, task }
    }
}
