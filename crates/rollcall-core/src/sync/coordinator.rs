//! At most one in-flight refresh per cache key.
//!
//! A refresh runs as its own task so that a caller giving up on its await
//! does not abort the work other callers are sharing. Cancellation is
//! explicit, through the coordinator's root token.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey};
use crate::error::SyncError;

/// A refresh that any number of callers can await. Every awaiter receives
/// the same outcome.
pub type InFlight = Shared<BoxFuture<'static, Result<CacheEntry, SyncError>>>;

type Slots = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Removes a key's slot when its refresh task ends, however it ends.
struct SlotGuard {
    slots: Slots,
    key: CacheKey,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.key);
    }
}

pub struct FetchCoordinator {
    in_flight: Slots,
    root: CancellationToken,
}

impl FetchCoordinator {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            root,
        }
    }

    /// Join the refresh already running for `key`, or start one with `fetcher`.
    ///
    /// `fetcher` receives a token that fires when the coordinator is
    /// cancelled. Must be called within a Tokio runtime.
    pub fn load<F, Fut>(&self, key: &CacheKey, fetcher: F) -> InFlight
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<CacheEntry, SyncError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            debug!(key = %key, "Joining in-flight refresh");
            return existing.clone();
        }

        if self.root.is_cancelled() {
            return future::ready(Err(SyncError::Cancelled)).boxed().shared();
        }

        debug!(key = %key, "Starting refresh");
        let token = self.root.child_token();
        let work = fetcher(token);
        let guard = SlotGuard {
            slots: Arc::clone(&self.in_flight),
            key: key.clone(),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });

        let task_key = key.clone();
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(key = %task_key, error = %e, "Refresh task failed");
                    Err(SyncError::TaskFailed(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), shared.clone());
        shared
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel every running refresh and refuse new ones.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Credential;
    use crate::models::Snapshot;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn key(scope: &str) -> CacheKey {
        CacheKey::new(scope, &Credential::new("secret-token"), 8)
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let coordinator = FetchCoordinator::new(CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut waiters = Vec::new();
        for _ in 0..5 {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            waiters.push(coordinator.load(&key("s1"), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
            }));
        }
        assert_eq!(coordinator.in_flight_count(), 1);

        tokio::task::yield_now().await;
        gate.notify_one();

        let results = futures::future::join_all(waiters).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), first);
        }
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let coordinator = FetchCoordinator::new(CancellationToken::new());
        let a = coordinator.load(&key("a"), |_| async {
            Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
        });
        let b = coordinator.load(&key("b"), |_| async {
            Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
        });
        assert_eq!(coordinator.in_flight_count(), 2);
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_slot_is_released() {
        let coordinator = FetchCoordinator::new(CancellationToken::new());
        let first = coordinator.load(&key("s1"), |_| async {
            Err::<CacheEntry, _>(SyncError::TaskFailed("boom".into()))
        });
        let second = coordinator.load(&key("s1"), |_| async {
            Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
        });

        assert!(matches!(first.await, Err(SyncError::TaskFailed(_))));
        assert!(matches!(second.await, Err(SyncError::TaskFailed(_))));
        assert!(!coordinator.is_in_flight(&key("s1")));

        let retry = coordinator.load(&key("s1"), |_| async {
            Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
        });
        assert!(retry.await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_an_awaiter_does_not_cancel_the_fetch() {
        let coordinator = FetchCoordinator::new(CancellationToken::new());
        let gate = Arc::new(Notify::new());

        let dropped = {
            let gate = Arc::clone(&gate);
            coordinator.load(&key("s1"), move |_| async move {
                gate.notified().await;
                Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
            })
        };
        let kept = coordinator.load(&key("s1"), |_| async { Err::<CacheEntry, _>(SyncError::Cancelled) });
        drop(dropped);

        gate.notify_one();
        assert!(kept.await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_running_fetches() {
        let coordinator = FetchCoordinator::new(CancellationToken::new());
        let pending = coordinator.load(&key("s1"), |token| async move {
            token.cancelled().await;
            Err::<CacheEntry, _>(SyncError::Cancelled)
        });

        coordinator.cancel_all();
        assert!(matches!(pending.await, Err(SyncError::Cancelled)));

        let refused = coordinator.load(&key("s2"), |_| async {
            Ok(CacheEntry::new(Snapshot::default(), Utc::now()))
        });
        assert!(matches!(refused.await, Err(SyncError::Cancelled)));
    }
}
