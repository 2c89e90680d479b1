//! Durable key-value tier and its change feed.
//!
//! The change feed is what lets separate execution contexts (processes,
//! windows) notice each other's writes. Implementations:
//! - `MemoryStore`: a shared in-process backend, for embedding and tests
//! - `FileStore`: one file per key, with a polling watcher as the feed

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::StoreError;

/// Buffer size for change feeds.
/// Receivers that fall further behind than this see a lag error and skip ahead.
pub const CHANGE_FEED_CAPACITY: usize = 256;

/// A value change observed on the durable store. `value` is `None` on removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub value: Option<String>,
}

/// Synchronous key-value store that survives restarts.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Subscribe to changes made by other contexts. `None` if the store has
    /// no cross-context channel.
    fn change_feed(&self) -> Option<broadcast::Receiver<StoreChange>>;
}

/// In-process durable store. Clones share one backend and one feed, so two
/// clones behave like two contexts over the same storage.
///
/// The feed also carries the writer's own changes; consumers identify their
/// own writes from the payload.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<MemoryShared>,
}

struct MemoryShared {
    values: RwLock<BTreeMap<String, String>>,
    changes: broadcast::Sender<StoreChange>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            shared: Arc::new(MemoryShared {
                values: RwLock::new(BTreeMap::new()),
                changes,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Make every operation fail, like storage that is disabled or over quota.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.shared.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.values.read().is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("storage quota exceeded".to_string()))
        } else {
            Ok(())
        }
    }

    fn publish(&self, key: &str, value: Option<String>) {
        let change = StoreChange {
            key: key.to_string(),
            value,
        };
        if self.shared.changes.send(change).is_err() {
            trace!(key, "no change feed subscribers");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.shared.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.shared
            .values
            .write()
            .insert(key.to_string(), value.to_string());
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        let removed = self.shared.values.write().remove(key).is_some();
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.shared.values.read().keys().cloned().collect())
    }

    fn change_feed(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.shared.changes.subscribe())
    }
}
