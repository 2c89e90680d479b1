use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{CacheEntry, CacheKey, DurableStore};

/// Two-tier snapshot cache.
///
/// The memory tier is authoritative within a process; the durable tier lets a
/// restarted process (or another context) start from the last known snapshot.
/// `set` is the only write path for entries.
pub struct CacheStore {
    namespace: String,
    memory: RwLock<HashMap<CacheKey, CacheEntry>>,
    durable: Option<Arc<dyn DurableStore>>,
    /// Durable entries older than this are ignored instead of promoted.
    max_durable_age: Duration,
    degraded: AtomicBool,
}

impl CacheStore {
    pub fn new(
        namespace: impl Into<String>,
        durable: Option<Arc<dyn DurableStore>>,
        max_durable_age: Duration,
    ) -> Self {
        let degraded = durable.is_none();
        Self {
            namespace: namespace.into(),
            memory: RwLock::new(HashMap::new()),
            durable,
            max_durable_age,
            degraded: AtomicBool::new(degraded),
        }
    }

    /// The durable tier, unless the store is running memory-only.
    pub fn durable(&self) -> Option<&Arc<dyn DurableStore>> {
        if self.is_degraded() {
            None
        } else {
            self.durable.as_ref()
        }
    }

    /// True once the durable tier has failed a write (or was never configured).
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn mark_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(reason, "Durable cache tier unavailable, continuing memory-only");
        }
    }

    /// Look up an entry, promoting durable hits into memory.
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.read().get(key) {
            return Some(entry.clone());
        }

        let entry = self.load_durable(key)?;
        if now - entry.fetched_at >= self.max_durable_age {
            debug!(key = %key, fetched_at = %entry.fetched_at, "Ignoring durable entry past max age");
            return None;
        }

        debug!(key = %key, "Promoting durable entry into memory");
        let mut memory = self.memory.write();
        // A concurrent set may have landed while we were reading disk
        let entry = memory.entry(key.clone()).or_insert(entry);
        Some(entry.clone())
    }

    fn load_durable(&self, key: &CacheKey) -> Option<CacheEntry> {
        let durable = self.durable()?;
        let raw = match durable.get(&key.storage_key(&self.namespace)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to read durable entry");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable durable entry");
                None
            }
        }
    }

    /// Write an entry to both tiers and return what was stored.
    ///
    /// `fetched_at` never moves backwards for a key; an older stamp is raised
    /// to the current one. Durable failures switch the store to memory-only.
    pub fn set(&self, key: &CacheKey, mut entry: CacheEntry) -> CacheEntry {
        {
            let mut memory = self.memory.write();
            if let Some(prev) = memory.get(key) {
                if entry.fetched_at < prev.fetched_at {
                    entry.fetched_at = prev.fetched_at;
                }
            }
            memory.insert(key.clone(), entry.clone());
        }

        if let Some(durable) = self.durable() {
            match serde_json::to_string(&entry) {
                Ok(raw) => {
                    if let Err(e) = durable.set(&key.storage_key(&self.namespace), &raw) {
                        self.mark_degraded(&e.to_string());
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to serialize cache entry"),
            }
        }

        entry
    }

    /// Remove every entry from both tiers. Never fails; durable errors are logged.
    pub fn clear(&self) {
        let count = {
            let mut memory = self.memory.write();
            let count = memory.len();
            memory.clear();
            count
        };

        if let Some(durable) = self.durable() {
            let prefix = format!("{}:", self.namespace);
            match durable.keys() {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
                        if let Err(e) = durable.remove(key) {
                            warn!(key = %key, error = %e, "Failed to remove durable entry");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to list durable entries for clearing"),
            }
        }

        info!(entries = count, "Cache cleared");
    }

    /// Keys currently held in the memory tier.
    pub fn memory_keys(&self) -> Vec<CacheKey> {
        self.memory.read().keys().cloned().collect()
    }
}
