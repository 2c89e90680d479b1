//! The public sync engine.
//!
//! `SyncEngine` ties the pieces together:
//! - reads go through the `CacheStore` and are classified by a `FreshnessPolicy`
//! - refreshes run through the `FetchCoordinator`, one per key at a time
//! - every stored snapshot is announced on the in-process `Notifier`
//! - local writes are announced to other contexts by the `Invalidator`, whose
//!   signals in turn trigger refreshes here

mod optimistic;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use optimistic::{apply_patch, ReconcileCallback, ReconcileHandle};

use crate::api::{HttpDataService, RemoteDataService};
use crate::cache::{
    freshness::secs, CacheEntry, CacheKey, CacheStore, Credential, DurableStore, FileStore,
    Freshness, FreshnessPolicy,
};
use crate::config::EngineConfig;
use crate::error::{ConfigError, SyncError};
use crate::sync::{
    ContextId, FetchCoordinator, InFlight, InvalidationSignal, Invalidator, Notifier,
    SnapshotLoader, Subscription,
};

/// Cache engine handle. Clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    policy: FreshnessPolicy,
    prefix_len: usize,
    store: CacheStore,
    loader: SnapshotLoader,
    coordinator: FetchCoordinator,
    notifier: Notifier<CacheKey, CacheEntry>,
    invalidator: Option<Invalidator>,
    context: ContextId,
    /// Credentials used per key, so a signal for a scope can refresh every
    /// key this context holds for it.
    known: Mutex<HashMap<CacheKey, Credential>>,
    root: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build an engine over an injected remote service and optional durable tier.
    ///
    /// Without a durable tier the engine runs memory-only, with cross-context
    /// sync disabled.
    pub fn new(
        config: EngineConfig,
        service: Arc<dyn RemoteDataService>,
        durable: Option<Arc<dyn DurableStore>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.freshness()?;
        let context = ContextId::random();
        let root = CancellationToken::new();

        let invalidator = durable
            .as_ref()
            .map(|store| Invalidator::new(Arc::clone(store), &config.namespace, context));
        let store = CacheStore::new(
            config.namespace.clone(),
            durable,
            secs(config.max_durable_age_secs),
        );

        info!(context = %context, namespace = %config.namespace, "Sync engine created");
        Ok(Self {
            inner: Arc::new(EngineInner {
                policy,
                prefix_len: config.credential_prefix_len,
                store,
                loader: SnapshotLoader::new(service, config.page_limit, config.max_pages),
                coordinator: FetchCoordinator::new(root.child_token()),
                notifier: Notifier::new(),
                invalidator,
                context,
                known: Mutex::new(HashMap::new()),
                root,
                listener: Mutex::new(None),
            }),
        })
    }

    /// Build an engine talking HTTP to `config.api_base_url`, persisting to
    /// a `FileStore` under the configured cache directory.
    pub fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        let service = HttpDataService::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let store = FileStore::open(
            config.cache_dir()?,
            Duration::from_millis(config.signal_poll_interval_ms),
        )?;
        Ok(Self::new(config, Arc::new(service), Some(Arc::new(store)))?)
    }

    /// Start listening for invalidation signals from other contexts.
    ///
    /// Idempotent. Must be called within a Tokio runtime.
    pub fn init(&self) {
        let Some(invalidator) = self.inner.invalidator.as_ref() else {
            debug!("No durable tier, skipping invalidation listener");
            return;
        };
        let mut listener = self.inner.listener.lock();
        if listener.is_some() || self.inner.root.is_cancelled() {
            return;
        }

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        *listener = invalidator.listen_all(
            move |signal| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_signal(signal);
                }
            },
            self.inner.root.child_token(),
        );
    }

    /// Cancel every in-flight refresh and stop the listener. The engine
    /// still serves cached entries afterwards but never fetches again.
    pub fn dispose(&self) {
        self.inner.shutdown();
        info!(context = %self.inner.context, "Sync engine disposed");
    }

    pub fn key_for(&self, scope: &str, credential: &Credential) -> CacheKey {
        CacheKey::new(scope, credential, self.inner.prefix_len)
    }

    /// Return the snapshot for `scope`, fetching only when needed.
    ///
    /// - Fresh: cached entry, no network
    /// - Stale: cached entry, refreshed in the background
    /// - Expired or absent: waits for a refresh; its error is returned
    pub async fn load_data(&self, scope: &str, credential: &Credential) -> Result<CacheEntry, SyncError> {
        let key = self.key_for(scope, credential);
        let now = Utc::now();
        let cached = self.inner.store.get(&key, now);

        match (self.inner.policy.classify(cached.as_ref(), now), cached) {
            (Freshness::Fresh, Some(entry)) => {
                debug!(key = %key, "Serving fresh entry");
                self.inner.remember(&key, credential);
                Ok(entry)
            }
            (Freshness::Stale, Some(entry)) => {
                debug!(key = %key, age = %entry.age_display_at(now), "Serving stale entry, revalidating");
                self.inner.refresh_in_background(key, credential.clone());
                Ok(entry)
            }
            _ => {
                debug!(key = %key, "No usable entry, fetching");
                self.inner.refresh(key, credential.clone()).await
            }
        }
    }

    /// Fetch now regardless of freshness. Joins a refresh already in flight.
    pub async fn refresh_data(&self, scope: &str, credential: &Credential) -> Result<CacheEntry, SyncError> {
        let key = self.key_for(scope, credential);
        self.inner.refresh(key, credential.clone()).await
    }

    /// Drop every cached entry in both tiers. Never fails.
    pub fn clear_cache(&self) {
        self.inner.store.clear();
        self.inner.known.lock().clear();
    }

    /// Receive every snapshot stored by this engine.
    pub fn subscribe<F>(&self, on_snapshot: F) -> Subscription
    where
        F: Fn(&CacheKey, &CacheEntry) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe_all(on_snapshot)
    }

    /// Receive snapshots stored for one scope and credential.
    pub fn subscribe_key<F>(&self, scope: &str, credential: &Credential, on_snapshot: F) -> Subscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        let key = self.key_for(scope, credential);
        self.inner
            .notifier
            .subscribe(key, move |_, entry| on_snapshot(entry))
    }

    /// True when the durable tier is absent or has failed.
    pub fn is_degraded(&self) -> bool {
        self.inner.store.is_degraded()
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }
}

impl EngineInner {
    fn remember(&self, key: &CacheKey, credential: &Credential) {
        let mut known = self.known.lock();
        if !known.contains_key(key) {
            known.insert(key.clone(), credential.clone());
        }
    }

    /// Fetch, store and announce a snapshot for `key`, sharing any refresh
    /// already running for it.
    fn refresh(self: &Arc<Self>, key: CacheKey, credential: Credential) -> InFlight {
        self.remember(&key, &credential);
        let inner = Arc::clone(self);
        let task_key = key.clone();
        self.coordinator.load(&key, move |cancel| async move {
            let snapshot = inner.loader.load(&task_key.scope, &credential, &cancel).await?;
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let entry = inner.store.set(&task_key, CacheEntry::new(snapshot, Utc::now()));
            debug!(key = %task_key, hash = %entry.content_hash, "Stored refreshed entry");
            inner.notifier.emit(&task_key, &entry);
            Ok(entry)
        })
    }

    /// Refresh without a waiter. Failures are logged and the previous entry stays.
    fn refresh_in_background(self: &Arc<Self>, key: CacheKey, credential: Credential) {
        let pending = self.refresh(key.clone(), credential);
        tokio::spawn(async move {
            match pending.await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => debug!(key = %key, "Background refresh cancelled"),
                Err(e) => warn!(key = %key, error = %e, "Background refresh failed, keeping cached entry"),
            }
        });
    }

    /// Tell other contexts that `scope` changed. Skipped in degraded mode.
    fn broadcast(&self, scope: &str, hint: &str) {
        let Some(invalidator) = self.invalidator.as_ref() else {
            return;
        };
        if self.store.is_degraded() {
            debug!(scope, "Degraded, not broadcasting invalidation");
            return;
        }
        if let Err(e) = invalidator.broadcast(scope, hint) {
            warn!(scope, error = %e, "Failed to broadcast invalidation");
        }
    }

    fn on_signal(self: &Arc<Self>, signal: InvalidationSignal) {
        if self.store.is_degraded() || self.root.is_cancelled() {
            return;
        }
        let targets: Vec<(CacheKey, Credential)> = self
            .known
            .lock()
            .iter()
            .filter(|(key, _)| key.scope == signal.scope)
            .map(|(key, cred)| (key.clone(), cred.clone()))
            .collect();

        for (key, credential) in targets {
            if let Some(entry) = self.store.get(&key, Utc::now()) {
                if entry.fetched_at > signal.timestamp {
                    debug!(key = %key, "Entry already newer than signal");
                    continue;
                }
            }
            info!(key = %key, origin = %signal.origin, hint = %signal.source_partition_hint, "Refreshing after signal from another context");
            self.refresh_in_background(key, credential);
        }
    }

    fn shutdown(&self) {
        self.root.cancel();
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
