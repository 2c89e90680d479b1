//! Cross-context invalidation over the durable store's change feed.
//!
//! A context that changes data for a scope writes a small signal record
//! under `{namespace}:signal:{scope}`. Every other context sharing the store
//! sees the write on its change feed and refreshes that scope. Signals carry
//! the writer's `ContextId` so a context never reacts to its own writes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{DurableStore, StoreChange};
use crate::error::StoreError;

/// Identity of one execution context, random per engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub fn random() -> Self {
        ContextId(rand::random())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The record other contexts observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationSignal {
    pub scope: String,
    pub timestamp: DateTime<Utc>,
    /// Comma-separated partitions that changed. Informational only.
    #[serde(default)]
    pub source_partition_hint: String,
    pub origin: ContextId,
}

pub struct Invalidator {
    store: Arc<dyn DurableStore>,
    prefix: String,
    context: ContextId,
}

impl Invalidator {
    pub fn new(store: Arc<dyn DurableStore>, namespace: &str, context: ContextId) -> Self {
        Self {
            store,
            prefix: format!("{}:signal:", namespace),
            context,
        }
    }

    pub fn signal_key(&self, scope: &str) -> String {
        format!("{}{}", self.prefix, scope)
    }

    /// Tell other contexts that `scope` changed.
    pub fn broadcast(&self, scope: &str, hint: &str) -> Result<InvalidationSignal, StoreError> {
        let signal = InvalidationSignal {
            scope: scope.to_string(),
            timestamp: Utc::now(),
            source_partition_hint: hint.to_string(),
            origin: self.context,
        };
        let raw = serde_json::to_string(&signal)
            .map_err(|e| StoreError::Unavailable(format!("failed to encode signal: {}", e)))?;
        self.store.set(&self.signal_key(scope), &raw)?;
        debug!(scope, hint, "Broadcast invalidation signal");
        Ok(signal)
    }

    /// Decode a change into a signal from another context, if it is one.
    pub fn decode(&self, change: &StoreChange) -> Option<InvalidationSignal> {
        let scope = change.key.strip_prefix(&self.prefix)?;
        let raw = change.value.as_deref()?;
        let signal: InvalidationSignal = match serde_json::from_str(raw) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(key = %change.key, error = %e, "Ignoring malformed invalidation signal");
                return None;
            }
        };
        if signal.origin == self.context || signal.scope != scope {
            return None;
        }
        Some(signal)
    }

    /// Run `on_signal` for every foreign signal about `scope` until `cancel` fires.
    pub fn listen<F>(&self, scope: &str, on_signal: F, cancel: CancellationToken) -> Option<JoinHandle<()>>
    where
        F: Fn(InvalidationSignal) + Send + Sync + 'static,
    {
        let scope = scope.to_string();
        self.spawn_listener(Some(scope), on_signal, cancel)
    }

    /// Run `on_signal` for every foreign signal until `cancel` fires.
    ///
    /// Returns `None` when the store has no change feed. Must be called
    /// within a Tokio runtime.
    pub fn listen_all<F>(&self, on_signal: F, cancel: CancellationToken) -> Option<JoinHandle<()>>
    where
        F: Fn(InvalidationSignal) + Send + Sync + 'static,
    {
        self.spawn_listener(None, on_signal, cancel)
    }

    fn spawn_listener<F>(
        &self,
        scope: Option<String>,
        on_signal: F,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>>
    where
        F: Fn(InvalidationSignal) + Send + Sync + 'static,
    {
        let Some(mut feed) = self.store.change_feed() else {
            info!("Durable store has no change feed, cross-context invalidation disabled");
            return None;
        };
        let decoder = Invalidator {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
            context: self.context,
        };

        Some(tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = feed.recv() => change,
                };
                match change {
                    Ok(change) => {
                        let Some(signal) = decoder.decode(&change) else {
                            continue;
                        };
                        if scope.as_deref().map_or(true, |s| s == signal.scope) {
                            debug!(scope = %signal.scope, origin = %signal.origin, "Received invalidation signal");
                            on_signal(signal);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Invalidation listener lagged behind the change feed");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Invalidation listener stopped");
        }))
    }
}
