//! Error types shared by the cache engine.

use std::sync::Arc;

use thiserror::Error;

use crate::api::ApiError;
use crate::models::Partition;

/// Errors surfaced by `SyncEngine` operations.
///
/// `Clone` so that a single in-flight refresh can hand the same outcome to
/// every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Failed to fetch primary partition '{partition}': {source}")]
    PrimaryPartition {
        partition: Partition,
        #[source]
        source: Arc<ApiError>,
    },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    pub fn primary(partition: Partition, source: ApiError) -> Self {
        SyncError::PrimaryPartition {
            partition,
            source: Arc::new(source),
        }
    }

    /// True when the failure came from cancellation rather than the remote side.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// True when the remote side rejected the credential.
    pub fn is_credential_problem(&self) -> bool {
        match self {
            SyncError::PrimaryPartition { source, .. } => source.is_credential_problem(),
            _ => false,
        }
    }
}

/// Errors raised by a `DurableStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Durable store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

/// Rejected engine configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stale window ({stale}s) must be greater than fresh window ({fresh}s)")]
    WindowOrder { fresh: u64, stale: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
