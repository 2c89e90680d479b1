//! rollcall core library.
//!
//! A data-synchronization cache for a school dashboard. Several views share
//! one snapshot of school data (students, classes, attendance, deliveries,
//! calendar, menu) per scope and credential. The engine decides when to
//! serve from cache, when to revalidate in the background and when to wait
//! for the network, applies optimistic local writes and keeps other
//! processes sharing the same durable store in step.
//!
//! # Modules
//!
//! - [`api`]: remote data service trait and its HTTP client
//! - [`cache`]: two-tier cache, freshness rules, content hashing
//! - [`config`]: engine configuration
//! - [`engine`]: [`SyncEngine`], the public entry point
//! - [`error`]: error types
//! - [`models`]: members, groups, snapshots
//! - [`sync`]: fetch coordination, aggregation, notification, invalidation

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod sync;

pub use api::{ApiError, HttpDataService, RemoteDataService};
pub use cache::{CacheEntry, CacheKey, Credential, DurableStore, FileStore, Freshness, MemoryStore};
pub use config::EngineConfig;
pub use engine::{ReconcileHandle, SyncEngine};
pub use error::{ConfigError, StoreError, SyncError};
pub use models::{Group, Member, Partition, Snapshot, SnapshotPatch};
pub use sync::{ContextId, Subscription};
