//! Two-tier snapshot cache.
//!
//! - `CacheStore`: memory tier in front of a `DurableStore`
//! - `CacheEntry`, `CacheKey`, `Credential`: what is cached and under which key
//! - `Freshness`, `FreshnessPolicy`: Fresh / Stale / Expired classification
//! - `hash`: FNV-1a content fingerprints for change detection
//!
//! Entries are fresh for 5 minutes and served-while-revalidating for another
//! 5 by default; see `EngineConfig`.

pub mod durable;
pub mod entry;
pub mod file_store;
pub mod freshness;
pub mod hash;
pub mod manager;

pub use durable::{DurableStore, MemoryStore, StoreChange};
pub use entry::{CacheEntry, CacheKey, Credential};
pub use file_store::FileStore;
pub use freshness::{classify, Freshness, FreshnessPolicy};
pub use manager::CacheStore;
