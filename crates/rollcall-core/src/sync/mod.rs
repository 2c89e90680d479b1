//! Refresh machinery behind `SyncEngine`.
//!
//! - `loader`: partition fetchers (paging, envelopes, degradation)
//! - `aggregate`: per-class member counts
//! - `coordinator`: one in-flight refresh per key
//! - `notifier`: in-process fan-out of stored snapshots
//! - `invalidator`: signals to and from other contexts

pub mod aggregate;
pub mod coordinator;
pub mod invalidator;
pub mod loader;
pub mod notifier;

pub use aggregate::{aggregate, aggregate_snapshot, GroupCounts};
pub use coordinator::{FetchCoordinator, InFlight};
pub use invalidator::{ContextId, InvalidationSignal, Invalidator};
pub use loader::SnapshotLoader;
pub use notifier::{Notifier, Subscription};
