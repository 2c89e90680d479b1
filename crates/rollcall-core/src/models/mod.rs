//! Data models for cached school data.
//!
//! - `Member`: student records, the primary partition
//! - `Group`: class records carrying aggregated member counts
//! - `Snapshot`, `SnapshotPatch`, `Partition`: the cached bundle and its slices
//!
//! Partitions without aggregation (attendance, deliveries, calendar, menu)
//! are kept as opaque JSON records.

pub mod de;
pub mod organization;
pub mod person;
pub mod snapshot;

/// An opaque record. `serde_json::Map` keeps keys sorted, so records
/// serialize canonically.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use organization::Group;
pub use person::{Allergies, Gender, Member};
pub use snapshot::{Partition, Snapshot, SnapshotPatch};
