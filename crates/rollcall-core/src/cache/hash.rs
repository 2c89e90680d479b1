//! Content fingerprints for change detection.
//!
//! FNV-1a is deterministic across Rust versions and platforms. It is not a
//! security primitive; a collision only means a missed "changed" notification.

use serde::Serialize;

use crate::models::Snapshot;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a over raw bytes.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fingerprint any serializable value as 16 lowercase hex characters.
///
/// A value that fails to serialize hashes as the empty input.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("{:016x}", fnv1a(&bytes))
}

pub fn snapshot_hash(snapshot: &Snapshot) -> String {
    content_hash(snapshot)
}
