use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hash::snapshot_hash;
use crate::models::Snapshot;

/// Bearer token for the remote service. Never logged or persisted in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }

    /// First `len` characters of the token.
    pub fn fingerprint(&self, len: usize) -> String {
        self.0.chars().take(len).collect()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}…)", self.fingerprint(4))
    }
}

/// Cache key: scope plus credential fingerprint, so two accounts sharing a
/// durable store never read each other's snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: String,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(scope: impl Into<String>, credential: &Credential, prefix_len: usize) -> Self {
        Self {
            scope: scope.into(),
            fingerprint: credential.fingerprint(prefix_len),
        }
    }

    /// Key under which the entry lives in the durable tier.
    pub fn storage_key(&self, namespace: &str) -> String {
        format!("{}:cache:{}:{}", namespace, self.scope, self.fingerprint)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.fingerprint)
    }
}

/// A snapshot plus its fingerprint and fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: Snapshot,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(snapshot: Snapshot, fetched_at: DateTime<Utc>) -> Self {
        let content_hash = snapshot_hash(&snapshot);
        Self {
            snapshot,
            content_hash,
            fetched_at,
        }
    }

    /// Entry used as the merge base when nothing is cached yet.
    pub fn empty() -> Self {
        Self::new(Snapshot::default(), DateTime::<Utc>::MIN_UTC)
    }

    pub fn age_minutes_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        self.age_display_at(Utc::now())
    }

    pub fn age_display_at(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes_at(now);
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            let remaining_mins = minutes % 60;
            if remaining_mins >= 30 {
                // Round up: 1h 30m+ becomes 2h
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            let remaining_hours = (minutes % 1440) / 60;
            if remaining_hours >= 12 {
                // Round up: 1d 12h+ becomes 2d
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fingerprint_is_prefix() {
        let cred = Credential::new("eyJhbGciOiJIUzI1NiJ9.payload.sig");
        assert_eq!(cred.fingerprint(8), "eyJhbGci");
        assert_eq!(Credential::new("abc").fingerprint(8), "abc");
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("supersecrettoken");
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("supersecrettoken"));
        assert!(shown.contains("supe"));
    }

    #[test]
    fn test_storage_key_includes_fingerprint() {
        let a = CacheKey::new("school-1", &Credential::new("tokenAAAA-1"), 6);
        let b = CacheKey::new("school-1", &Credential::new("tokenBBBB-1"), 6);
        assert_eq!(a.storage_key("rollcall"), "rollcall:cache:school-1:tokenA");
        assert_ne!(a.storage_key("rollcall"), b.storage_key("rollcall"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_hash_matches_snapshot() {
        let entry = CacheEntry::new(Snapshot::default(), Utc::now());
        assert_eq!(entry.content_hash, snapshot_hash(&Snapshot::default()));
    }

    #[test]
    fn test_age_display() {
        let now = Utc::now();
        let entry = |ago: Duration| CacheEntry::new(Snapshot::default(), now - ago);

        assert_eq!(entry(Duration::seconds(10)).age_display_at(now), "just now");
        assert_eq!(entry(Duration::minutes(-5)).age_display_at(now), "just now");
        assert_eq!(entry(Duration::minutes(5)).age_display_at(now), "5m ago");
        assert_eq!(entry(Duration::minutes(90)).age_display_at(now), "2h ago");
        assert_eq!(entry(Duration::minutes(80)).age_display_at(now), "1h ago");
        assert_eq!(entry(Duration::hours(36)).age_display_at(now), "2d ago");
        assert_eq!(entry(Duration::hours(30)).age_display_at(now), "1d ago");
    }
}
