use chrono::{DateTime, Duration, Utc};

use super::CacheEntry;
use crate::error::ConfigError;

/// How a cached entry may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve without network activity.
    Fresh,
    /// Serve immediately and revalidate in the background.
    Stale,
    /// Fetch before returning anything.
    Expired,
}

/// Classify an entry's age against the two windows.
///
/// Missing entries are `Expired`. Negative ages (clock skew) count as `Fresh`.
pub fn classify(
    entry: Option<&CacheEntry>,
    now: DateTime<Utc>,
    fresh_window: Duration,
    stale_window: Duration,
) -> Freshness {
    let Some(entry) = entry else {
        return Freshness::Expired;
    };
    let age = now - entry.fetched_at;
    if age < fresh_window {
        Freshness::Fresh
    } else if age < stale_window {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

/// Validated pair of freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    fresh: Duration,
    stale: Duration,
}

impl FreshnessPolicy {
    pub fn new(fresh_secs: u64, stale_secs: u64) -> Result<Self, ConfigError> {
        if fresh_secs == 0 {
            return Err(ConfigError::Zero("fresh window"));
        }
        if stale_secs <= fresh_secs {
            return Err(ConfigError::WindowOrder {
                fresh: fresh_secs,
                stale: stale_secs,
            });
        }
        Ok(Self {
            fresh: secs(fresh_secs),
            stale: secs(stale_secs),
        })
    }

    pub fn classify(&self, entry: Option<&CacheEntry>, now: DateTime<Utc>) -> Freshness {
        classify(entry, now, self.fresh, self.stale)
    }
}

pub(crate) fn secs(value: u64) -> Duration {
    // chrono caps durations at i64::MAX milliseconds
    let clamped = i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    Duration::seconds(clamped)
}
