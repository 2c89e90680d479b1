//! Engine configuration.
//!
//! Configuration is stored at `~/.config/rollcall/config.json`. Every field
//! has a default, so a missing or partial file is fine. A few fields can be
//! overridden from the environment (`ROLLCALL_*`), which is how the CLI is
//! usually pointed at a server.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::FreshnessPolicy;
use crate::error::ConfigError;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "rollcall";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default freshness window: entries younger than this are served as-is.
pub const DEFAULT_FRESH_SECS: u64 = 5 * 60;

/// Default stale window: entries younger than this are served while a
/// background refresh runs.
pub const DEFAULT_STALE_SECS: u64 = 10 * 60;

/// Durable entries older than this are not promoted on startup.
pub const DEFAULT_MAX_DURABLE_AGE_SECS: u64 = 24 * 60 * 60;

/// Characters of the credential kept in cache keys.
pub const DEFAULT_CREDENTIAL_PREFIX_LEN: usize = 16;

const DEFAULT_PAGE_LIMIT: u32 = 500;
const DEFAULT_MAX_PAGES: u32 = 20;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SIGNAL_POLL_MS: u64 = 500;

pub const ENV_API_URL: &str = "ROLLCALL_API_URL";
pub const ENV_FRESH_SECS: &str = "ROLLCALL_FRESH_SECS";
pub const ENV_STALE_SECS: &str = "ROLLCALL_STALE_SECS";
pub const ENV_CACHE_DIR: &str = "ROLLCALL_CACHE_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api_base_url: String,
    /// Prefix for every durable key this engine writes.
    pub namespace: String,
    pub fresh_window_secs: u64,
    pub stale_window_secs: u64,
    pub max_durable_age_secs: u64,
    pub credential_prefix_len: usize,
    pub page_limit: u32,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    /// How often a file-backed store checks for writes from other processes.
    pub signal_poll_interval_ms: u64,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            namespace: APP_NAME.to_string(),
            fresh_window_secs: DEFAULT_FRESH_SECS,
            stale_window_secs: DEFAULT_STALE_SECS,
            max_durable_age_secs: DEFAULT_MAX_DURABLE_AGE_SECS,
            credential_prefix_len: DEFAULT_CREDENTIAL_PREFIX_LEN,
            page_limit: DEFAULT_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            signal_poll_interval_ms: DEFAULT_SIGNAL_POLL_MS,
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the file-backed durable tier.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply `ROLLCALL_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Unparseable numbers are ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(secs) = parse_override(&lookup, ENV_FRESH_SECS) {
            self.fresh_window_secs = secs;
        }
        if let Some(secs) = parse_override(&lookup, ENV_STALE_SECS) {
            self.stale_window_secs = secs;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.freshness()?;
        if self.namespace.is_empty() {
            return Err(ConfigError::Zero("namespace length"));
        }
        if self.credential_prefix_len == 0 {
            return Err(ConfigError::Zero("credential_prefix_len"));
        }
        if self.page_limit == 0 {
            return Err(ConfigError::Zero("page_limit"));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Zero("max_pages"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request_timeout_secs"));
        }
        Ok(())
    }

    pub fn freshness(&self) -> Result<FreshnessPolicy, ConfigError> {
        FreshnessPolicy::new(self.fresh_window_secs, self.stale_window_secs)
    }
}

fn parse_override<F>(lookup: &F, name: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "Ignoring non-numeric override");
            None
        }
    }
}
