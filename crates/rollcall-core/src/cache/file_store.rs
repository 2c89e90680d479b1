//! File-backed durable store.
//!
//! Each key is one file under the store directory. Writes go through a
//! temporary file and a rename so readers never see a partial value. Other
//! processes sharing the directory are observed by a polling watcher.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::durable::{DurableStore, StoreChange, CHANGE_FEED_CAPACITY};
use crate::error::StoreError;

/// Extension of committed value files.
const ENTRY_EXT: &str = "entry";

/// Suffix of in-progress writes. Each write gets its own file, so concurrent
/// writers of one key never rename each other's data away.
const TEMP_SUFFIX: &str = ".tmp";

type Stamp = (SystemTime, u64);

pub struct FileStore {
    shared: Arc<FileShared>,
    poll_interval: Duration,
    watcher: Mutex<Option<CancellationToken>>,
}

struct FileShared {
    dir: PathBuf,
    /// Last observed stamp per key; own writes are recorded so they are not echoed.
    seen: Mutex<HashMap<String, Stamp>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            shared: Arc::new(FileShared {
                dir,
                seen: Mutex::new(HashMap::new()),
                changes,
            }),
            poll_interval,
            watcher: Mutex::new(None),
        })
    }

    /// Start the polling watcher if it is not running yet.
    ///
    /// Requires a Tokio runtime; without one the store works but has no feed.
    fn ensure_watcher(&self) -> bool {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, file store change feed disabled");
            return false;
        };

        self.shared.prime();
        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let interval = self.poll_interval;
        let task_token = token.clone();
        handle.spawn(async move {
            shared.watch(interval, task_token).await;
        });
        *watcher = Some(token);
        true
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
    }
}

impl FileShared {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", urlencoding::encode(key), ENTRY_EXT))
    }

    fn stamp(path: &Path) -> Option<Stamp> {
        let meta = std::fs::metadata(path).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    fn entry_files(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(key) => files.push((key.into_owned(), path)),
                Err(_) => trace!(file = %path.display(), "Skipping foreign file in store directory"),
            }
        }
        Ok(files)
    }

    /// Record the current state without emitting changes.
    fn prime(&self) {
        let files = match self.entry_files() {
            Ok(files) => files,
            Err(e) => {
                debug!(error = %e, "Failed to prime file store watcher");
                return;
            }
        };
        let mut seen = self.seen.lock();
        for (key, path) in files {
            if let Some(stamp) = Self::stamp(&path) {
                seen.insert(key, stamp);
            }
        }
    }

    /// Compare the directory against the last observed state and publish differences.
    fn scan(&self) -> Result<(), StoreError> {
        let files = self.entry_files()?;
        let mut changes = Vec::new();
        {
            let mut seen = self.seen.lock();
            let mut present = Vec::with_capacity(files.len());
            for (key, path) in files {
                let Some(stamp) = Self::stamp(&path) else {
                    continue;
                };
                present.push(key.clone());
                if seen.get(&key) == Some(&stamp) {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(value) => {
                        seen.insert(key.clone(), stamp);
                        changes.push(StoreChange {
                            key,
                            value: Some(value),
                        });
                    }
                    Err(e) => debug!(key = %key, error = %e, "Changed file unreadable, retrying next scan"),
                }
            }
            let removed: Vec<String> = seen
                .keys()
                .filter(|k| !present.contains(k))
                .cloned()
                .collect();
            for key in removed {
                seen.remove(&key);
                changes.push(StoreChange { key, value: None });
            }
        }

        for change in changes {
            if self.changes.send(change).is_err() {
                trace!("no change feed subscribers");
            }
        }
        Ok(())
    }

    async fn watch(&self, interval: Duration, cancel: CancellationToken) {
        debug!(dir = %self.dir.display(), ?interval, "File store watcher started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan() {
                        debug!(error = %e, "File store scan failed");
                    }
                }
            }
        }
        debug!("File store watcher stopped");
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.shared.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        let path = self.shared.path_for(key);
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.shared.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        if let Some(stamp) = FileShared::stamp(&path) {
            self.shared.seen.lock().insert(key.to_string(), stamp);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.shared.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.shared.seen.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .shared
            .entry_files()?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn change_feed(&self) -> Option<broadcast::Receiver<StoreChange>> {
        // Subscribe before the watcher's first scan so nothing is missed
        let rx = self.shared.changes.subscribe();
        self.ensure_watcher().then_some(rx)
    }
}
