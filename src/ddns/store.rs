//! File-backed definition store
//!
//! Role and registry definitions live as one JSON document per key tuple
//! under a base directory (`role/<role>.json`, `registry/<name>.json`).
//! The store caches parsed documents keyed by resolved path and serves them
//! until the file's mtime changes. Entries idle past the cache lifetime, or
//! whose backing file has been unlinked, are dropped by a purge sweep that
//! runs at most once per lifetime window.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum StoreError {
    /// The definition file does not exist. Kept distinct from `Io` so the
    /// authorization layer can answer "unknown role" without conflating it
    /// with a failing disk.
    NotFound(String),
    /// A key would resolve outside the base directory.
    InvalidKey(String),
    Io(std::io::Error),
    Parse(serde_json::Error),
    PoisonedLock,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(path) => write!(f, "definition not found: {}", path),
            StoreError::InvalidKey(key) => write!(f, "invalid definition key: {}", key),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Parse(e) => write!(f, "malformed definition: {}", e),
            StoreError::PoisonedLock => write!(f, "definition cache lock was poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Parse(err)
    }
}

type Result<T> = std::result::Result<T, StoreError>;

const DEF_SUFFIX: &str = "json";

struct CacheEntry {
    mtime: SystemTime,
    value: serde_json::Value,
    /// Seconds since store creation, for idle eviction.
    last_used: AtomicU64,
}

/// Cached lookup of JSON definitions under a base directory.
pub struct ConfigStore {
    base_dir: PathBuf,
    cache_lifetime: Duration,
    cache: RwLock<HashMap<PathBuf, CacheEntry>>,
    epoch: Instant,
    last_sweep: AtomicU64,
    sweep_guard: Mutex<()>,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P, cache_lifetime: Duration) -> ConfigStore {
        ConfigStore {
            base_dir: base_dir.into(),
            cache_lifetime,
            cache: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
            last_sweep: AtomicU64::new(0),
            sweep_guard: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a key tuple to the concrete definition file path. Keys that
    /// contain path separators or `..` segments are rejected. The last key
    /// may contain dots, so the suffix is appended rather than substituted.
    pub fn resolve(&self, keys: &[&str]) -> Result<PathBuf> {
        let (file, dirs) = match keys.split_last() {
            Some(split) => split,
            None => return Err(StoreError::InvalidKey(String::new())),
        };

        for key in keys {
            if key.is_empty()
                || *key == "."
                || *key == ".."
                || key.contains('/')
                || key.contains('\\')
            {
                return Err(StoreError::InvalidKey(keys.join("/")));
            }
        }

        let mut path = self.base_dir.clone();
        for key in dirs {
            path.push(key);
        }
        path.push(format!("{}.{}", file, DEF_SUFFIX));
        Ok(path)
    }

    /// Look up and deserialize the definition stored under `keys`.
    ///
    /// Serves the cached document when the file's mtime is unchanged;
    /// re-reads otherwise. A missing file surfaces as `StoreError::NotFound`
    /// and drops any stale cache entry for that path.
    pub fn query<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<T> {
        let path = self.resolve(keys)?;

        self.maybe_sweep();

        let mtime = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cache
                    .write()
                    .map_err(|_| StoreError::PoisonedLock)?
                    .remove(&path);
                return Err(StoreError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        {
            let cache = self.cache.read().map_err(|_| StoreError::PoisonedLock)?;
            if let Some(entry) = cache.get(&path) {
                if entry.mtime == mtime {
                    entry
                        .last_used
                        .store(self.epoch.elapsed().as_secs(), Ordering::Relaxed);
                    return Ok(serde_json::from_value(entry.value.clone())?);
                }
            }
        }

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let value: serde_json::Value = serde_json::from_slice(&data)?;
        let parsed = serde_json::from_value(value.clone())?;

        let mut cache = self.cache.write().map_err(|_| StoreError::PoisonedLock)?;
        cache.insert(
            path,
            CacheEntry {
                mtime,
                value,
                last_used: AtomicU64::new(self.epoch.elapsed().as_secs()),
            },
        );

        Ok(parsed)
    }

    /// Run the purge sweep if a full lifetime has passed since the last one.
    /// The decision is double-checked around a non-blocking guard so
    /// concurrent readers perform at most one sweep per window.
    fn maybe_sweep(&self) {
        let lifetime = self.cache_lifetime.as_secs();
        let now = self.epoch.elapsed().as_secs();
        if now.saturating_sub(self.last_sweep.load(Ordering::Relaxed)) < lifetime {
            return;
        }

        let _guard = match self.sweep_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if now.saturating_sub(self.last_sweep.load(Ordering::Relaxed)) < lifetime {
            return;
        }
        self.last_sweep.store(now, Ordering::Relaxed);

        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(_) => return,
        };
        cache.retain(|path, entry| {
            now.saturating_sub(entry.last_used.load(Ordering::Relaxed)) <= lifetime
                && path.exists()
        });
    }

    #[cfg(test)]
    fn cached_paths(&self) -> Vec<PathBuf> {
        self.cache.read().unwrap().keys().cloned().collect()
    }
}
