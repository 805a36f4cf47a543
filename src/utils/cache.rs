//! Durable response cache keyed by page query.
//!
//! The fetcher reads through and writes through a [`CacheStore`]. Entries
//! never expire; deleting the cache directory only forces fresh fetches.
//!
//! # Cache Structure
//!
//! ```text
//! ~/.cache/trial-harvest/
//!   responses/
//!     <sha256 of query identity>.json
//! ```
//!
//! Each file is a JSON envelope holding the query identity, the raw response
//! body and the time it was stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::CacheConfig;
use crate::models::{CacheKey, Query};

/// A stored response body with the identity it was fetched for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub query_text: String,

    #[serde(default)]
    pub page_token: Option<String>,

    /// Raw body exactly as the registry returned it
    pub body: String,

    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(query: &Query, body: impl Into<String>) -> Self {
        Self {
            query_text: query.query_text.clone(),
            page_token: query.page_token.clone(),
            body: body.into(),
            stored_at: Utc::now(),
        }
    }

    /// Whether this entry was stored for `query`
    pub fn matches(&self, query: &Query) -> bool {
        self.query_text == query.query_text && self.page_token == query.page_token
    }
}

/// Cache failures; callers degrade these to a miss or a skipped write
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value store for raw response bodies
///
/// Implementations must tolerate concurrent readers and writers; two writers
/// racing on one key may both succeed with the last one winning.
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Look up an entry
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError>;

    /// Store a body for `query` under `key`
    fn put(&self, key: &CacheKey, query: &Query, body: &str) -> Result<(), CacheError>;
}

/// Directory-backed cache with atomic per-entry writes
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    base_dir: PathBuf,
    responses_dir: PathBuf,
}

impl FileCacheStore {
    /// Create a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let responses_dir = base_dir.join("responses");
        Self {
            base_dir,
            responses_dir,
        }
    }

    /// Create a store from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.directory())
    }

    /// Create the cache directories
    pub fn initialize(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.responses_dir)?;
        tracing::info!("Cache initialized at: {}", self.base_dir.display());
        Ok(())
    }

    /// Cache root
    pub fn cache_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.responses_dir.join(format!("{}.json", key.as_str()))
    }

    /// Remove every entry
    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.responses_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.responses_dir)?;
        tracing::info!("Cache cleared");
        Ok(())
    }

    /// Entry count and on-disk size
    pub fn stats(&self) -> CacheStats {
        let mut entries = 0;
        let mut bytes = 0;
        if let Ok(dir) = self.responses_dir.read_dir() {
            for entry in dir.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    entries += 1;
                    bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }

        CacheStats {
            cache_dir: self.base_dir.clone(),
            entries,
            size_kb: bytes / 1024,
        }
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Cache MISS: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let cached = serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Cache HIT: {}", key);
        Ok(Some(cached))
    }

    fn put(&self, key: &CacheKey, query: &Query, body: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.responses_dir)?;

        let entry = CachedResponse::new(query, body);
        let content = serde_json::to_vec(&entry).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        // Write beside the target, then rename so readers never see a partial file.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.responses_dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(key)).map_err(|e| e.error)?;

        tracing::debug!("Cached response: {}", key);
        Ok(())
    }
}

/// Statistics about the file cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub cache_dir: PathBuf,
    pub entries: usize,
    pub size_kb: u64,
}

/// Cache that stores nothing (used when caching is disabled)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheStore;

impl CacheStore for NoopCacheStore {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _query: &Query, _body: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// In-memory cache for tests, with switchable failures and write counting
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<CacheKey, CachedResponse>>,
    puts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Body stored for `query`, if any
    pub fn body_for(&self, query: &Query) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|e| e.get(&query.cache_key()).map(|c| c.body.clone()))
    }

    /// Make every `get` fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `put` fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("reads disabled".to_string()));
        }
        let entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, query: &Query, body: &str) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("writes disabled".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        entries.insert(key.clone(), CachedResponse::new(query, body));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
