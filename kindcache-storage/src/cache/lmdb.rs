//! LMDB-backed cache client.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached records in a
//! memory-mapped file that survives process restarts.
//!
//! # Entry Layout
//!
//! Each value is stored as an 8-byte little-endian expiry timestamp in Unix
//! milliseconds (0 for no expiry) followed by the UTF-8 payload. Expired
//! entries read as misses and are removed lazily or by [`LmdbCacheClient::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; every
//! mutation, batch or single, runs in one write transaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use kindcache_core::{CacheError, ConfigError, KindError, KindResult};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::traits::{
    effective_ttl, emit, CacheClient, CacheEvent, CacheStats, EVENT_CHANNEL_CAPACITY,
};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are not a valid entry.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for KindError {
    fn from(e: LmdbCacheError) -> Self {
        KindError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Location and size of the LMDB cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmdbCacheConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl Default for LmdbCacheConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("kindcache-lmdb"),
            max_size_mb: 64,
        }
    }
}

impl LmdbCacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Read `KINDCACHE_LMDB_PATH` and `KINDCACHE_LMDB_MAX_SIZE_MB`, falling
    /// back to defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("KINDCACHE_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: std::env::var("KINDCACHE_LMDB_MAX_SIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size_mb),
        }
    }

    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "path".to_string(),
            });
        }
        if self.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "map size must be at least 1 MB".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ENTRY ENCODING
// ============================================================================

fn encode_entry(value: &str, expires_at_ms: i64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at_ms.to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    bytes
}

/// Split a stored entry into expiry and payload.
fn decode_entry(bytes: &[u8]) -> Result<(i64, &str), LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(format!(
            "entry of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(header);
    let payload =
        std::str::from_utf8(payload).map_err(|e| LmdbCacheError::Corrupt(e.to_string()))?;
    Ok((i64::from_le_bytes(raw), payload))
}

fn is_expired(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms != 0 && expires_at_ms <= now_ms
}

fn expiry_for(ttl: Option<Duration>) -> i64 {
    match effective_ttl(ttl) {
        Some(ttl) => i64::try_from(ttl.as_millis())
            .ok()
            .and_then(|ms| Utc::now().timestamp_millis().checked_add(ms))
            .unwrap_or(0),
        None => 0,
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Persistent cache client backed by a single unnamed LMDB database.
pub struct LmdbCacheClient {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: Arc<RwLock<CacheStats>>,
    closed: AtomicBool,
    events: broadcast::Sender<CacheEvent>,
}

impl LmdbCacheClient {
    /// Open (or create) the cache at the configured location.
    pub fn open(config: &LmdbCacheConfig) -> KindResult<Self> {
        config.validate()?;
        Ok(Self::new(&config.path, config.max_size_mb)?)
    }

    /// Create a client at `path` with a map of `max_size_mb` megabytes.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per client and the file is
        // not modified by other means while it is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!(path = %path.as_ref().display(), max_size_mb, "lmdb cache opened");
        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            closed: AtomicBool::new(false),
            events,
        })
    }

    fn ensure_open(&self) -> KindResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed.into());
        }
        Ok(())
    }

    fn record(&self, hits: u64, misses: u64, expirations: u64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += hits;
            stats.misses += misses;
            stats.expirations += expirations;
        }
    }

    fn read_one(
        &self,
        rtxn: &RoTxn<'_>,
        key: &str,
        now_ms: i64,
    ) -> Result<(Option<String>, bool), LmdbCacheError> {
        let Some(bytes) = self.db.get(rtxn, key.as_bytes()).map_err(txn_error)? else {
            return Ok((None, false));
        };
        let (expires_at, payload) = decode_entry(bytes)?;
        if is_expired(expires_at, now_ms) {
            return Ok((None, true));
        }
        Ok((Some(payload.to_string()), false))
    }

    fn lookup(&self, keys: &[&str]) -> KindResult<Vec<Option<String>>> {
        self.ensure_open()?;
        let now_ms = Utc::now().timestamp_millis();
        let mut expired = Vec::new();
        let mut results = Vec::with_capacity(keys.len());
        {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            for key in keys {
                let (value, was_expired) = self.read_one(&rtxn, key, now_ms)?;
                if was_expired {
                    expired.push(*key);
                }
                results.push(value);
            }
        }

        if !expired.is_empty() {
            self.remove(&expired)?;
        }

        let hits = results.iter().filter(|r| r.is_some()).count() as u64;
        self.record(hits, results.len() as u64 - hits, expired.len() as u64);
        Ok(results)
    }

    fn write<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
        expires_at_ms: i64,
    ) -> KindResult<()> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for (key, value) in entries {
            self.db
                .put(&mut wtxn, key.as_bytes(), &encode_entry(value, expires_at_ms))
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> KindResult<()> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for key in keys {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> KindResult<usize> {
        self.ensure_open()?;
        let now_ms = Utc::now().timestamp_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let mut expired = Vec::new();
            for item in self.db.iter(&rtxn).map_err(txn_error)? {
                let (key, bytes) = item.map_err(txn_error)?;
                let (expires_at, _) = decode_entry(bytes)?;
                if is_expired(expires_at, now_ms) {
                    expired.push(key.to_vec());
                }
            }
            expired
        };

        if !expired.is_empty() {
            let mut wtxn = self.env.write_txn().map_err(txn_error)?;
            for key in &expired {
                self.db.delete(&mut wtxn, key).map_err(txn_error)?;
            }
            wtxn.commit().map_err(txn_error)?;
            self.record(0, 0, expired.len() as u64);
        }

        debug!(removed = expired.len(), "purged expired cache entries");
        Ok(expired.len())
    }

    /// Remove every entry.
    pub fn clear(&self) -> KindResult<()> {
        self.ensure_open()?;
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}

#[async_trait]
impl CacheClient for LmdbCacheClient {
    async fn connect(&self) -> KindResult<()> {
        emit(&self.events, CacheEvent::Connecting);
        self.closed.store(false, Ordering::Release);
        emit(&self.events, CacheEvent::Connected);
        emit(&self.events, CacheEvent::Ready);
        Ok(())
    }

    async fn close(&self) -> KindResult<()> {
        self.closed.store(true, Ordering::Release);
        self.env
            .force_sync()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        emit(&self.events, CacheEvent::Closed);
        info!("lmdb cache closed");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    async fn get(&self, key: &str) -> KindResult<Option<String>> {
        Ok(self.lookup(&[key])?.pop().flatten())
    }

    async fn mget(&self, keys: &[String]) -> KindResult<Vec<Option<String>>> {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.lookup(&keys)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KindResult<()> {
        self.write([(key, value)], expiry_for(ttl))
    }

    async fn mset(&self, entries: &[(String, String)]) -> KindResult<()> {
        self.write(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())), 0)
    }

    async fn del(&self, key: &str) -> KindResult<()> {
        self.remove(&[key])
    }

    async fn mdel(&self, keys: &[String]) -> KindResult<()> {
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.remove(&keys)
    }

    async fn stats(&self) -> KindResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| CacheError::LockPoisoned)?;
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut count = 0u64;
        let mut bytes = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = item.map_err(txn_error)?;
            count += 1;
            bytes += (key.len() + value.len().saturating_sub(HEADER_LEN)) as u64;
        }
        stats.entry_count = count;
        stats.memory_bytes = bytes;
        Ok(stats)
    }
}
