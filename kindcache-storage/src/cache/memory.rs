//! Process-local cache client with TTL expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kindcache_core::{CacheError, KindResult};
use tokio::sync::broadcast;
use tracing::info;

use super::traits::{
    effective_ttl, emit, CacheClient, CacheEvent, CacheStats, EVENT_CHANNEL_CAPACITY,
};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache. Starts connected; after `close` every operation fails
/// with [`CacheError::Closed`] until `connect` is called again.
#[derive(Debug)]
pub struct MemoryCacheClient {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<CacheStats>>,
    closed: AtomicBool,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for MemoryCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            closed: AtomicBool::new(false),
            events,
        }
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

    fn lookup(&self, keys: &[&str]) -> KindResult<Vec<Option<String>>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut expired = Vec::new();
        let results: Vec<Option<String>> = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            keys.iter()
                .map(|key| match entries.get(*key) {
                    Some(entry) if entry.is_expired(now) => {
                        expired.push(key.to_string());
                        None
                    }
                    Some(entry) => Some(entry.value.clone()),
                    None => None,
                })
                .collect()
        };

        if !expired.is_empty() {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            for key in &expired {
                if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(key);
                }
            }
        }

        let hits = results.iter().filter(|r| r.is_some()).count() as u64;
        self.record(hits, results.len() as u64 - hits, expired.len() as u64);
        Ok(results)
    }

    fn store(&self, entries: impl IntoIterator<Item = (String, String)>, ttl: Option<Duration>) -> KindResult<()> {
        self.ensure_open()?;
        // A TTL past the clock's range never expires.
        let expires_at = effective_ttl(ttl).and_then(|d| Instant::now().checked_add(d));
        let mut map = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        for (key, value) in entries {
            map.insert(key, Entry { value, expires_at });
        }
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> KindResult<()> {
        self.ensure_open()?;
        let mut map = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }

    /// Whether a live entry exists, without touching statistics.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|m| m.get(key).is_some_and(|e| !e.is_expired(now)))
            .unwrap_or(false)
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheClient for MemoryCacheClient {
    async fn connect(&self) -> KindResult<()> {
        emit(&self.events, CacheEvent::Connecting);
        self.closed.store(false, Ordering::Release);
        emit(&self.events, CacheEvent::Connected);
        emit(&self.events, CacheEvent::Ready);
        info!("memory cache ready");
        Ok(())
    }

    async fn close(&self) -> KindResult<()> {
        self.closed.store(true, Ordering::Release);
        emit(&self.events, CacheEvent::Closed);
        info!("memory cache closed");
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
        self.store([(key.to_string(), value.to_string())], ttl)
    }

    async fn mset(&self, entries: &[(String, String)]) -> KindResult<()> {
        self.store(entries.iter().cloned(), None)
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
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        stats.entry_count = entries.len() as u64;
        stats.memory_bytes = entries
            .iter()
            .map(|(k, e)| (k.len() + e.value.len()) as u64)
            .sum();
        Ok(stats)
    }
}
