//! Cache client trait and shared cache types.
//!
//! The data client treats the cache as a plain string key/value store with
//! batch operations. Values are JSON text of the flat record form; keys are
//! `NDC:` plus the encoded record key.

use std::time::Duration;

use async_trait::async_trait;
use kindcache_core::KindResult;
use tokio::sync::broadcast;

/// Capacity of the per-client lifecycle event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Connection lifecycle states reported by a cache client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Connecting,
    Connected,
    Ready,
    Reconnecting,
    Closed,
}

/// Cache collaborator used by the data client.
///
/// Implementations must be safe to share between tasks. Batch reads return
/// exactly one slot per requested key, in request order.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Open the connection. Emits `Connecting`, `Connected` and `Ready`.
    async fn connect(&self) -> KindResult<()>;

    /// Close the connection. Emits `Closed`.
    async fn close(&self) -> KindResult<()>;

    /// Subscribe to lifecycle events.
    fn events(&self) -> broadcast::Receiver<CacheEvent>;

    async fn get(&self, key: &str) -> KindResult<Option<String>>;

    async fn mget(&self, keys: &[String]) -> KindResult<Vec<Option<String>>>;

    /// Store a value. A zero TTL is treated as no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KindResult<()>;

    async fn mset(&self, entries: &[(String, String)]) -> KindResult<()>;

    async fn del(&self, key: &str) -> KindResult<()>;

    async fn mdel(&self, keys: &[String]) -> KindResult<()>;

    /// Usage statistics. Clients that do not track them report zeros.
    async fn stats(&self) -> KindResult<CacheStats> {
        Ok(CacheStats::default())
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate size of stored values in bytes.
    pub memory_bytes: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL to apply, with zero meaning none.
pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
}

/// Broadcast a lifecycle event, ignoring the no-subscriber case.
pub(crate) fn emit(events: &broadcast::Sender<CacheEvent>, event: CacheEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_zero_ttl_means_none() {
        assert_eq!(effective_ttl(Some(Duration::ZERO)), None);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(effective_ttl(None), None);
    }
}
