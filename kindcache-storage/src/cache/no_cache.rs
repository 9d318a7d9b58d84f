//! Cache client that stores nothing.

use std::time::Duration;

use async_trait::async_trait;
use kindcache_core::KindResult;
use tokio::sync::broadcast;

use super::traits::{emit, CacheClient, CacheEvent, CacheStats, EVENT_CHANNEL_CAPACITY};

/// Every read misses and every write is dropped. The default cache of a
/// data client that runs without caching.
#[derive(Debug)]
pub struct NoCacheClient {
    events: broadcast::Sender<CacheEvent>,
}

impl NoCacheClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }
}

impl Default for NoCacheClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for NoCacheClient {
    async fn connect(&self) -> KindResult<()> {
        emit(&self.events, CacheEvent::Connecting);
        emit(&self.events, CacheEvent::Connected);
        emit(&self.events, CacheEvent::Ready);
        Ok(())
    }

    async fn close(&self) -> KindResult<()> {
        emit(&self.events, CacheEvent::Closed);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    async fn get(&self, _key: &str) -> KindResult<Option<String>> {
        Ok(None)
    }

    async fn mget(&self, keys: &[String]) -> KindResult<Vec<Option<String>>> {
        Ok(vec![None; keys.len()])
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> KindResult<()> {
        Ok(())
    }

    async fn mset(&self, _entries: &[(String, String)]) -> KindResult<()> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> KindResult<()> {
        Ok(())
    }

    async fn mdel(&self, _keys: &[String]) -> KindResult<()> {
        Ok(())
    }

    async fn stats(&self) -> KindResult<CacheStats> {
        Ok(CacheStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_always_miss() {
        let cache = NoCacheClient::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(cache.mget(&keys).await.unwrap(), vec![None, None, None]);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let cache = NoCacheClient::new();
        let mut events = cache.events();
        cache.connect().await.unwrap();
        cache.close().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Connecting);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Ready);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Closed);
    }
}
