//! KINDCACHE Storage - Store and Cache Collaborators plus the Data Client
//!
//! Defines the store and cache contracts consumed by the cache-aside
//! [`DataClient`], with in-memory implementations of both and an LMDB-backed
//! cache for persistence across restarts.

pub mod cache;
pub mod client;
pub mod store;

pub use cache::{
    CacheClient, CacheEvent, CacheStats, LmdbCacheClient, LmdbCacheConfig, LmdbCacheError,
    MemoryCacheClient, NoCacheClient,
};
pub use client::{DataClient, QueryPage, CACHE_KEY_PREFIX};
pub use store::{
    compare_values, Direction, Filter, FilterOp, MemoryStore, Order, Query, QueryResults, Store,
    StoreConfig, StoreStatistics, TransactionHandle,
};

/// Data client over the in-memory store and cache.
pub type MemoryDataClient = DataClient<MemoryStore, MemoryCacheClient>;
