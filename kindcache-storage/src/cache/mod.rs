//! Cache collaborators for the data client.
//!
//! The data client talks to the cache through [`CacheClient`], a string
//! key/value contract with batch reads and writes. Three clients ship with
//! the crate:
//!
//! - [`NoCacheClient`] drops writes and misses every read.
//! - [`MemoryCacheClient`] keeps entries in process with optional TTLs.
//! - [`LmdbCacheClient`] persists entries in an LMDB file via heed.

pub mod lmdb;
pub mod memory;
pub mod no_cache;
pub mod traits;

pub use lmdb::{LmdbCacheClient, LmdbCacheConfig, LmdbCacheError};
pub use memory::MemoryCacheClient;
pub use no_cache::NoCacheClient;
pub use traits::{CacheClient, CacheEvent, CacheStats, EVENT_CHANNEL_CAPACITY};
