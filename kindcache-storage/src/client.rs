//! Cache-aside data client.
//!
//! Reads check the cache first and fall back to the store, populating the
//! cache with the flat form of every record they fetch from the store.
//! Writes go to the store and then invalidate the cache entry; they never
//! write through.
//!
//! # Transactions
//!
//! [`DataClient::run_in_transaction`] hands the closure a transaction-scoped
//! clone sharing the same store and cache. Cache reads are always skipped
//! inside a transaction. Cache invalidations follow the configured
//! [`TransactionCachePolicy`]: deferred until commit (and discarded on
//! rollback) by default, or applied at call time.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::try_join_all;
use futures_util::FutureExt;
use kindcache_core::{
    CacheError, ClientConfig, Entity, EntityMapper, Ident, Key, KeyError, KindError, KindResult,
    MappingError, SchemaRegistry, StorageError, StoreKey, TransactionCachePolicy,
    TransactionError, WireEntity,
};
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheClient, CacheEvent};
use crate::store::{Query, Store, TransactionHandle};

/// Prefix of every cache key written by the data client.
pub const CACHE_KEY_PREFIX: &str = "NDC:";

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    /// Cursor to pass back to continue after this page.
    pub next_cursor: Option<String>,
    /// True when the page filled `max_results` exactly. A full page is taken
    /// to mean more results follow, which is not confirmed with the store.
    pub more: bool,
}

/// Cache-aside client over a store and a cache.
pub struct DataClient<S: Store, C: CacheClient> {
    store: Arc<S>,
    cache: Arc<C>,
    registry: Arc<SchemaRegistry>,
    config: Arc<ClientConfig>,
    transaction: Option<TransactionHandle>,
    deferred: Arc<Mutex<Vec<String>>>,
}

impl<S: Store, C: CacheClient> Clone for DataClient<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            transaction: self.transaction,
            deferred: Arc::clone(&self.deferred),
        }
    }
}

impl<S: Store, C: CacheClient> std::fmt::Debug for DataClient<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("config", &self.config)
            .field("transaction", &self.transaction)
            .finish_non_exhaustive()
    }
}

impl<S: Store, C: CacheClient> DataClient<S, C> {
    /// Create a client. Fails when the configuration does not validate.
    pub fn new(
        store: impl Into<Arc<S>>,
        cache: impl Into<Arc<C>>,
        registry: impl Into<Arc<SchemaRegistry>>,
        config: ClientConfig,
    ) -> KindResult<Self> {
        config.validate()?;
        Ok(Self {
            store: store.into(),
            cache: cache.into(),
            registry: registry.into(),
            config: Arc::new(config),
            transaction: None,
            deferred: Arc::new(Mutex::new(Vec::new())),
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle and accessors
    // ------------------------------------------------------------------------

    pub async fn connect(&self) -> KindResult<()> {
        self.cache.connect().await
    }

    pub async fn disconnect(&self) -> KindResult<()> {
        self.cache.close().await
    }

    /// Lifecycle events of the cache connection.
    pub fn cache_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.events()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }

    /// Start a query over `kind`.
    pub fn create_query(&self, kind: impl Into<String>) -> Query {
        Query::new(kind)
    }

    fn mapper(&self) -> EntityMapper<'_> {
        EntityMapper::new(&self.registry, &*self.store)
            .with_location_prefix(self.config.key_location_prefix.as_deref())
    }

    /// Cache key of a record key: the fixed prefix plus the encoded key.
    pub fn cache_key(&self, key: &Key) -> KindResult<String> {
        let encoded = key.encode(&*self.store, self.config.key_location_prefix.as_deref())?;
        Ok(format!("{CACHE_KEY_PREFIX}{encoded}"))
    }

    pub fn cache_keys(&self, keys: &[Key]) -> KindResult<Vec<String>> {
        keys.iter().map(|key| self.cache_key(key)).collect()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Fetch one record, from the cache when possible.
    pub async fn get<T: Entity>(&self, key: &Key) -> KindResult<Option<T>> {
        require_complete(key)?;
        let cache_key = self.cache_key(key)?;

        if !self.in_transaction() {
            if let Some(text) = self.cache.get(&cache_key).await? {
                if let Some(record) = self.decode_cached::<T>(key, &text) {
                    debug!(%key, "cache hit");
                    return Ok(Some(record));
                }
            }
            debug!(%key, "cache miss");
        }

        let Some(wire) = self
            .store
            .get(&key.to_store_key(), self.transaction.as_ref())
            .await?
        else {
            return Ok(None);
        };

        let mapper = self.mapper();
        let record: T = mapper.from_store(&wire)?;
        let text = flat_text(&mapper, &record)?;
        self.cache.set(&cache_key, &text, self.config.cache_ttl).await?;
        Ok(Some(record))
    }

    /// Fetch many records. The result has one slot per key, in key order.
    pub async fn get_multi<T: Entity>(&self, keys: &[Key]) -> KindResult<Vec<Option<T>>> {
        for key in keys {
            require_complete(key)?;
        }
        let cache_keys = self.cache_keys(keys)?;
        let mut results: Vec<Option<T>> = keys.iter().map(|_| None).collect();

        let mut missing: Vec<usize> = Vec::new();
        if self.in_transaction() || keys.is_empty() {
            missing.extend(0..keys.len());
        } else {
            let cached = self.cache.mget(&cache_keys).await?;
            let served = cached.len().min(keys.len());
            for (index, slot) in cached.into_iter().take(served).enumerate() {
                match slot.and_then(|text| self.decode_cached::<T>(&keys[index], &text)) {
                    Some(record) => results[index] = Some(record),
                    None => missing.push(index),
                }
            }
            missing.extend(served..keys.len());
            debug!(
                requested = keys.len(),
                hits = keys.len() - missing.len(),
                "cache multi-read"
            );
        }

        if missing.is_empty() {
            return Ok(results);
        }

        let store_keys: Vec<StoreKey> = missing.iter().map(|&i| keys[i].to_store_key()).collect();
        let fetched = self
            .store
            .get_multi(&store_keys, self.transaction.as_ref())
            .await?;

        if fetched.len() != missing.len() {
            return Err(StorageError::Backend {
                reason: format!(
                    "store returned {} slots for {} keys",
                    fetched.len(),
                    missing.len()
                ),
            }
            .into());
        }

        let mapper = self.mapper();
        let mut populate = Vec::new();
        for (&index, wire) in missing.iter().zip(fetched) {
            let Some(wire) = wire else { continue };
            let record: T = mapper.from_store(&wire)?;
            populate.push((cache_keys[index].clone(), flat_text(&mapper, &record)?));
            results[index] = Some(record);
        }

        self.populate(&populate).await?;
        Ok(results)
    }

    /// Write entries to the cache. With a TTL configured every entry is set
    /// individually, concurrently, so the TTL applies.
    async fn populate(&self, entries: &[(String, String)]) -> KindResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        match self.config.cache_ttl {
            None => self.cache.mset(entries).await,
            Some(ttl) => {
                try_join_all(
                    entries
                        .iter()
                        .map(|(key, text)| self.cache.set(key, text, Some(ttl))),
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Decode a cached flat record. Unreadable entries count as misses.
    fn decode_cached<T: Entity>(&self, key: &Key, text: &str) -> Option<T> {
        let decoded: KindResult<T> = serde_json::from_str::<Json>(text)
            .map_err(|e| {
                KindError::from(MappingError::Deserialization {
                    type_name: T::type_name().to_string(),
                    reason: e.to_string(),
                })
            })
            .and_then(|flat| self.mapper().from_flat::<T>(&flat));

        match decoded {
            Ok(mut record) => {
                if record.key().is_none() {
                    *record.key_mut() = Some(key.clone());
                }
                Some(record)
            }
            Err(error) => {
                warn!(%key, %error, "discarding unreadable cache entry");
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Save a record and invalidate its cache entry.
    ///
    /// The record's key is an in/out parameter: an incomplete key receives
    /// the id the store allocated. The final key is also returned.
    pub async fn save<T: Entity>(&self, record: &mut T) -> KindResult<Key> {
        let mut keys = self.save_multi(std::slice::from_mut(record)).await?;
        keys.pop()
            .ok_or_else(|| StorageError::Backend {
                reason: "store returned no key for a saved record".to_string(),
            }.into())
    }

    /// Save records in one store call, then invalidate all their cache
    /// entries. Every record must carry a key; nothing is written otherwise.
    pub async fn save_multi<T: Entity>(&self, records: &mut [T]) -> KindResult<Vec<Key>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mapper = self.mapper();
        let wires = records
            .iter()
            .map(|record| mapper.to_store(record))
            .collect::<KindResult<Vec<WireEntity>>>()?;

        let saved = self.store.save(wires, self.transaction.as_ref()).await?;
        if saved.len() != records.len() {
            return Err(StorageError::Backend {
                reason: format!(
                    "store returned {} keys for {} records",
                    saved.len(),
                    records.len()
                ),
            }
            .into());
        }

        let mut keys = Vec::with_capacity(records.len());
        for (record, store_key) in records.iter_mut().zip(&saved) {
            if let (Some(key), Some(Ident::Id(id))) = (record.key_mut().as_mut(), store_key.ident()) {
                if !key.is_complete() {
                    key.assign_id(*id);
                }
            }
            keys.push(Key::from_store_key(store_key));
        }

        self.invalidate(self.cache_keys(&keys)?).await?;
        debug!(count = keys.len(), "saved records");
        Ok(keys)
    }

    pub async fn delete(&self, key: &Key) -> KindResult<()> {
        self.delete_multi(std::slice::from_ref(key)).await
    }

    /// Delete records from the store, then invalidate their cache entries.
    pub async fn delete_multi(&self, keys: &[Key]) -> KindResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            require_complete(key)?;
        }
        let cache_keys = self.cache_keys(keys)?;
        let store_keys: Vec<StoreKey> = keys.iter().map(Key::to_store_key).collect();
        self.store
            .delete(&store_keys, self.transaction.as_ref())
            .await?;
        self.invalidate(cache_keys).await?;
        debug!(count = keys.len(), "deleted records");
        Ok(())
    }

    /// Reserve `count` ids of `kind` from the store.
    pub async fn allocate_ids(&self, kind: &str, count: usize) -> KindResult<Vec<Key>> {
        let template = Key::incomplete_key(kind).to_store_key();
        let allocated = self.store.allocate_ids(&template, count).await?;
        Ok(allocated.iter().map(Key::from_store_key).collect())
    }

    async fn invalidate(&self, cache_keys: Vec<String>) -> KindResult<()> {
        if cache_keys.is_empty() {
            return Ok(());
        }
        if self.in_transaction()
            && self.config.transaction_cache_policy == TransactionCachePolicy::DeferUntilCommit
        {
            let mut deferred = self.deferred.lock().map_err(|_| CacheError::LockPoisoned)?;
            debug!(count = cache_keys.len(), "deferring cache invalidation until commit");
            deferred.extend(cache_keys);
            return Ok(());
        }
        match cache_keys.as_slice() {
            [single] => self.cache.del(single).await,
            _ => self.cache.mdel(&cache_keys).await,
        }
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Run `f` inside a store transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics. A panic surfaces as
    /// [`TransactionError::Panicked`].
    pub async fn run_in_transaction<F, Fut, R>(&self, f: F) -> KindResult<R>
    where
        F: FnOnce(DataClient<S, C>) -> Fut,
        Fut: Future<Output = KindResult<R>>,
    {
        if self.in_transaction() {
            return Err(TransactionError::Nested.into());
        }

        let handle = self.store.begin_transaction().await?;
        let deferred = Arc::new(Mutex::new(Vec::new()));
        let scoped = Self {
            transaction: Some(handle),
            deferred: Arc::clone(&deferred),
            ..self.clone()
        };

        let outcome = AssertUnwindSafe(async move { f(scoped).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(TransactionError::Panicked {
                    message: panic_message(payload.as_ref()),
                }
                .into())
            });

        let pending = deferred.lock().map(|mut keys| std::mem::take(&mut *keys)).ok();
        let Some(pending) = pending else {
            if let Err(rollback_error) = self.store.rollback(&handle).await {
                warn!(transaction = %handle, %rollback_error, "rollback failed");
            }
            warn!(transaction = %handle, "deferred invalidation buffer poisoned, transaction rolled back");
            return Err(CacheError::LockPoisoned.into());
        };

        match outcome {
            Ok(value) => {
                if let Err(error) = self.store.commit(&handle).await {
                    if !pending.is_empty() {
                        warn!(transaction = %handle, count = pending.len(), "discarding deferred cache invalidations");
                    }
                    return Err(error);
                }
                info!(transaction = %handle, "transaction committed");
                if !pending.is_empty() {
                    self.cache.mdel(&pending).await?;
                }
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.store.rollback(&handle).await {
                    warn!(transaction = %handle, %rollback_error, "rollback failed");
                }
                if !pending.is_empty() {
                    warn!(transaction = %handle, count = pending.len(), "discarding deferred cache invalidations");
                }
                info!(transaction = %handle, %error, "transaction rolled back");
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Run a query and map every result to `T`. Never touches the cache.
    pub async fn run_query<T: Entity>(
        &self,
        query: Query,
        max_results: Option<usize>,
        start_cursor: Option<String>,
    ) -> KindResult<QueryPage<T>> {
        let (entities, next_cursor, more) = self.execute(query, max_results, start_cursor).await?;
        let mapper = self.mapper();
        let items = entities
            .iter()
            .map(|wire| mapper.from_store::<T>(wire))
            .collect::<KindResult<Vec<T>>>()?;
        Ok(QueryPage {
            items,
            next_cursor,
            more,
        })
    }

    /// Run a query returning keys only.
    pub async fn run_keys_only_query(
        &self,
        query: Query,
        max_results: Option<usize>,
        start_cursor: Option<String>,
    ) -> KindResult<QueryPage<Key>> {
        let (entities, next_cursor, more) = self
            .execute(query.keys_only(), max_results, start_cursor)
            .await?;
        let items = entities
            .iter()
            .map(|wire| {
                wire.key.as_ref().map(Key::from_store_key).ok_or_else(|| {
                    KindError::from(KeyError::Missing {
                        context: "keys-only query result".to_string(),
                    })
                })
            })
            .collect::<KindResult<Vec<Key>>>()?;
        Ok(QueryPage {
            items,
            next_cursor,
            more,
        })
    }

    async fn execute(
        &self,
        mut query: Query,
        max_results: Option<usize>,
        start_cursor: Option<String>,
    ) -> KindResult<(Vec<WireEntity>, Option<String>, bool)> {
        if let Some(limit) = max_results {
            query.limit = Some(limit);
        }
        if let Some(cursor) = start_cursor {
            query.start_cursor = Some(cursor);
        }
        let results = self
            .store
            .run_query(&query, self.transaction.as_ref())
            .await?;
        let more = max_results.is_some_and(|limit| results.entities.len() == limit);
        debug!(kind = %query.kind, returned = results.entities.len(), more, "query executed");
        Ok((results.entities, results.end_cursor, more))
    }
}

fn require_complete(key: &Key) -> KindResult<()> {
    if key.is_complete() {
        Ok(())
    } else {
        Err(KeyError::Incomplete {
            kind: key.kind.clone(),
        }
        .into())
    }
}

fn flat_text<T: Entity>(mapper: &EntityMapper<'_>, record: &T) -> KindResult<String> {
    let flat = mapper.to_flat(record)?;
    serde_json::to_string(&flat).map_err(|e| {
        MappingError::Serialization {
            type_name: T::type_name().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheClient, NoCacheClient};
    use crate::store::{MemoryStore, QueryResults};
    use kindcache_core::{Field, KeyCodec};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Key>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    }

    impl Entity for Note {
        fn key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn key_mut(&mut self) -> &mut Option<Key> {
            &mut self.key
        }
    }

    fn note(key: Option<Key>, title: &str) -> Note {
        Note {
            key,
            title: Some(title.to_string()),
            body: None,
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register::<Note>([Field::scalar("title"), Field::scalar("body").noindex()])
            .build()
            .expect("registry should build")
    }

    fn client(config: ClientConfig) -> DataClient<MemoryStore, MemoryCacheClient> {
        DataClient::new(
            MemoryStore::default(),
            MemoryCacheClient::new(),
            registry(),
            config,
        )
        .expect("client should build")
    }

    #[tokio::test]
    async fn test_get_populates_cache() {
        let client = client(ClientConfig::default());
        let key = Key::name_key("Note", "a");
        client.save(&mut note(Some(key.clone()), "first")).await.unwrap();

        let cache_key = client.cache_key(&key).unwrap();
        assert!(cache_key.starts_with(CACHE_KEY_PREFIX));
        assert!(!client.cache().contains(&cache_key));

        let fetched: Note = client.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("first"));
        assert!(client.cache().contains(&cache_key));

        let again: Note = client.get(&key).await.unwrap().unwrap();
        assert_eq!(again, fetched);
        assert_eq!(client.store().statistics().get_calls, 1);
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_invalidates() {
        let client = client(ClientConfig::default());
        let mut record = note(Some(Key::incomplete_key("Note")), "draft");
        let key = client.save(&mut record).await.unwrap();

        assert!(key.is_complete());
        assert_eq!(record.key.as_ref(), Some(&key));
        assert!(record.key.as_ref().unwrap().id.is_some());

        let _: Option<Note> = client.get(&key).await.unwrap();
        let cache_key = client.cache_key(&key).unwrap();
        assert!(client.cache().contains(&cache_key));

        record.title = Some("final".to_string());
        client.save(&mut record).await.unwrap();
        assert!(!client.cache().contains(&cache_key));
    }

    #[tokio::test]
    async fn test_save_without_key_writes_nothing() {
        let client = client(ClientConfig::default());
        let err = client.save(&mut note(None, "orphan")).await.unwrap_err();
        assert!(err.is_missing_key());
        assert!(client.store().is_empty());
        assert!(client.cache().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_key_rejected_for_reads() {
        let client = client(ClientConfig::default());
        let err = client
            .get::<Note>(&Key::incomplete_key("Note"))
            .await
            .unwrap_err();
        assert!(matches!(err, KindError::Key(KeyError::Incomplete { .. })));
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_falls_back_to_store() {
        let client = client(ClientConfig::default());
        let key = Key::name_key("Note", "x");
        client.save(&mut note(Some(key.clone()), "stored")).await.unwrap();
        let cache_key = client.cache_key(&key).unwrap();
        client.cache().set(&cache_key, "not json", None).await.unwrap();

        let fetched: Note = client.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn test_allocate_ids() {
        let client = client(ClientConfig::default());
        let keys = client.allocate_ids("Note", 3).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.kind == "Note" && k.id.is_some()));
    }

    #[tokio::test]
    async fn test_nested_transaction_rejected() {
        let client = client(ClientConfig::default());
        let err = client
            .run_in_transaction(|tx| async move {
                tx.run_in_transaction(|_| async { Ok(()) }).await
            })
            .await
            .unwrap_err();
        assert_eq!(err, KindError::Transaction(TransactionError::Nested));
        assert_eq!(client.store().statistics().open_transactions, 0);
    }

    #[tokio::test]
    async fn test_poisoned_deferred_buffer_rolls_back() {
        let client = client(ClientConfig::default());
        let err = client
            .run_in_transaction(|tx| async move {
                tx.save(&mut note(Some(Key::name_key("Note", "p")), "pending"))
                    .await?;
                let buffer = Arc::clone(&tx.deferred);
                let _ = std::thread::spawn(move || {
                    let _guard = buffer.lock().unwrap();
                    panic!("poison the deferred buffer");
                })
                .join();
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err, KindError::Cache(CacheError::LockPoisoned));
        assert!(client.store().is_empty());
        assert_eq!(client.store().statistics().open_transactions, 0);
    }

    /// Store whose multi-get drops the last slot.
    struct ShortStore(MemoryStore);

    impl KeyCodec for ShortStore {
        fn encode_key(&self, key: &StoreKey, location_prefix: Option<&str>) -> KindResult<String> {
            self.0.encode_key(key, location_prefix)
        }

        fn decode_key(&self, encoded: &str) -> KindResult<StoreKey> {
            self.0.decode_key(encoded)
        }
    }

    #[async_trait::async_trait]
    impl Store for ShortStore {
        async fn get(
            &self,
            key: &StoreKey,
            tx: Option<&TransactionHandle>,
        ) -> KindResult<Option<WireEntity>> {
            self.0.get(key, tx).await
        }

        async fn get_multi(
            &self,
            keys: &[StoreKey],
            tx: Option<&TransactionHandle>,
        ) -> KindResult<Vec<Option<WireEntity>>> {
            let mut slots = self.0.get_multi(keys, tx).await?;
            slots.pop();
            Ok(slots)
        }

        async fn save(
            &self,
            entities: Vec<WireEntity>,
            tx: Option<&TransactionHandle>,
        ) -> KindResult<Vec<StoreKey>> {
            self.0.save(entities, tx).await
        }

        async fn delete(&self, keys: &[StoreKey], tx: Option<&TransactionHandle>) -> KindResult<()> {
            self.0.delete(keys, tx).await
        }

        async fn allocate_ids(&self, incomplete: &StoreKey, count: usize) -> KindResult<Vec<StoreKey>> {
            self.0.allocate_ids(incomplete, count).await
        }

        async fn run_query(
            &self,
            query: &Query,
            tx: Option<&TransactionHandle>,
        ) -> KindResult<QueryResults> {
            self.0.run_query(query, tx).await
        }

        async fn begin_transaction(&self) -> KindResult<TransactionHandle> {
            self.0.begin_transaction().await
        }

        async fn commit(&self, tx: &TransactionHandle) -> KindResult<()> {
            self.0.commit(tx).await
        }

        async fn rollback(&self, tx: &TransactionHandle) -> KindResult<()> {
            self.0.rollback(tx).await
        }
    }

    #[tokio::test]
    async fn test_get_multi_rejects_short_store_reply() {
        let client: DataClient<ShortStore, NoCacheClient> = DataClient::new(
            ShortStore(MemoryStore::default()),
            NoCacheClient::new(),
            registry(),
            ClientConfig::default(),
        )
        .unwrap();
        let a = Key::name_key("Note", "a");
        let b = Key::name_key("Note", "b");
        client
            .save_multi(&mut [note(Some(a.clone()), "a"), note(Some(b.clone()), "b")])
            .await
            .unwrap();

        let err = client.get_multi::<Note>(&[a, b]).await.unwrap_err();
        assert!(matches!(err, KindError::Storage(StorageError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_no_cache_client_always_reads_store() {
        let client: DataClient<MemoryStore, NoCacheClient> = DataClient::new(
            MemoryStore::default(),
            NoCacheClient::new(),
            registry(),
            ClientConfig::default(),
        )
        .unwrap();
        let key = Key::id_key("Note", 7);
        client.save(&mut note(Some(key.clone()), "n")).await.unwrap();
        let _: Option<Note> = client.get(&key).await.unwrap();
        let _: Option<Note> = client.get(&key).await.unwrap();
        assert_eq!(client.store().statistics().get_calls, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = DataClient::<MemoryStore, NoCacheClient>::new(
            MemoryStore::default(),
            NoCacheClient::new(),
            registry(),
            ClientConfig::default().with_key_location_prefix(""),
        );
        assert!(matches!(result, Err(KindError::Config(_))));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
