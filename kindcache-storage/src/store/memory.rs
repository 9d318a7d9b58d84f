//! In-memory store with transactions, id allocation and paged queries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use kindcache_core::{
    ConfigError, KeyCodec, KeyError, KindResult, LegacyKeyCodec, StorageError, StoreKey,
    WireEntity,
};
use tracing::debug;

use super::{compare_values, Direction, Query, QueryResults, Store, TransactionHandle};

const CURSOR_PREFIX: &str = "offset:";

/// Configuration for [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Application id written into encoded keys.
    pub project_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_id: "kindcache-dev".to_string(),
        }
    }
}

impl StoreConfig {
    /// Load from `KINDCACHE_PROJECT_ID`, defaulting to `kindcache-dev`.
    pub fn from_env() -> Self {
        let project_id = std::env::var("KINDCACHE_PROJECT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "kindcache-dev".to_string());
        Self { project_id }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn validate(&self) -> KindResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "project_id".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Call and size counters for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub entity_count: usize,
    pub open_transactions: usize,
    pub get_calls: u64,
    pub save_calls: u64,
    pub delete_calls: u64,
    pub query_calls: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    gets: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,
}

#[derive(Debug, Clone)]
enum Mutation {
    Put(WireEntity),
    Delete(StoreKey),
}

#[derive(Debug)]
struct StoreState {
    entities: BTreeMap<StoreKey, WireEntity>,
    next_id: i64,
    transactions: HashMap<TransactionHandle, Vec<Mutation>>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
            transactions: HashMap::new(),
        }
    }
}

impl StoreState {
    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_transaction(&self, tx: Option<&TransactionHandle>) -> KindResult<()> {
        match tx {
            Some(handle) if !self.transactions.contains_key(handle) => {
                Err(StorageError::UnknownTransaction {
                    transaction: handle.to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Put(entity) => {
                if let Some(key) = entity.key.clone() {
                    self.entities.insert(key, entity);
                }
            }
            Mutation::Delete(key) => {
                self.entities.remove(&key);
            }
        }
    }
}

/// Process-local store. Entities are kept ordered by key; ids come from a
/// single increasing counter and are assigned at save time, also inside a
/// transaction. Transactions buffer their writes until commit; reads inside
/// a transaction see committed state only.
///
/// Clones share the same underlying data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    codec: LegacyKeyCodec,
    state: Arc<RwLock<StoreState>>,
    counters: Arc<CallCounters>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            codec: LegacyKeyCodec::new(config.project_id),
            state: Arc::new(RwLock::new(StoreState::default())),
            counters: Arc::new(CallCounters::default()),
        }
    }

    fn read(&self) -> KindResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> KindResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StorageError::LockPoisoned.into())
    }

    pub fn project_id(&self) -> &str {
        self.codec.project_id()
    }

    /// Number of committed entities.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.entities.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed entity by key, bypassing call counters.
    pub fn peek(&self, key: &StoreKey) -> Option<WireEntity> {
        self.read().ok().and_then(|s| s.entities.get(key).cloned())
    }

    pub fn statistics(&self) -> StoreStatistics {
        let (entity_count, open_transactions) = self
            .read()
            .map(|s| (s.entities.len(), s.transactions.len()))
            .unwrap_or((0, 0));
        StoreStatistics {
            entity_count,
            open_transactions,
            get_calls: self.counters.gets.load(AtomicOrdering::Relaxed),
            save_calls: self.counters.saves.load(AtomicOrdering::Relaxed),
            delete_calls: self.counters.deletes.load(AtomicOrdering::Relaxed),
            query_calls: self.counters.queries.load(AtomicOrdering::Relaxed),
        }
    }

    /// Remove all entities and open transactions.
    pub fn clear(&self) -> KindResult<()> {
        let mut state = self.write()?;
        state.entities.clear();
        state.transactions.clear();
        Ok(())
    }
}

fn require_complete(key: &StoreKey) -> KindResult<()> {
    if key.is_complete() {
        Ok(())
    } else {
        Err(StorageError::IncompleteKey {
            kind: key.kind().to_string(),
        }
        .into())
    }
}

fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}{}", CURSOR_PREFIX, offset))
}

fn decode_cursor(cursor: &str) -> KindResult<usize> {
    let invalid = |reason: &str| StorageError::InvalidCursor {
        reason: reason.to_string(),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("not base64"))?;
    let text = String::from_utf8(bytes).map_err(|_| invalid("not utf-8"))?;
    let offset = text
        .strip_prefix(CURSOR_PREFIX)
        .ok_or_else(|| invalid("unknown cursor format"))?;
    offset.parse().map_err(|_| invalid("bad offset").into())
}

fn compare_field(a: &WireEntity, b: &WireEntity, field: &str) -> Ordering {
    match (a.fields.get(field), b.fields.get(field)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

impl KeyCodec for MemoryStore {
    fn encode_key(&self, key: &StoreKey, location_prefix: Option<&str>) -> KindResult<String> {
        self.codec.encode_key(key, location_prefix)
    }

    fn decode_key(&self, encoded: &str) -> KindResult<StoreKey> {
        self.codec.decode_key(encoded)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        key: &StoreKey,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Option<WireEntity>> {
        self.counters.gets.fetch_add(1, AtomicOrdering::Relaxed);
        require_complete(key)?;
        let state = self.read()?;
        state.check_transaction(tx)?;
        Ok(state.entities.get(key).cloned())
    }

    async fn get_multi(
        &self,
        keys: &[StoreKey],
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Vec<Option<WireEntity>>> {
        self.counters.gets.fetch_add(1, AtomicOrdering::Relaxed);
        for key in keys {
            require_complete(key)?;
        }
        let state = self.read()?;
        state.check_transaction(tx)?;
        Ok(keys.iter().map(|k| state.entities.get(k).cloned()).collect())
    }

    async fn save(
        &self,
        entities: Vec<WireEntity>,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Vec<StoreKey>> {
        self.counters.saves.fetch_add(1, AtomicOrdering::Relaxed);
        let mut state = self.write()?;
        state.check_transaction(tx)?;

        let mut prepared = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key = entity.key.take().ok_or_else(|| KeyError::Missing {
                context: "entity sent to the store has no key".to_string(),
            })?;
            if let Some(ancestors) = key.parent() {
                require_complete(&ancestors)?;
            }
            prepared.push((key, entity));
        }

        let mut keys = Vec::with_capacity(prepared.len());
        let mut mutations = Vec::with_capacity(prepared.len());
        for (key, mut entity) in prepared {
            let key = if key.is_complete() {
                key
            } else {
                key.with_id(state.allocate())
            };
            entity.key = Some(key.clone());
            keys.push(key);
            mutations.push(Mutation::Put(entity));
        }

        match tx {
            Some(handle) => {
                if let Some(buffer) = state.transactions.get_mut(handle) {
                    buffer.extend(mutations);
                }
            }
            None => mutations.into_iter().for_each(|m| state.apply(m)),
        }

        debug!(count = keys.len(), transactional = tx.is_some(), "store save");
        Ok(keys)
    }

    async fn delete(&self, keys: &[StoreKey], tx: Option<&TransactionHandle>) -> KindResult<()> {
        self.counters.deletes.fetch_add(1, AtomicOrdering::Relaxed);
        for key in keys {
            require_complete(key)?;
        }
        let mut state = self.write()?;
        state.check_transaction(tx)?;

        let mutations = keys.iter().cloned().map(Mutation::Delete);
        match tx {
            Some(handle) => {
                if let Some(buffer) = state.transactions.get_mut(handle) {
                    buffer.extend(mutations);
                }
            }
            None => mutations.for_each(|m| state.apply(m)),
        }
        Ok(())
    }

    async fn allocate_ids(&self, incomplete: &StoreKey, count: usize) -> KindResult<Vec<StoreKey>> {
        if incomplete.path.is_empty() {
            return Err(KeyError::Missing {
                context: "cannot allocate ids without a kind".to_string(),
            }
            .into());
        }
        if let Some(ancestors) = incomplete.parent() {
            require_complete(&ancestors)?;
        }
        let mut state = self.write()?;
        Ok((0..count)
            .map(|_| incomplete.with_id(state.allocate()))
            .collect())
    }

    async fn run_query(
        &self,
        query: &Query,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<QueryResults> {
        self.counters.queries.fetch_add(1, AtomicOrdering::Relaxed);
        let offset = match &query.start_cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };

        let state = self.read()?;
        state.check_transaction(tx)?;

        let mut matched: Vec<&WireEntity> = state
            .entities
            .iter()
            .filter(|(key, _)| {
                key.kind() == query.kind
                    && key.namespace == query.namespace
                    && query
                        .ancestor
                        .as_ref()
                        .map_or(true, |a| *key == a || key.has_ancestor(a))
            })
            .map(|(_, entity)| entity)
            .filter(|entity| {
                query.filters.iter().all(|filter| {
                    entity
                        .fields
                        .get(&filter.field)
                        .is_some_and(|value| filter.matches(value))
                })
            })
            .collect();

        if !query.orders.is_empty() {
            matched.sort_by(|a, b| {
                for order in &query.orders {
                    let ordering = compare_field(a, b, &order.field);
                    let ordering = match order.direction {
                        Direction::Ascending => ordering,
                        Direction::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let entities: Vec<WireEntity> = matched
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|entity| {
                if query.keys_only {
                    WireEntity {
                        key: entity.key.clone(),
                        ..Default::default()
                    }
                } else {
                    entity.clone()
                }
            })
            .collect();

        let end_cursor = Some(encode_cursor(offset + entities.len()));
        debug!(kind = %query.kind, returned = entities.len(), offset, "store query");
        Ok(QueryResults {
            entities,
            end_cursor,
        })
    }

    async fn begin_transaction(&self) -> KindResult<TransactionHandle> {
        let handle = TransactionHandle::new();
        self.write()?.transactions.insert(handle, Vec::new());
        debug!(transaction = %handle, "store transaction opened");
        Ok(handle)
    }

    async fn commit(&self, tx: &TransactionHandle) -> KindResult<()> {
        let mut state = self.write()?;
        let mutations = state
            .transactions
            .remove(tx)
            .ok_or_else(|| StorageError::UnknownTransaction {
                transaction: tx.to_string(),
            })?;
        let count = mutations.len();
        mutations.into_iter().for_each(|m| state.apply(m));
        debug!(transaction = %tx, mutations = count, "store transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: &TransactionHandle) -> KindResult<()> {
        let mut state = self.write()?;
        let discarded = state
            .transactions
            .remove(tx)
            .ok_or_else(|| StorageError::UnknownTransaction {
                transaction: tx.to_string(),
            })?;
        debug!(transaction = %tx, mutations = discarded.len(), "store transaction rolled back");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
