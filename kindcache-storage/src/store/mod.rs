//! Store collaborator contract.
//!
//! The data client only needs a narrow capability set from the underlying
//! document store: keyed reads and writes, id allocation, whole-query
//! execution with a resumable cursor, transactions and the opaque key codec.

mod memory;

pub use memory::{MemoryStore, StoreConfig, StoreStatistics};

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use kindcache_core::{KeyCodec, KindResult, StoreKey, Value, WireEntity};
use uuid::Uuid;

/// Handle of an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(Uuid);

impl TransactionHandle {
    /// New handle with a time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Capabilities consumed by the data client.
///
/// Every data method takes an optional transaction handle; `None` executes
/// directly against committed state.
#[async_trait]
pub trait Store: KeyCodec + Send + Sync {
    /// Fetch one entity. Incomplete keys are rejected.
    async fn get(
        &self,
        key: &StoreKey,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Option<WireEntity>>;

    /// Fetch many entities. The result has one slot per input key, in order.
    async fn get_multi(
        &self,
        keys: &[StoreKey],
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Vec<Option<WireEntity>>>;

    /// Upsert entities. Returns the final key of every entity in input order;
    /// incomplete keys come back with their allocated id.
    async fn save(
        &self,
        entities: Vec<WireEntity>,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<Vec<StoreKey>>;

    async fn delete(&self, keys: &[StoreKey], tx: Option<&TransactionHandle>) -> KindResult<()>;

    /// Reserve `count` ids for the leaf kind of `incomplete`.
    async fn allocate_ids(&self, incomplete: &StoreKey, count: usize) -> KindResult<Vec<StoreKey>>;

    async fn run_query(
        &self,
        query: &Query,
        tx: Option<&TransactionHandle>,
    ) -> KindResult<QueryResults>;

    async fn begin_transaction(&self) -> KindResult<TransactionHandle>;

    async fn commit(&self, tx: &TransactionHandle) -> KindResult<()>;

    async fn rollback(&self, tx: &TransactionHandle) -> KindResult<()>;
}

// ============================================================================
// QUERIES
// ============================================================================

/// Comparison applied by a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FilterOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Equal => ordering == Ordering::Equal,
            FilterOp::LessThan => ordering == Ordering::Less,
            FilterOp::LessThanOrEqual => ordering != Ordering::Greater,
            FilterOp::GreaterThan => ordering == Ordering::Greater,
            FilterOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

/// Property filter on a stored field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Whether a stored value satisfies this filter. Array values match when
    /// any element does.
    pub fn matches(&self, stored: &Value) -> bool {
        match stored {
            Value::Array(items) => items.iter().any(|item| self.matches(item)),
            other => compare_values(other, &self.value).is_some_and(|o| self.op.accepts(o)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Query over one kind. Without explicit orders results come back in key
/// order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub kind: String,
    pub namespace: Option<String>,
    pub ancestor: Option<StoreKey>,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub limit: Option<usize>,
    pub start_cursor: Option<String>,
    pub keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to the ancestor and its descendants.
    pub fn with_ancestor(mut self, ancestor: StoreKey) -> Self {
        self.namespace = ancestor.namespace.clone();
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_start_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// Result batch of a query execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResults {
    pub entities: Vec<WireEntity>,
    /// Cursor positioned after the last returned entity.
    pub end_cursor: Option<String>,
}

/// Ordering between two stored scalars of the same type. Values of
/// different types are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Integer(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Key(x), Value::Key(y)) => Some(x.cmp(y)),
        (Value::GeoPoint(x), Value::GeoPoint(y)) => (x.latitude, x.longitude).partial_cmp(&(y.latitude, y.longitude)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindcache_core::Key;

    #[test]
    fn test_filter_ops() {
        let eq = Filter {
            field: "n".to_string(),
            op: FilterOp::Equal,
            value: Value::Integer(3),
        };
        assert!(eq.matches(&Value::Integer(3)));
        assert!(!eq.matches(&Value::Integer(4)));
        assert!(!eq.matches(&Value::from("3")));

        let gte = Filter {
            op: FilterOp::GreaterThanOrEqual,
            ..eq.clone()
        };
        assert!(gte.matches(&Value::Integer(3)));
        assert!(gte.matches(&Value::Double(3.5)));
        assert!(!gte.matches(&Value::Integer(2)));
    }

    #[test]
    fn test_filter_matches_any_array_element() {
        let filter = Filter {
            field: "tags".to_string(),
            op: FilterOp::Equal,
            value: Value::from("rust"),
        };
        let stored = Value::Array(vec![Value::from("go"), Value::from("rust")]);
        assert!(filter.matches(&stored));
        assert!(!filter.matches(&Value::Array(Vec::new())));
    }

    #[test]
    fn test_query_builder() {
        let parent = Key::name_key("Parent", "p").with_namespace("ns").to_store_key();
        let query = Query::new("Child")
            .with_ancestor(parent.clone())
            .filter("n", FilterOp::LessThan, 10i64)
            .order_by("n", Direction::Descending)
            .with_limit(5)
            .keys_only();
        assert_eq!(query.kind, "Child");
        assert_eq!(query.namespace.as_deref(), Some("ns"));
        assert_eq!(query.ancestor, Some(parent));
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.orders[0].direction, Direction::Descending);
        assert_eq!(query.limit, Some(5));
        assert!(query.keys_only);
    }

    #[test]
    fn test_transaction_handles_are_unique() {
        let a = TransactionHandle::new();
        let b = TransactionHandle::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("tx-"));
    }
}
