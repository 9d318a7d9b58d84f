//! KINDCACHE Test Utilities
//!
//! Shared test infrastructure for the KINDCACHE workspace:
//! - Registered fixture record types and their schema registry
//! - Proptest generators for keys and records
//! - Data client construction over the in-memory collaborators
//! - Tracing initialisation and custom assertions

pub use kindcache_core::{
    ClientConfig, Entity, Field, GeoPt, Key, KindError, KindResult, SchemaRegistry,
    TransactionCachePolicy,
};
pub use kindcache_storage::{MemoryCacheClient, MemoryDataClient, MemoryStore, StoreConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project id of the store used by [`memory_client`].
pub const TEST_PROJECT_ID: &str = "kindcache-test";

// ============================================================================
// FIXTURE RECORD TYPES
// ============================================================================

/// Implements [`Entity`] for a record whose key lives in a `key` field.
macro_rules! keyed_entity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Entity for $ty {
                fn key(&self) -> Option<&Key> {
                    self.key.as_ref()
                }

                fn key_mut(&mut self) -> &mut Option<Key> {
                    &mut self.key
                }
            }
        )+
    };
}

/// Flat record used for CRUD, pagination and transaction tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

/// Record exercising every field kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<GeoPt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Record with a noindex scalar and a noindex nested array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<i64>,
}

/// Record whose older rows were written in the legacy dotted layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phones: Option<Vec<Phone>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

keyed_entity!(Counter, Profile, Address, Document, Item, Contact, Info, Phone);

/// Build the registry holding every fixture type.
pub fn fixture_registry() -> KindResult<SchemaRegistry> {
    SchemaRegistry::builder()
        .register::<Counter>([Field::scalar("label"), Field::scalar("value")])
        .register::<Profile>([
            Field::scalar("name"),
            Field::scalar("bio").noindex(),
            Field::double("score"),
            Field::timestamp("joined"),
            Field::key("manager"),
            Field::geo_point("home"),
            Field::scalar("tags").array(),
            Field::record::<Address>("address"),
        ])
        .register::<Address>([Field::scalar("street"), Field::scalar("city")])
        .register::<Document>([
            Field::scalar("text").noindex(),
            Field::record_array::<Item>("items").noindex(),
        ])
        .register::<Item>([Field::scalar("v").noindex()])
        .register::<Contact>([
            Field::record::<Info>("info"),
            Field::record_array::<Phone>("phones"),
        ])
        .register::<Info>([Field::scalar("text"), Field::scalar("number")])
        .register::<Phone>([Field::scalar("label"), Field::scalar("number")])
        .build()
}

// ============================================================================
// CLIENT CONSTRUCTION
// ============================================================================

/// Data client over a fresh in-memory store and cache.
pub fn memory_client(config: ClientConfig) -> KindResult<MemoryDataClient> {
    let store = MemoryStore::new(StoreConfig::default().with_project_id(TEST_PROJECT_ID));
    MemoryDataClient::new(store, MemoryCacheClient::new(), fixture_registry()?, config)
}

/// Install a test-friendly tracing subscriber. Honours `RUST_LOG` and is
/// safe to call from every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and fixture records.

    use super::*;
    use proptest::prelude::*;

    /// Generate a kind name.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{1,8}"
    }

    /// Generate a complete leaf key, either id- or name-based.
    pub fn arb_leaf_key(kind: &'static str) -> impl Strategy<Value = Key> {
        prop_oneof![
            (1i64..i64::MAX).prop_map(move |id| Key::id_key(kind, id)),
            "[a-z0-9_-]{1,16}".prop_map(move |name| Key::name_key(kind, name)),
        ]
    }

    /// Generate a complete key with an optional parent and namespace.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            (arb_kind(), any::<i64>()).prop_map(|(kind, id)| Key::id_key(kind, id)),
            (arb_kind(), "[a-z0-9]{1,12}").prop_map(|(kind, name)| Key::name_key(kind, name)),
        ];
        (
            leaf,
            proptest::option::of((arb_kind(), "[a-z]{1,8}")),
            proptest::option::of("[a-z]{1,6}"),
        )
            .prop_map(|(key, parent, namespace)| {
                let key = match parent {
                    Some((kind, name)) => key.with_parent(Key::name_key(kind, name)),
                    None => key,
                };
                match namespace {
                    Some(ns) => key.with_namespace(ns),
                    None => key,
                }
            })
    }

    /// Generate a keyed counter.
    pub fn arb_counter() -> impl Strategy<Value = Counter> {
        (
            arb_leaf_key("Counter"),
            proptest::option::of("[ -~]{0,24}"),
            proptest::option::of(any::<i64>()),
        )
            .prop_map(|(key, label, value)| Counter {
                key: Some(key),
                label,
                value,
            })
    }

    /// Generate a timestamp with millisecond precision.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800_000).prop_filter_map("in range", DateTime::from_timestamp_millis)
    }

    fn arb_address() -> impl Strategy<Value = Address> {
        (
            proptest::option::of("[A-Za-z ]{1,16}"),
            proptest::option::of("[A-Za-z]{1,12}"),
        )
            .prop_map(|(street, city)| Address {
                key: None,
                street,
                city,
            })
    }

    /// Generate a keyed profile touching every field kind.
    pub fn arb_profile() -> impl Strategy<Value = Profile> {
        (
            arb_leaf_key("Profile"),
            proptest::option::of("[ -~]{0,24}"),
            proptest::option::of("[ -~]{0,64}"),
            proptest::option::of(-1.0e6f64..1.0e6),
            proptest::option::of(arb_timestamp()),
            proptest::option::of(arb_key()),
            proptest::option::of((-90.0f64..90.0, -180.0f64..180.0)),
            proptest::option::of(proptest::collection::vec("[a-z]{1,8}", 0..4)),
            proptest::option::of(arb_address()),
        )
            .prop_map(
                |(key, name, bio, score, joined, manager, home, tags, address)| Profile {
                    key: Some(key),
                    name,
                    bio,
                    score,
                    joined,
                    manager,
                    home: home.map(|(lat, lng)| GeoPt::new(lat, lng)),
                    tags,
                    address,
                },
            )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for KINDCACHE error categories.

    use super::*;

    /// Assert that a result failed because a record or wire entity had no key.
    pub fn assert_missing_key<T: std::fmt::Debug>(result: &KindResult<T>) {
        match result {
            Err(e) if e.is_missing_key() => {}
            other => panic!("Expected missing key error, got {:?}", other),
        }
    }

    /// Assert that a result failed to decode an opaque key.
    pub fn assert_decode_error<T: std::fmt::Debug>(result: &KindResult<T>) {
        match result {
            Err(e) if e.is_decode_error() => {}
            other => panic!("Expected key decode error, got {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
