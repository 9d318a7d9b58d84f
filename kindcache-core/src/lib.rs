//! KINDCACHE Core - Keys, Schema Registry and Entity Mapping
//!
//! Typed records for a hierarchical key/value document store. This crate
//! holds everything that does not touch I/O: keys and their opaque
//! encoding, the store-native value model, the schema registry and the
//! mapping engine. The store and cache collaborators live in
//! `kindcache-storage`.

pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod legacy;
pub mod mapping;
pub mod schema;
pub mod value;

pub use codec::{KeyCodec, LegacyKeyCodec};
pub use config::{ClientConfig, TransactionCachePolicy, MAX_CACHE_TTL};
pub use entity::{Entity, KEY_FIELD, PRIVATE_FIELD_PREFIX};
pub use error::{
    CacheError, ConfigError, KeyError, KindError, KindResult, MappingError, SchemaError,
    StorageError, TransactionError,
};
pub use key::{Ident, Key, PathElement, PathToken, StoreKey};
pub use mapping::EntityMapper;
pub use schema::{
    Coercion, Field, FieldKind, NestedType, Schema, SchemaRegistry, SchemaRegistryBuilder, Shape,
    WrapperKind,
};
pub use value::{FieldMap, GeoPt, Value, WireEntity};

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Key>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<Vec<bool>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<Key>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<GeoPt>,
    }

    impl Entity for Reading {
        fn key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn key_mut(&mut self) -> &mut Option<Key> {
            &mut self.key
        }
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register::<Reading>([
                Field::scalar("label").noindex(),
                Field::scalar("count"),
                Field::scalar("flags").array(),
                Field::key("source"),
                Field::geo_point("position"),
            ])
            .build()
            .unwrap()
    }

    fn arb_key() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            ("[A-Z][a-z]{1,8}", any::<i64>()).prop_map(|(kind, id)| Key::id_key(kind, id)),
            ("[A-Z][a-z]{1,8}", "[a-z0-9]{1,12}").prop_map(|(kind, name)| Key::name_key(kind, name)),
        ];
        (leaf, proptest::option::of("[A-Z][a-z]{1,8}"), proptest::option::of("[a-z]{1,6}"))
            .prop_map(|(key, parent_kind, namespace)| {
                let key = match parent_kind {
                    Some(kind) => key.with_parent(Key::name_key(kind, "root")),
                    None => key,
                };
                match namespace {
                    Some(ns) => key.with_namespace(ns),
                    None => key,
                }
            })
    }

    fn arb_reading() -> impl Strategy<Value = Reading> {
        (
            arb_key(),
            proptest::option::of("[ -~]{0,24}"),
            proptest::option::of(any::<i64>()),
            proptest::option::of(proptest::collection::vec(any::<bool>(), 0..4)),
            proptest::option::of(arb_key()),
            proptest::option::of((-90.0f64..90.0, -180.0f64..180.0)),
        )
            .prop_map(|(key, label, count, flags, source, position)| Reading {
                key: Some(key),
                label,
                count,
                flags,
                source,
                position: position.map(|(lat, lng)| GeoPt::new(lat, lng)),
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Keys with the same path and namespace produce the same store key.
        #[test]
        fn prop_equal_keys_equal_store_keys(key in arb_key()) {
            let copy = Key::from_store_key(&key.to_store_key());
            prop_assert_eq!(&copy, &key);
            prop_assert_eq!(copy.to_store_key(), key.to_store_key());
        }

        /// Decoding an encoded key gives back an equal key.
        #[test]
        fn prop_key_encode_decode(key in arb_key()) {
            let codec = LegacyKeyCodec::new("prop-app");
            let encoded = key.encode(&codec, None).unwrap();
            prop_assert_eq!(Key::decode(&codec, &encoded).unwrap(), key);
        }

        /// Store form round trip is field-for-field identity.
        #[test]
        fn prop_store_roundtrip(record in arb_reading()) {
            let registry = registry();
            let codec = LegacyKeyCodec::new("prop-app");
            let mapper = EntityMapper::new(&registry, &codec);
            let wire = mapper.to_store(&record).unwrap();
            let back: Reading = mapper.from_store(&wire).unwrap();
            prop_assert_eq!(back, record);
        }

        /// Flat form round trip is field-for-field identity.
        #[test]
        fn prop_flat_roundtrip(record in arb_reading()) {
            let registry = registry();
            let codec = LegacyKeyCodec::new("prop-app");
            let mapper = EntityMapper::new(&registry, &codec);
            let flat = mapper.to_flat(&record).unwrap();
            let text = serde_json::to_string(&flat).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            let back: Reading = mapper.from_flat(&parsed).unwrap();
            prop_assert_eq!(back, record);
        }
    }
}
