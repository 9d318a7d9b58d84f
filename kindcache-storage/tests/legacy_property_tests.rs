//! Property-Based Tests for Legacy Flattened Records
//!
//! **Property 1: Layout equivalence**
//!
//! A record stored in the legacy dotted layout (`info.text`, `phones.label`)
//! reads back identical to the same record stored with nested entities.
//!
//! **Property 2: Persistence across cache backends**
//!
//! The LMDB-backed cache serves the same records the store holds.

use kindcache_core::{FieldMap, Value, WireEntity};
use kindcache_storage::{DataClient, LmdbCacheClient, MemoryStore, Store, StoreConfig};
use kindcache_test_utils::generators::arb_profile;
use kindcache_test_utils::{
    fixture_registry, init_tracing, memory_client, ClientConfig, Contact, Info, Key, Phone,
    Profile,
};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn legacy_contact(key: &Key, text: &str, number: i64, phones: &[(&str, &str)]) -> WireEntity {
    let mut fields = FieldMap::new();
    fields.insert("info.text".to_string(), Value::from(text));
    fields.insert("info.number".to_string(), Value::Integer(number));
    fields.insert(
        "phones.label".to_string(),
        Value::Array(phones.iter().map(|(label, _)| Value::from(*label)).collect()),
    );
    fields.insert(
        "phones.number".to_string(),
        Value::Array(phones.iter().map(|(_, number)| Value::from(*number)).collect()),
    );
    WireEntity::new(key.to_store_key(), fields)
}

fn modern_contact(key: &Key, text: &str, number: i64, phones: &[(&str, &str)]) -> Contact {
    Contact {
        key: Some(key.clone()),
        info: Some(Info {
            key: None,
            text: Some(text.to_string()),
            number: Some(number),
        }),
        phones: Some(
            phones
                .iter()
                .map(|(label, number)| Phone {
                    key: None,
                    label: Some(label.to_string()),
                    number: Some(number.to_string()),
                })
                .collect(),
        ),
    }
}

fn lmdb_client(dir: &TempDir) -> DataClient<MemoryStore, LmdbCacheClient> {
    init_tracing();
    let cache = LmdbCacheClient::new(dir.path(), 16).expect("lmdb cache should open");
    DataClient::new(
        MemoryStore::new(StoreConfig::default()),
        cache,
        fixture_registry().expect("fixture registry should build"),
        ClientConfig::default(),
    )
    .expect("client should build")
}

// ============================================================================
// LAYOUT EQUIVALENCE
// ============================================================================

#[tokio::test]
async fn test_legacy_and_nested_layouts_read_identically() {
    init_tracing();
    let client = memory_client(ClientConfig::default()).unwrap();
    let phones = [("home", "555-0100"), ("work", "555-0199")];

    let legacy_key = Key::name_key("Contact", "legacy");
    client
        .store()
        .save(vec![legacy_contact(&legacy_key, "x", 5, &phones)], None)
        .await
        .unwrap();

    let modern_key = Key::name_key("Contact", "modern");
    client
        .save(&mut modern_contact(&modern_key, "x", 5, &phones))
        .await
        .unwrap();

    let mut legacy: Contact = client.get(&legacy_key).await.unwrap().unwrap();
    let mut modern: Contact = client.get(&modern_key).await.unwrap().unwrap();
    assert_eq!(legacy.key.take(), Some(legacy_key.clone()));
    assert_eq!(modern.key.take(), Some(modern_key));
    assert_eq!(legacy, modern);

    // The cached copy of a legacy record is in the nested flat form.
    let cached: Contact = client.get(&legacy_key).await.unwrap().unwrap();
    assert_eq!(cached.info, modern.info);
    assert_eq!(client.store().statistics().get_calls, 2);
}

#[tokio::test]
async fn test_resaving_legacy_record_writes_nested_layout() {
    let client = memory_client(ClientConfig::default()).unwrap();
    let key = Key::name_key("Contact", "upgrade");
    client
        .store()
        .save(vec![legacy_contact(&key, "y", 1, &[("cell", "1")])], None)
        .await
        .unwrap();

    let mut record: Contact = client.get(&key).await.unwrap().unwrap();
    client.save(&mut record).await.unwrap();

    let stored = client.store().peek(&key.to_store_key()).unwrap();
    assert!(stored.fields.keys().all(|name| !name.contains('.')));
    assert!(matches!(stored.field("info"), Some(Value::Entity(_))));
    assert!(matches!(stored.field("phones"), Some(Value::Array(items)) if items.len() == 1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// **Property 1: Layout equivalence**
    #[test]
    fn prop_legacy_layout_equivalence(
        text in "[a-z ]{0,16}",
        number in any::<i64>(),
        phones in proptest::collection::vec(("[a-z]{1,6}", "[0-9]{3,10}"), 1..4),
    ) {
        let rt = Runtime::new()
            .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(async {
            let client = memory_client(ClientConfig::default())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let phones: Vec<(&str, &str)> = phones.iter().map(|(l, n)| (l.as_str(), n.as_str())).collect();
            let key = Key::name_key("Contact", "c");

            client
                .store()
                .save(vec![legacy_contact(&key, &text, number, &phones)], None)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let read: Option<Contact> = client
                .get(&key)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(read, Some(modern_contact(&key, &text, number, &phones)));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 2: Persistence across cache backends**
    #[test]
    fn prop_lmdb_cache_serves_saved_records(profile in arb_profile()) {
        let rt = Runtime::new()
            .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))?;
        let dir = TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
        rt.block_on(async {
            let client = lmdb_client(&dir);
            let key = profile.key.clone().ok_or_else(|| TestCaseError::fail("generated without key"))?;
            client
                .save(&mut profile.clone())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let first: Option<Profile> = client.get(&key).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let second: Option<Profile> = client.get(&key).await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(first.as_ref(), Some(&profile));
            prop_assert_eq!(second.as_ref(), Some(&profile));
            prop_assert_eq!(client.store().statistics().get_calls, 1);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
