//! Fuzz test for flat-form record decoding
//!
//! Cache entries are untrusted JSON text. Arbitrary input must be rejected
//! with an error, never a panic.
//!
//! Run with: cargo +nightly fuzz run flat_record_fuzz -- -max_total_time=60

#![no_main]

use kindcache_core::{Entity, EntityMapper, Field, GeoPt, Key, LegacyKeyCodec, SchemaRegistry};
use libfuzzer_sys::fuzz_target;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    at: Option<GeoPt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<Record>>,
}

impl Entity for Record {
    fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }
    fn key_mut(&mut self) -> &mut Option<Key> {
        &mut self.key
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(flat) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let registry = SchemaRegistry::builder()
        .register::<Record>([
            Field::scalar("name"),
            Field::key("owner"),
            Field::geo_point("at"),
            Field::record_array::<Record>("children"),
        ])
        .build()
        .expect("registry builds");
    let codec = LegacyKeyCodec::new("fuzz-app");
    let mapper = EntityMapper::new(&registry, &codec);

    if let Ok(record) = mapper.from_flat::<Record>(&flat) {
        // Anything accepted must convert back to the flat form.
        let _ = mapper.to_flat(&record);
    }
});
