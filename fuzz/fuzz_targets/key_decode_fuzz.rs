//! Fuzz test for the opaque key decoder
//!
//! Feeds arbitrary strings to the url-safe key codec to find panics in the
//! base64 and reference parsing paths.
//!
//! Run with: cargo +nightly fuzz run key_decode_fuzz -- -max_total_time=60

#![no_main]

use kindcache_core::{Key, KeyCodec, LegacyKeyCodec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let codec = LegacyKeyCodec::new("fuzz-app");

    // Decoding never panics; whatever decodes must re-encode and decode to
    // the same key.
    if let Ok(store_key) = codec.decode_key(input) {
        let key = Key::from_store_key(&store_key);
        if let Ok(encoded) = codec.encode_key(&store_key, None) {
            let again = Key::decode(&codec, &encoded).expect("re-encoded key must decode");
            assert_eq!(again, key, "decode(encode(k)) must equal k");
        }
    }
});
