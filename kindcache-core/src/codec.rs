//! Opaque url-safe key encoding.
//!
//! The legacy codec writes the classic `Reference` protobuf message and
//! base64url-encodes it without padding:
//!
//! ```text
//! Reference {
//!   13: app        (string)
//!   14: path       (message) { 1: Element (group) { 2: type, 3: id, 4: name } }
//!   20: name_space (string)
//! }
//! ```
//!
//! Strings produced here are interchangeable with keys written by other
//! clients of the same store.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use prost::Message;

use crate::key::{Ident, PathElement, StoreKey};
use crate::{KeyError, KindResult};

/// Encodes and decodes store keys to and from opaque strings.
pub trait KeyCodec: Send + Sync {
    /// Encode a key. `location_prefix` is prepended to the application id
    /// (for example `"s~"`).
    fn encode_key(&self, key: &StoreKey, location_prefix: Option<&str>) -> KindResult<String>;

    /// Decode an opaque string back into a key.
    fn decode_key(&self, encoded: &str) -> KindResult<StoreKey>;
}

/// Url-safe alphabet, no padding on output, padding optional on input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ============================================================================
// WIRE MESSAGES
// ============================================================================

#[derive(Clone, PartialEq, Message)]
struct Reference {
    #[prost(string, optional, tag = "13")]
    app: Option<String>,

    #[prost(message, optional, tag = "14")]
    path: Option<Path>,

    #[prost(string, optional, tag = "20")]
    name_space: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
struct Path {
    #[prost(group, repeated, tag = "1")]
    element: Vec<Element>,
}

#[derive(Clone, PartialEq, Message)]
struct Element {
    #[prost(string, optional, tag = "2")]
    kind: Option<String>,

    #[prost(int64, optional, tag = "3")]
    id: Option<i64>,

    #[prost(string, optional, tag = "4")]
    name: Option<String>,
}

impl From<&PathElement> for Element {
    fn from(element: &PathElement) -> Self {
        let (id, name) = match &element.ident {
            Some(Ident::Id(id)) => (Some(*id), None),
            Some(Ident::Name(name)) => (None, Some(name.clone())),
            None => (None, None),
        };
        Self {
            kind: Some(element.kind.clone()),
            id,
            name,
        }
    }
}

impl TryFrom<Element> for PathElement {
    type Error = crate::KindError;

    fn try_from(element: Element) -> KindResult<Self> {
        let kind = element
            .kind
            .ok_or_else(|| decode_error("path element without kind"))?;
        // A name wins over an id when a malformed element carries both.
        let ident = match (element.name, element.id) {
            (Some(name), _) => Some(Ident::Name(name)),
            (None, Some(id)) => Some(Ident::Id(id)),
            (None, None) => None,
        };
        Ok(PathElement::new(kind, ident))
    }
}

fn decode_error(reason: impl Into<String>) -> crate::KindError {
    KeyError::Decode {
        reason: reason.into(),
    }
    .into()
}

// ============================================================================
// LEGACY CODEC
// ============================================================================

/// Legacy `Reference` protobuf codec bound to one application id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyKeyCodec {
    project_id: String,
}

impl LegacyKeyCodec {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Decode and also return the application id carried in the string.
    pub fn decode_reference(&self, encoded: &str) -> KindResult<(String, StoreKey)> {
        let bytes = URL_SAFE_LENIENT
            .decode(encoded.trim())
            .map_err(|e| decode_error(format!("invalid base64: {}", e)))?;
        let reference = Reference::decode(bytes.as_slice())
            .map_err(|e| decode_error(format!("invalid reference: {}", e)))?;

        let app = reference
            .app
            .ok_or_else(|| decode_error("missing application id"))?;
        let path = reference
            .path
            .ok_or_else(|| decode_error("missing key path"))?;
        if path.element.is_empty() {
            return Err(decode_error("empty key path"));
        }
        let path = path
            .element
            .into_iter()
            .map(PathElement::try_from)
            .collect::<KindResult<Vec<_>>>()?;

        Ok((app, StoreKey::new(reference.name_space, path)))
    }
}

impl KeyCodec for LegacyKeyCodec {
    fn encode_key(&self, key: &StoreKey, location_prefix: Option<&str>) -> KindResult<String> {
        if key.path.is_empty() {
            return Err(KeyError::Missing {
                context: "cannot encode a key with an empty path".to_string(),
            }
            .into());
        }

        let reference = Reference {
            app: Some(format!("{}{}", location_prefix.unwrap_or(""), self.project_id)),
            path: Some(Path {
                element: key.path.iter().map(Element::from).collect(),
            }),
            name_space: key.namespace.clone(),
        };

        Ok(URL_SAFE_LENIENT.encode(reference.encode_to_vec()))
    }

    fn decode_key(&self, encoded: &str) -> KindResult<StoreKey> {
        self.decode_reference(encoded).map(|(_, key)| key)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn codec() -> LegacyKeyCodec {
        LegacyKeyCodec::new("demo-app")
    }

    #[test]
    fn test_encoded_key_is_url_safe_without_padding() {
        let key = Key::name_key("Article", "a?b/c+d").to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_encoded_bytes_layout() {
        let key = Key::id_key("A", 1).to_store_key();
        let encoded = LegacyKeyCodec::new("p").encode_key(&key, None).unwrap();
        let bytes = URL_SAFE_LENIENT.decode(encoded).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x6a, 0x01, b'p', // app
                0x72, 0x07, // path, 7 bytes
                0x0b, 0x12, 0x01, b'A', 0x18, 0x01, 0x0c, // element group
            ]
        );
    }

    #[test]
    fn test_roundtrip_with_parent_and_namespace() {
        let key = Key::id_key("Child", 1234567890123)
            .with_parent(Key::name_key("Parent", "a"))
            .with_namespace("tenant");
        let encoded = key.encode(&codec(), Some("s~")).unwrap();

        let (app, decoded) = codec().decode_reference(&encoded).unwrap();
        assert_eq!(app, "s~demo-app");
        assert_eq!(decoded, key.to_store_key());
        assert_eq!(Key::decode(&codec(), &encoded).unwrap(), key);
    }

    #[test]
    fn test_negative_id_roundtrip() {
        let key = Key::id_key("A", -5).to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        assert_eq!(codec().decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_decode_accepts_padding() {
        let key = Key::name_key("Article", "x").to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        let padding = (4 - encoded.len() % 4) % 4;
        let padded = format!("{}{}", encoded, "=".repeat(padding));
        assert_eq!(codec().decode_key(&padded).unwrap(), key);
    }

    #[test]
    fn test_incomplete_key_encodes_kind_only() {
        let key = Key::incomplete_key("Article").to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        let decoded = codec().decode_key(&encoded).unwrap();
        assert!(!decoded.is_complete());
        assert_eq!(decoded.kind(), "Article");
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = codec().decode_key("not base64 !!").unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_rejects_truncated_message() {
        let key = Key::name_key("Article", "x").to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        let mut bytes = URL_SAFE_LENIENT.decode(&encoded).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = codec().decode_key(&URL_SAFE_LENIENT.encode(bytes)).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_rejects_missing_path() {
        let reference = Reference {
            app: Some("demo-app".to_string()),
            path: None,
            name_space: None,
        };
        let err = codec()
            .decode_key(&URL_SAFE_LENIENT.encode(reference.encode_to_vec()))
            .unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_rejects_element_without_kind() {
        let reference = Reference {
            app: Some("demo-app".to_string()),
            path: Some(Path {
                element: vec![Element {
                    kind: None,
                    id: Some(1),
                    name: None,
                }],
            }),
            name_space: None,
        };
        let err = codec()
            .decode_key(&URL_SAFE_LENIENT.encode(reference.encode_to_vec()))
            .unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_rejects_deeply_nested_groups() {
        // app "p" followed by 200k start-group tags for an unknown field
        let mut bytes = vec![0x6a, 0x01, b'p'];
        bytes.extend(std::iter::repeat(0x2b).take(200_000));
        let err = LegacyKeyCodec::new("p")
            .decode_key(&URL_SAFE_LENIENT.encode(bytes))
            .unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_skips_unknown_fields() {
        let key = Key::id_key("A", 9).to_store_key();
        let encoded = codec().encode_key(&key, None).unwrap();
        let mut bytes = URL_SAFE_LENIENT.decode(&encoded).unwrap();
        // database_id (23) is not part of the key
        prost::encoding::string::encode(23, &"db".to_string(), &mut bytes);
        assert_eq!(codec().decode_key(&URL_SAFE_LENIENT.encode(bytes)).unwrap(), key);
    }

    #[test]
    fn test_encode_rejects_empty_path() {
        let err = codec()
            .encode_key(&StoreKey::new(None, Vec::new()), None)
            .unwrap_err();
        assert!(err.is_missing_key());
    }
}
