//! Record types persisted through the mapping engine.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::key::Key;

/// Name of the implicit key field every record carries.
pub const KEY_FIELD: &str = "key";

/// Prefix marking a field as never persisted.
pub const PRIVATE_FIELD_PREFIX: char = '_';

/// A record type that can be stored.
///
/// Implementors serialize their key under [`KEY_FIELD`]; all other
/// persisted fields are declared in the [`crate::SchemaRegistry`].
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Article {
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     key: Option<Key>,
///     title: Option<String>,
/// }
///
/// impl Entity for Article {
///     fn key(&self) -> Option<&Key> { self.key.as_ref() }
///     fn key_mut(&mut self) -> &mut Option<Key> { &mut self.key }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn key(&self) -> Option<&Key>;

    fn key_mut(&mut self) -> &mut Option<Key>;

    /// Type name used in diagnostics.
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}
