//! Hierarchical entity keys.
//!
//! A [`Key`] is the application-facing identity of a record: a kind, at most
//! one of a numeric id or a string name, an optional namespace and an
//! optional parent key. [`StoreKey`] is the flattened form handed to the
//! store collaborator.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::codec::KeyCodec;
use crate::{KindResult, MappingError};

// ============================================================================
// STORE KEY
// ============================================================================

/// Identifier of a single path element.
///
/// Ordering places numeric ids before string names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ident {
    Id(i64),
    Name(String),
}

/// One `(kind, identifier)` step of a key path. A missing identifier marks
/// an incomplete leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub ident: Option<Ident>,
}

impl PathElement {
    pub fn new(kind: impl Into<String>, ident: Option<Ident>) -> Self {
        Self {
            kind: kind.into(),
            ident,
        }
    }
}

/// Store-native key: namespace plus the full ancestor path, root first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    pub namespace: Option<String>,
    pub path: Vec<PathElement>,
}

impl StoreKey {
    pub fn new(namespace: Option<String>, path: Vec<PathElement>) -> Self {
        Self { namespace, path }
    }

    /// Kind of the leaf element.
    pub fn kind(&self) -> &str {
        self.path.last().map(|e| e.kind.as_str()).unwrap_or("")
    }

    /// Identifier of the leaf element, if any.
    pub fn ident(&self) -> Option<&Ident> {
        self.path.last().and_then(|e| e.ident.as_ref())
    }

    /// Every element carries an identifier.
    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && self.path.iter().all(|e| e.ident.is_some())
    }

    /// Key of the immediate parent, if the path has more than one element.
    pub fn parent(&self) -> Option<StoreKey> {
        if self.path.len() < 2 {
            return None;
        }
        Some(StoreKey {
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Whether `ancestor` is a strict prefix of this key in the same namespace.
    pub fn has_ancestor(&self, ancestor: &StoreKey) -> bool {
        self.namespace == ancestor.namespace
            && ancestor.path.len() < self.path.len()
            && self.path[..ancestor.path.len()] == ancestor.path[..]
    }

    /// Copy of this key with the leaf identifier replaced by a numeric id.
    pub fn with_id(&self, id: i64) -> StoreKey {
        let mut key = self.clone();
        if let Some(leaf) = key.path.last_mut() {
            leaf.ident = Some(Ident::Id(id));
        }
        key
    }
}

// ============================================================================
// APPLICATION KEY
// ============================================================================

/// Token of a key path: kinds and names are strings, ids are integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    Str(String),
    Int(i64),
}

/// Application-facing entity key.
///
/// Two keys are equal when their paths and namespaces are equal. Ancestor
/// namespaces do not take part in the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Key>>,
}

impl Key {
    /// Build a key from its parts. When both `id` and `name` are given the
    /// id wins.
    pub fn new(
        kind: impl Into<String>,
        id: Option<i64>,
        name: Option<String>,
        namespace: Option<String>,
        parent: Option<Key>,
    ) -> Self {
        let name = if id.is_some() { None } else { name };
        Self {
            kind: kind.into(),
            id,
            name,
            namespace,
            parent: parent.map(Box::new),
        }
    }

    /// Key identified by a string name.
    pub fn name_key(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, None, Some(name.into()), None, None)
    }

    /// Key identified by a numeric id.
    pub fn id_key(kind: impl Into<String>, id: i64) -> Self {
        Self::new(kind, Some(id), None, None, None)
    }

    /// Key whose id will be assigned by the store on save.
    pub fn incomplete_key(kind: impl Into<String>) -> Self {
        Self::new(kind, None, None, None, None)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Leaf identifier present.
    pub fn is_complete(&self) -> bool {
        self.id.is_some() || self.name.is_some()
    }

    /// Record the store-assigned id on an incomplete key.
    pub fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
        self.name = None;
    }

    /// Alternating kind and identifier tokens from the root ancestor down.
    /// An incomplete leaf contributes only its kind.
    pub fn path(&self) -> Vec<PathToken> {
        let mut tokens = match &self.parent {
            Some(parent) => parent.path(),
            None => Vec::new(),
        };
        tokens.push(PathToken::Str(self.kind.clone()));
        if let Some(id) = self.id {
            tokens.push(PathToken::Int(id));
        } else if let Some(name) = &self.name {
            tokens.push(PathToken::Str(name.clone()));
        }
        tokens
    }

    fn ident(&self) -> Option<Ident> {
        match (self.id, &self.name) {
            (Some(id), _) => Some(Ident::Id(id)),
            (None, Some(name)) => Some(Ident::Name(name.clone())),
            (None, None) => None,
        }
    }

    /// Convert to the store-native form. The namespace of this key applies to
    /// the whole path.
    pub fn to_store_key(&self) -> StoreKey {
        let mut path = Vec::new();
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            chain.push(key);
            current = key.parent.as_deref();
        }
        for key in chain.into_iter().rev() {
            path.push(PathElement::new(key.kind.clone(), key.ident()));
        }
        StoreKey {
            namespace: self.namespace.clone(),
            path,
        }
    }

    /// Rebuild an application key from the store-native form. Every ancestor
    /// inherits the key's namespace.
    pub fn from_store_key(store_key: &StoreKey) -> Self {
        let mut parent: Option<Key> = None;
        for element in &store_key.path {
            let (id, name) = match &element.ident {
                Some(Ident::Id(id)) => (Some(*id), None),
                Some(Ident::Name(name)) => (None, Some(name.clone())),
                None => (None, None),
            };
            parent = Some(Key::new(
                element.kind.clone(),
                id,
                name,
                store_key.namespace.clone(),
                parent,
            ));
        }
        parent.unwrap_or_else(|| Key::incomplete_key(String::new()))
    }

    /// Encode to the opaque url-safe string form.
    pub fn encode(&self, codec: &dyn KeyCodec, location_prefix: Option<&str>) -> KindResult<String> {
        codec.encode_key(&self.to_store_key(), location_prefix)
    }

    /// Decode from the opaque url-safe string form.
    pub fn decode(codec: &dyn KeyCodec, encoded: &str) -> KindResult<Self> {
        let store_key = codec.decode_key(encoded)?;
        Ok(Self::from_store_key(&store_key))
    }

    /// Plain JSON form: `{kind, id?, name?, namespace?, parent?}`.
    pub fn to_plain(&self) -> KindResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            MappingError::Serialization {
                type_name: "Key".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_plain(plain: &serde_json::Value) -> KindResult<Self> {
        Self::deserialize(plain).map_err(|e| {
            MappingError::Deserialization {
                type_name: "Key".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.path() == other.path()
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.path().hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "[{}]", ns)?;
        }
        for (i, element) in self.to_store_key().path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match &element.ident {
                Some(Ident::Id(id)) => write!(f, "{}:{}", element.kind, id)?,
                Some(Ident::Name(name)) => write!(f, "{}:{:?}", element.kind, name)?,
                None => write!(f, "{}:?", element.kind)?,
            }
        }
        Ok(())
    }
}

impl From<&Key> for StoreKey {
    fn from(key: &Key) -> Self {
        key.to_store_key()
    }
}

impl From<&StoreKey> for Key {
    fn from(store_key: &StoreKey) -> Self {
        Key::from_store_key(store_key)
    }
}

// ============================================================================
// TESTS
// ============================================================================
