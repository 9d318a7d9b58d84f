//! Store-native values and the entity wire form.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::StoreKey;

/// Geographic point value wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPt {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPt {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Store-native geo point value.
    pub fn to_store(&self) -> Value {
        Value::GeoPoint(*self)
    }

    /// Plain `{latitude, longitude}` object.
    pub fn to_plain(&self) -> serde_json::Value {
        serde_json::json!({
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }

    pub fn from_store(value: &Value) -> Option<Self> {
        match value {
            Value::GeoPoint(point) => Some(*point),
            _ => None,
        }
    }
}

/// Field map of a store entity or embedded entity, keyed by stored name.
pub type FieldMap = BTreeMap<String, Value>;

/// Value understood by the store collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Key(StoreKey),
    GeoPoint(GeoPt),
    Array(Vec<Value>),
    Entity(FieldMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&FieldMap> {
        match self {
            Value::Entity(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Key(_) => "key",
            Value::GeoPoint(_) => "geo_point",
            Value::Array(_) => "array",
            Value::Entity(_) => "entity",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<StoreKey> for Value {
    fn from(v: StoreKey) -> Self {
        Value::Key(v)
    }
}

impl From<GeoPt> for Value {
    fn from(v: GeoPt) -> Self {
        Value::GeoPoint(v)
    }
}

/// Entity in the form exchanged with the store: key, fields and the
/// dotted paths that must not be indexed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireEntity {
    pub key: Option<StoreKey>,
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub no_index_field_paths: Vec<String>,
}

impl WireEntity {
    pub fn new(key: StoreKey, fields: FieldMap) -> Self {
        Self {
            key: Some(key),
            fields,
            no_index_field_paths: Vec::new(),
        }
    }

    pub fn with_no_index(mut self, paths: Vec<String>) -> Self {
        self.no_index_field_paths = paths;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
