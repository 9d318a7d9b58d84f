//! Entity mapping engine.
//!
//! Records travel through their serde JSON form; the schema registry decides
//! how each declared field is converted. Three representations exist:
//!
//! - the record itself,
//! - the store form ([`WireEntity`]) with typed [`Value`]s,
//! - the flat form: plain JSON with keys as encoded strings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Number, Value as Json};

use crate::codec::KeyCodec;
use crate::entity::{Entity, KEY_FIELD};
use crate::key::Key;
use crate::legacy;
use crate::schema::{Coercion, Field, FieldKind, Schema, SchemaRegistry, WrapperKind};
use crate::value::{FieldMap, GeoPt, Value, WireEntity};
use crate::{KeyError, KindResult, MappingError};

type JsonMap = Map<String, Json>;

/// Converts records of registered types between their representations.
#[derive(Clone, Copy)]
pub struct EntityMapper<'a> {
    registry: &'a SchemaRegistry,
    codec: &'a dyn KeyCodec,
    location_prefix: Option<&'a str>,
}

impl<'a> EntityMapper<'a> {
    pub fn new(registry: &'a SchemaRegistry, codec: &'a dyn KeyCodec) -> Self {
        Self {
            registry,
            codec,
            location_prefix: None,
        }
    }

    /// Location prefix used when encoding keys for the flat form.
    pub fn with_location_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.location_prefix = prefix;
        self
    }

    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    // ------------------------------------------------------------------------
    // Store form
    // ------------------------------------------------------------------------

    /// Convert a record to its store form. The record must carry a key.
    pub fn to_store<T: Entity>(&self, record: &T) -> KindResult<WireEntity> {
        let schema = self.registry.schema::<T>()?;
        let key = record.key().ok_or_else(|| missing_key(schema))?;
        let tree = to_object(record, schema)?;
        let fields = self.store_fields(schema, &tree, false)?;

        Ok(WireEntity {
            key: Some(key.to_store_key()),
            fields,
            no_index_field_paths: schema.no_index_paths().to_vec(),
        })
    }

    /// Build a record from its store form, regrouping legacy dotted fields
    /// first when present.
    pub fn from_store<T: Entity>(&self, entity: &WireEntity) -> KindResult<T> {
        let schema = self.registry.schema::<T>()?;
        let key = entity.key.as_ref().ok_or_else(|| missing_key(schema))?;

        let regrouped;
        let fields = if legacy::is_flattened(&entity.fields) {
            tracing::debug!(
                type_name = schema.type_name(),
                "regrouping legacy flattened fields"
            );
            regrouped = legacy::unflatten(self.registry, schema, &entity.fields)?;
            &regrouped
        } else {
            &entity.fields
        };

        let mut tree = self.record_from_store(schema, fields, false)?;
        tree.insert(KEY_FIELD.to_string(), Key::from_store_key(key).to_plain()?);
        from_object(tree, schema)
    }

    fn store_fields(&self, schema: &Schema, tree: &JsonMap, nested: bool) -> KindResult<FieldMap> {
        let mut fields = FieldMap::new();
        if nested {
            if let Some(key) = tree.get(KEY_FIELD).filter(|k| !k.is_null()) {
                fields.insert(
                    KEY_FIELD.to_string(),
                    Value::Key(Key::from_plain(key)?.to_store_key()),
                );
            }
        }
        for field in schema.persisted_fields() {
            match tree.get(field.name()) {
                None | Some(Json::Null) => {}
                Some(json) => {
                    fields.insert(field.external_name().to_string(), self.store_value(field, json)?);
                }
            }
        }
        Ok(fields)
    }

    fn store_value(&self, field: &Field, json: &Json) -> KindResult<Value> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Array(items) => items
                .iter()
                .map(|item| self.store_value(field, item))
                .collect::<KindResult<Vec<_>>>()
                .map(Value::Array),
            _ => match field.kind() {
                FieldKind::Scalar(coercion) => scalar_to_store(field, coercion, json),
                FieldKind::KeyRef => Ok(Value::Key(Key::from_plain(json)?.to_store_key())),
                FieldKind::ValueWrapper(WrapperKind::GeoPoint) => {
                    Ok(Value::GeoPoint(geo_point(field, json)?))
                }
                FieldKind::NestedRecord(nested) | FieldKind::NestedRecordArray(nested) => {
                    let schema = self.registry.nested_schema(nested)?;
                    let tree = expect_object(field, json)?;
                    Ok(Value::Entity(self.store_fields(schema, tree, true)?))
                }
            },
        }
    }

    fn record_from_store(&self, schema: &Schema, fields: &FieldMap, nested: bool) -> KindResult<JsonMap> {
        let mut tree = JsonMap::new();
        if nested {
            if let Some(Value::Key(key)) = fields.get(KEY_FIELD) {
                tree.insert(KEY_FIELD.to_string(), Key::from_store_key(key).to_plain()?);
            }
        }
        for field in schema.persisted_fields() {
            if let Some(value) = fields.get(field.external_name()) {
                tree.insert(field.name().to_string(), self.value_from_store(field, value)?);
            }
        }
        Ok(tree)
    }

    fn value_from_store(&self, field: &Field, value: &Value) -> KindResult<Json> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.value_from_store(field, item))
                .collect::<KindResult<Vec<_>>>()
                .map(Json::Array),
            Value::Entity(fields) => match field.nested_type() {
                Some(nested) => {
                    let schema = self.registry.nested_schema(nested)?;
                    Ok(Json::Object(self.record_from_store(schema, fields, true)?))
                }
                None => value_to_json(value),
            },
            other => value_to_json(other),
        }
    }

    // ------------------------------------------------------------------------
    // Flat form
    // ------------------------------------------------------------------------

    /// Plain JSON form with keys encoded as opaque strings. The record's own
    /// key is included under `key` when present.
    pub fn to_flat<T: Entity>(&self, record: &T) -> KindResult<Json> {
        let schema = self.registry.schema::<T>()?;
        let tree = to_object(record, schema)?;
        Ok(Json::Object(self.flat_fields(schema, &tree)?))
    }

    /// Inverse of [`Self::to_flat`].
    pub fn from_flat<T: Entity>(&self, flat: &Json) -> KindResult<T> {
        let schema = self.registry.schema::<T>()?;
        let object = flat.as_object().ok_or_else(|| MappingError::InvalidValue {
            field: schema.type_name().to_string(),
            reason: "expected a JSON object".to_string(),
        })?;
        let tree = self.fields_from_flat(schema, object)?;
        from_object(tree, schema)
    }

    fn flat_fields(&self, schema: &Schema, tree: &JsonMap) -> KindResult<JsonMap> {
        let mut flat = JsonMap::new();
        if let Some(key) = tree.get(KEY_FIELD).filter(|k| !k.is_null()) {
            flat.insert(KEY_FIELD.to_string(), Json::String(self.encode_plain_key(key)?));
        }
        for field in schema.persisted_fields() {
            match tree.get(field.name()) {
                None | Some(Json::Null) => {}
                Some(json) => {
                    flat.insert(field.external_name().to_string(), self.flat_value(field, json)?);
                }
            }
        }
        Ok(flat)
    }

    fn flat_value(&self, field: &Field, json: &Json) -> KindResult<Json> {
        match json {
            Json::Null => Ok(Json::Null),
            Json::Array(items) => items
                .iter()
                .map(|item| self.flat_value(field, item))
                .collect::<KindResult<Vec<_>>>()
                .map(Json::Array),
            _ => match field.kind() {
                FieldKind::KeyRef => Ok(Json::String(self.encode_plain_key(json)?)),
                FieldKind::ValueWrapper(WrapperKind::GeoPoint) => Ok(geo_point(field, json)?.to_plain()),
                FieldKind::NestedRecord(nested) | FieldKind::NestedRecordArray(nested) => {
                    let schema = self.registry.nested_schema(nested)?;
                    let tree = expect_object(field, json)?;
                    Ok(Json::Object(self.flat_fields(schema, tree)?))
                }
                FieldKind::Scalar(_) => Ok(json.clone()),
            },
        }
    }

    fn fields_from_flat(&self, schema: &Schema, flat: &JsonMap) -> KindResult<JsonMap> {
        let mut tree = JsonMap::new();
        match flat.get(KEY_FIELD) {
            Some(Json::String(encoded)) => {
                tree.insert(KEY_FIELD.to_string(), Key::decode(self.codec, encoded)?.to_plain()?);
            }
            Some(plain @ Json::Object(_)) => {
                tree.insert(KEY_FIELD.to_string(), plain.clone());
            }
            _ => {}
        }
        for field in schema.persisted_fields() {
            if let Some(json) = flat.get(field.external_name()) {
                tree.insert(field.name().to_string(), self.value_from_flat(field, json)?);
            }
        }
        Ok(tree)
    }

    fn value_from_flat(&self, field: &Field, json: &Json) -> KindResult<Json> {
        match json {
            Json::Null => Ok(Json::Null),
            Json::Array(items) => items
                .iter()
                .map(|item| self.value_from_flat(field, item))
                .collect::<KindResult<Vec<_>>>()
                .map(Json::Array),
            _ => match field.kind() {
                FieldKind::KeyRef => match json {
                    Json::String(encoded) => Key::decode(self.codec, encoded)?.to_plain(),
                    other => Ok(other.clone()),
                },
                FieldKind::NestedRecord(nested) | FieldKind::NestedRecordArray(nested) => {
                    let schema = self.registry.nested_schema(nested)?;
                    let flat = expect_object(field, json)?;
                    Ok(Json::Object(self.fields_from_flat(schema, flat)?))
                }
                FieldKind::Scalar(_) | FieldKind::ValueWrapper(_) => Ok(json.clone()),
            },
        }
    }

    fn encode_plain_key(&self, plain: &Json) -> KindResult<String> {
        Key::from_plain(plain)?.encode(self.codec, self.location_prefix)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn missing_key(schema: &Schema) -> crate::KindError {
    KeyError::Missing {
        context: format!("{} record has no key", schema.type_name()),
    }
    .into()
}

fn invalid(field: &Field, reason: impl Into<String>) -> crate::KindError {
    MappingError::InvalidValue {
        field: field.name().to_string(),
        reason: reason.into(),
    }
    .into()
}

fn to_object<T: Entity>(record: &T, schema: &Schema) -> KindResult<JsonMap> {
    let json = serde_json::to_value(record).map_err(|e| MappingError::Serialization {
        type_name: schema.type_name().to_string(),
        reason: e.to_string(),
    })?;
    match json {
        Json::Object(map) => Ok(map),
        other => Err(MappingError::Serialization {
            type_name: schema.type_name().to_string(),
            reason: format!("expected a struct, serialized to {}", other),
        }
        .into()),
    }
}

fn from_object<T: Entity>(tree: JsonMap, schema: &Schema) -> KindResult<T> {
    serde_json::from_value(Json::Object(tree)).map_err(|e| {
        MappingError::Deserialization {
            type_name: schema.type_name().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn expect_object<'j>(field: &Field, json: &'j Json) -> KindResult<&'j JsonMap> {
    json.as_object()
        .ok_or_else(|| invalid(field, format!("expected an object, found {}", json)))
}

fn geo_point(field: &Field, json: &Json) -> KindResult<GeoPt> {
    GeoPt::deserialize(json).map_err(|e| invalid(field, e.to_string()))
}

fn scalar_to_store(field: &Field, coercion: Coercion, json: &Json) -> KindResult<Value> {
    match (coercion, json) {
        (Coercion::Timestamp, Json::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|e| invalid(field, format!("invalid timestamp {:?}: {}", s, e))),
        (Coercion::Timestamp, other) => Err(invalid(
            field,
            format!("expected an RFC 3339 string, found {}", other),
        )),
        (Coercion::Double, Json::Number(n)) => n
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| invalid(field, format!("{} is not representable as a double", n))),
        (_, other) => Ok(json_to_value(other)),
    }
}

/// Untyped conversion for free-form scalar content.
fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        Json::Object(map) => Value::Entity(
            map.iter()
                .map(|(name, value)| (name.clone(), json_to_value(value)))
                .collect(),
        ),
    }
}

fn value_to_json(value: &Value) -> KindResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Double(d) => Number::from_f64(*d).map(Json::Number).unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s.clone()),
        Value::Timestamp(ts) => Json::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Key(key) => Key::from_store_key(key).to_plain()?,
        Value::GeoPoint(point) => point.to_plain(),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect::<KindResult<_>>()?),
        Value::Entity(fields) => Json::Object(
            fields
                .iter()
                .map(|(name, value)| Ok((name.clone(), value_to_json(value)?)))
                .collect::<KindResult<_>>()?,
        ),
    })
}

// ============================================================================
// TESTS
// ============================================================================
