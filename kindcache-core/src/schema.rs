//! Schema registry: per record type field descriptors.
//!
//! Registration is explicit and happens once, before any mapping. The
//! registry is immutable after [`SchemaRegistryBuilder::build`] and is meant
//! to be shared behind an `Arc`.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use crate::entity::{Entity, KEY_FIELD, PRIVATE_FIELD_PREFIX};
use crate::{KindResult, SchemaError};

// ============================================================================
// FIELD DESCRIPTORS
// ============================================================================

/// Conversion applied to a scalar before it is handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coercion {
    #[default]
    None,
    /// Numbers are always stored as doubles.
    Double,
    /// RFC 3339 strings are stored as timestamps.
    Timestamp,
}

/// Single value or array of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shape {
    #[default]
    Single,
    Array,
}

/// Value wrapper types with their own store form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    GeoPoint,
}

/// Reference to a registered record type used as a nested field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedType {
    type_id: TypeId,
    type_name: &'static str,
}

impl NestedType {
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: T::type_name(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// What a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(Coercion),
    KeyRef,
    NestedRecord(NestedType),
    NestedRecordArray(NestedType),
    ValueWrapper(WrapperKind),
}

/// Declared field of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    external_name: Option<String>,
    noindex: bool,
    kind: FieldKind,
    shape: Shape,
}

impl Field {
    fn with_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        let shape = match kind {
            FieldKind::NestedRecordArray(_) => Shape::Array,
            _ => Shape::Single,
        };
        Self {
            name: name.into(),
            external_name: None,
            noindex: false,
            kind,
            shape,
        }
    }

    /// Plain scalar: strings, booleans, numbers, free-form JSON.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Scalar(Coercion::None))
    }

    /// Number always stored as a double.
    pub fn double(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Scalar(Coercion::Double))
    }

    /// RFC 3339 string stored as a timestamp.
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::Scalar(Coercion::Timestamp))
    }

    /// Reference to another entity's key.
    pub fn key(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::KeyRef)
    }

    pub fn geo_point(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::ValueWrapper(WrapperKind::GeoPoint))
    }

    /// Embedded record of a registered type.
    pub fn record<T: Entity>(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::NestedRecord(NestedType::of::<T>()))
    }

    /// Array of embedded records of a registered type.
    pub fn record_array<T: Entity>(name: impl Into<String>) -> Self {
        Self::with_kind(name, FieldKind::NestedRecordArray(NestedType::of::<T>()))
    }

    /// Mark the field as an array of its kind.
    pub fn array(mut self) -> Self {
        self.shape = Shape::Array;
        if let FieldKind::NestedRecord(nested) = self.kind {
            self.kind = FieldKind::NestedRecordArray(nested);
        }
        self
    }

    /// Exclude the field from indexing. On record-typed fields this flag has
    /// no effect; the nested type's own flags apply.
    pub fn noindex(mut self) -> Self {
        self.noindex = true;
        self
    }

    /// Store the field under a different name.
    pub fn rename(mut self, external_name: impl Into<String>) -> Self {
        self.external_name = Some(external_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name used in the store and flat representations.
    pub fn external_name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_noindex(&self) -> bool {
        self.noindex
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Fields whose name starts with `_` are never persisted.
    pub fn is_persisted(&self) -> bool {
        !self.name.starts_with(PRIVATE_FIELD_PREFIX)
    }

    pub fn nested_type(&self) -> Option<NestedType> {
        match self.kind {
            FieldKind::NestedRecord(nested) | FieldKind::NestedRecordArray(nested) => Some(nested),
            _ => None,
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Registered schema of one record type.
#[derive(Debug, Clone)]
pub struct Schema {
    type_name: &'static str,
    fields: Vec<Field>,
    no_index_paths: Vec<String>,
}

impl Schema {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn persisted_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_persisted())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Persisted field stored under `external_name`.
    pub fn field_by_external(&self, external_name: &str) -> Option<&Field> {
        self.persisted_fields()
            .find(|f| f.external_name() == external_name)
    }

    /// Dotted paths excluded from indexing, precomputed at build time.
    pub fn no_index_paths(&self) -> &[String] {
        &self.no_index_paths
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Immutable lookup from record type to its schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<TypeId, Schema>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Schema of `T`.
    pub fn schema<T: Entity>(&self) -> KindResult<&Schema> {
        self.lookup(TypeId::of::<T>(), T::type_name())
    }

    /// Schema of a nested record type.
    pub fn nested_schema(&self, nested: NestedType) -> KindResult<&Schema> {
        self.lookup(nested.type_id, nested.type_name)
    }

    fn lookup(&self, type_id: TypeId, type_name: &str) -> KindResult<&Schema> {
        self.schemas.get(&type_id).ok_or_else(|| {
            SchemaError::UnregisteredType {
                type_name: type_name.to_string(),
            }
            .into()
        })
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.schemas.contains_key(&TypeId::of::<T>())
    }

    pub fn no_index_paths<T: Entity>(&self) -> KindResult<&[String]> {
        Ok(self.schema::<T>()?.no_index_paths())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    fields: Vec<Field>,
}

/// Collects registrations; validation happens in [`Self::build`].
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    registrations: Vec<Registration>,
}

impl SchemaRegistryBuilder {
    /// Register record type `T` with its persisted fields. The key field is
    /// implicit and must not be listed.
    pub fn register<T: Entity>(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<T>(),
            type_name: T::type_name(),
            fields: fields.into_iter().collect(),
        });
        self
    }

    pub fn build(self) -> KindResult<SchemaRegistry> {
        let mut by_type: HashMap<TypeId, Registration> = HashMap::new();
        for registration in self.registrations {
            validate_fields(&registration)?;
            if by_type.contains_key(&registration.type_id) {
                return Err(SchemaError::DuplicateType {
                    type_name: registration.type_name.to_string(),
                }
                .into());
            }
            by_type.insert(registration.type_id, registration);
        }

        for registration in by_type.values() {
            for field in &registration.fields {
                if let Some(nested) = field.nested_type() {
                    if !by_type.contains_key(&nested.type_id) {
                        return Err(SchemaError::UnregisteredNestedType {
                            type_name: registration.type_name.to_string(),
                            field: field.name.clone(),
                            nested: nested.type_name.to_string(),
                        }
                        .into());
                    }
                }
            }
        }

        let mut schemas = HashMap::with_capacity(by_type.len());
        for (type_id, registration) in &by_type {
            let mut no_index_paths = Vec::new();
            let mut stack = vec![*type_id];
            collect_no_index(&by_type, &registration.fields, "", &mut stack, &mut no_index_paths);
            schemas.insert(
                *type_id,
                Schema {
                    type_name: registration.type_name,
                    fields: registration.fields.clone(),
                    no_index_paths,
                },
            );
        }

        tracing::debug!(types = schemas.len(), "schema registry built");
        Ok(SchemaRegistry { schemas })
    }
}

fn validate_fields(registration: &Registration) -> KindResult<()> {
    let type_name = registration.type_name.to_string();
    let mut names = HashSet::new();
    let mut external_names = HashSet::new();

    for field in &registration.fields {
        if field.name == KEY_FIELD || (field.is_persisted() && field.external_name() == KEY_FIELD) {
            return Err(SchemaError::ReservedField {
                type_name,
                field: field.name.clone(),
            }
            .into());
        }
        if !names.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                type_name,
                field: field.name.clone(),
            }
            .into());
        }
        if field.is_persisted() && !external_names.insert(field.external_name()) {
            return Err(SchemaError::DuplicateExternalName {
                type_name,
                external_name: field.external_name().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Walk persisted fields, descending into nested record types. A type
/// already on the current descent path is not entered again.
fn collect_no_index(
    registrations: &HashMap<TypeId, Registration>,
    fields: &[Field],
    prefix: &str,
    stack: &mut Vec<TypeId>,
    out: &mut Vec<String>,
) {
    for field in fields.iter().filter(|f| f.is_persisted()) {
        let name = field.external_name();
        let suffix = match field.shape {
            Shape::Single => "",
            Shape::Array => "[]",
        };
        match field.nested_type() {
            Some(nested) => {
                if stack.contains(&nested.type_id) {
                    continue;
                }
                let Some(registration) = registrations.get(&nested.type_id) else {
                    continue;
                };
                let nested_prefix = format!("{}{}{}.", prefix, name, suffix);
                stack.push(nested.type_id);
                collect_no_index(registrations, &registration.fields, &nested_prefix, stack, out);
                stack.pop();
            }
            None if field.noindex => out.push(format!("{}{}{}", prefix, name, suffix)),
            None => {}
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
