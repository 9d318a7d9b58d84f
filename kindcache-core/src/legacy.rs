//! Legacy flattened embedded entities.
//!
//! Older writers stored embedded records as dotted top-level properties:
//! `{"inner.v": 1}` for a single nested record and
//! `{"items.v": [1, 2]}` (parallel arrays) for an array of records. Reading
//! such an entity regroups the dotted names by their first segment before
//! the regular conversion runs.

use crate::schema::{Schema, SchemaRegistry, Shape};
use crate::value::{FieldMap, Value};
use crate::{KindResult, MappingError};

pub const LEGACY_SEPARATOR: char = '.';

/// Nesting levels supported below the root.
pub const MAX_LEGACY_DEPTH: usize = 2;

/// Whether any stored field name uses the dotted legacy form.
pub fn is_flattened(fields: &FieldMap) -> bool {
    fields.keys().any(|name| name.contains(LEGACY_SEPARATOR))
}

/// Regroup dotted field names into embedded entities.
///
/// Where the destination field is an array, every member array contributes
/// its i-th element to the i-th embedded entity. Otherwise the members form
/// a single embedded entity, which may itself hold parallel arrays.
pub fn unflatten(registry: &SchemaRegistry, schema: &Schema, fields: &FieldMap) -> KindResult<FieldMap> {
    let entries = fields.iter().map(|(name, value)| (name.as_str(), value)).collect();
    unflatten_level(registry, Some(schema), entries, 0, "")
}

fn unflatten_level(
    registry: &SchemaRegistry,
    schema: Option<&Schema>,
    entries: Vec<(&str, &Value)>,
    depth: usize,
    path: &str,
) -> KindResult<FieldMap> {
    let mut out = FieldMap::new();
    let mut groups: Vec<(&str, Vec<(&str, &Value)>)> = Vec::new();

    for (name, value) in entries {
        match name.split_once(LEGACY_SEPARATOR) {
            None => {
                out.insert(name.to_string(), value.clone());
            }
            Some(_) if depth >= MAX_LEGACY_DEPTH => {
                return Err(MappingError::LegacyDepthExceeded {
                    field: format!("{}{}", path, name),
                    max_depth: MAX_LEGACY_DEPTH,
                }
                .into());
            }
            Some((head, rest)) => match groups.iter_mut().find(|(h, _)| *h == head) {
                Some((_, members)) => members.push((rest, value)),
                None => groups.push((head, vec![(rest, value)])),
            },
        }
    }

    for (head, members) in groups {
        let field = schema.and_then(|s| s.field_by_external(head));
        let nested_schema = match field.and_then(|f| f.nested_type()) {
            Some(nested) => Some(registry.nested_schema(nested)?),
            None => None,
        };
        let member_path = format!("{}{}{}", path, head, LEGACY_SEPARATOR);

        let regrouped = if field.is_some_and(|f| f.shape() == Shape::Array) {
            let mut elements: Vec<Vec<(&str, &Value)>> = Vec::new();
            for (rest, value) in members {
                let items: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for (i, item) in items.into_iter().enumerate() {
                    if elements.len() <= i {
                        elements.push(Vec::new());
                    }
                    elements[i].push((rest, item));
                }
            }
            let mut array = Vec::with_capacity(elements.len());
            for element in elements {
                let fields = unflatten_level(registry, nested_schema, element, depth + 1, &member_path)?;
                array.push(Value::Entity(fields));
            }
            Value::Array(array)
        } else {
            let fields = unflatten_level(registry, nested_schema, members, depth + 1, &member_path)?;
            match out.remove(head) {
                Some(Value::Entity(mut existing)) => {
                    existing.extend(fields);
                    Value::Entity(existing)
                }
                _ => Value::Entity(fields),
            }
        };

        out.insert(head.to_string(), regrouped);
    }

    Ok(out)
}
