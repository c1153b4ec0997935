//! Iceberg schema translation.
//!
//! Iceberg schemas carry explicit field ids everywhere, including list
//! elements and map keys/values, and require ids of one nesting level to be
//! assigned before descending. Canonicalization keeps the ids; emission
//! assigns fresh ids only where the canonical schema has none.
//!
//! Record keys map to `identifier-field-ids`: each canonical key path is
//! resolved against the emitted schema, and a missing path is a hard
//! `SchemaMismatch` rather than a silently shrunken key.
use serde_json::{json, Map, Value};
use snafu::prelude::*;

use crate::error::{InvalidSchemaSnafu, SchemaMismatchSnafu, SyncResult, UnsupportedTypeSnafu};
use crate::model::{
    CanonicalField, CanonicalKind, CanonicalSchema, TimestampPrecision, TypeMetadata,
};
use crate::schema::{annotate_field_ids, join_path, key_field_id};

/// Parse an Iceberg schema JSON object into the canonical model.
pub fn to_canonical(schema: &Value) -> SyncResult<CanonicalSchema> {
    let mut canonical = struct_to_canonical(schema, "")?;
    if let Some(ids) = schema.get("identifier-field-ids").and_then(Value::as_array) {
        let index = canonical.field_id_index();
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_i64().context(InvalidSchemaSnafu {
                detail: "non-integer identifier field id".to_string(),
            })? as i32;
            let path = index.get(&id).context(SchemaMismatchSnafu {
                detail: format!("identifier field id {id} not present in schema"),
            })?;
            keys.push(path.clone());
        }
        canonical.record_keys = keys;
    }
    Ok(canonical)
}

/// Emit an Iceberg schema JSON object for a canonical schema.
///
/// Returns the JSON together with the id-annotated canonical schema, so
/// callers can translate statistics and partition specs against the exact
/// ids that were written.
pub fn from_canonical(schema: &CanonicalSchema) -> SyncResult<(Value, CanonicalSchema)> {
    ensure!(
        schema.kind == CanonicalKind::Record,
        InvalidSchemaSnafu {
            detail: format!("table schema must be a record, got {}", schema.kind),
        }
    );
    let annotated = annotate_field_ids(schema);

    let mut fields = Vec::with_capacity(annotated.fields.len());
    for field in &annotated.fields {
        fields.push(field_to_json(field, &field.name)?);
    }
    let mut out = json!({ "type": "struct", "fields": fields });

    if !annotated.record_keys.is_empty() {
        let mut ids = Vec::with_capacity(annotated.record_keys.len());
        for path in &annotated.record_keys {
            let id = key_field_id(&annotated, path).context(SchemaMismatchSnafu {
                detail: format!("record key path '{path}' not found in emitted schema"),
            })?;
            ids.push(Value::from(id));
        }
        out["identifier-field-ids"] = Value::Array(ids);
    }

    Ok((out, annotated))
}

fn struct_to_canonical(value: &Value, path: &str) -> SyncResult<CanonicalSchema> {
    let fields = value
        .get("fields")
        .and_then(Value::as_array)
        .context(InvalidSchemaSnafu {
            detail: format!("struct type without fields at '{path}'"),
        })?;
    let mut canonical = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field
            .get("name")
            .and_then(Value::as_str)
            .context(InvalidSchemaSnafu {
                detail: format!("field without a name at '{path}'"),
            })?
            .to_string();
        let field_path = join_path(path, &name);
        let id = field.get("id").and_then(Value::as_i64).map(|v| v as i32);
        let required = field
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let type_value = field.get("type").context(InvalidSchemaSnafu {
            detail: format!("field '{field_path}' without a type"),
        })?;
        canonical.push(CanonicalField {
            name,
            field_id: id,
            nullable: !required,
            default: None,
            schema: type_to_canonical(type_value, &field_path)?,
        });
    }
    Ok(CanonicalSchema::record(canonical))
}

fn type_to_canonical(type_value: &Value, path: &str) -> SyncResult<CanonicalSchema> {
    match type_value {
        Value::String(name) => primitive_to_canonical(name, path),
        Value::Object(obj) => composite_to_canonical(obj, path),
        other => InvalidSchemaSnafu {
            detail: format!("malformed type at '{path}': {other}"),
        }
        .fail(),
    }
}

fn primitive_to_canonical(name: &str, path: &str) -> SyncResult<CanonicalSchema> {
    let schema = match name {
        "boolean" => CanonicalSchema::primitive(CanonicalKind::Boolean),
        "int" => CanonicalSchema::primitive(CanonicalKind::Int),
        "long" => CanonicalSchema::primitive(CanonicalKind::Long),
        "float" => CanonicalSchema::primitive(CanonicalKind::Float),
        "double" => CanonicalSchema::primitive(CanonicalKind::Double),
        "string" => CanonicalSchema::primitive(CanonicalKind::String),
        "binary" => CanonicalSchema::primitive(CanonicalKind::Bytes),
        "date" => CanonicalSchema::primitive(CanonicalKind::Date),
        // Iceberg timestamps are microsecond precision by definition.
        "timestamptz" => CanonicalSchema::primitive_with(
            CanonicalKind::Timestamp,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        "timestamp" => CanonicalSchema::primitive_with(
            CanonicalKind::TimestampNtz,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        "uuid" => CanonicalSchema::primitive_with(CanonicalKind::Fixed, TypeMetadata::fixed(16)),
        other => {
            if let Some(len) = parse_bracketed(other, "fixed") {
                CanonicalSchema::primitive_with(CanonicalKind::Fixed, TypeMetadata::fixed(len))
            } else if let Some(metadata) = parse_decimal(other) {
                CanonicalSchema::primitive_with(CanonicalKind::Decimal, metadata)
            } else {
                return UnsupportedTypeSnafu {
                    type_name: other.to_string(),
                    path: path.to_string(),
                }
                .fail();
            }
        }
    };
    Ok(schema)
}

fn parse_bracketed(name: &str, prefix: &str) -> Option<i32> {
    name.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn parse_decimal(name: &str) -> Option<TypeMetadata> {
    let inner = name.strip_prefix("decimal(")?.strip_suffix(')')?;
    let (precision, scale) = inner.split_once(',')?;
    Some(TypeMetadata::decimal(
        precision.trim().parse().ok()?,
        scale.trim().parse().ok()?,
    ))
}

fn composite_to_canonical(obj: &Map<String, Value>, path: &str) -> SyncResult<CanonicalSchema> {
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .context(InvalidSchemaSnafu {
            detail: format!("composite type without a type tag at '{path}'"),
        })?;
    match kind {
        "struct" => struct_to_canonical(&Value::Object(obj.clone()), path),
        "list" => {
            let element_type = obj.get("element").context(InvalidSchemaSnafu {
                detail: format!("list without element at '{path}'"),
            })?;
            let element_id = obj.get("element-id").and_then(Value::as_i64).map(|v| v as i32);
            let element_required = obj
                .get("element-required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let element_path = join_path(path, "element");
            Ok(CanonicalSchema::array(CanonicalField {
                name: "element".to_string(),
                field_id: element_id,
                nullable: !element_required,
                default: None,
                schema: type_to_canonical(element_type, &element_path)?,
            }))
        }
        "map" => {
            let key_type = obj.get("key").context(InvalidSchemaSnafu {
                detail: format!("map without key at '{path}'"),
            })?;
            let value_type = obj.get("value").context(InvalidSchemaSnafu {
                detail: format!("map without value at '{path}'"),
            })?;
            let key_id = obj.get("key-id").and_then(Value::as_i64).map(|v| v as i32);
            let value_id = obj.get("value-id").and_then(Value::as_i64).map(|v| v as i32);
            let value_required = obj
                .get("value-required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(CanonicalSchema::map(
                CanonicalField {
                    name: "key".to_string(),
                    field_id: key_id,
                    nullable: false,
                    default: None,
                    schema: type_to_canonical(key_type, &join_path(path, "key_value.key"))?,
                },
                CanonicalField {
                    name: "value".to_string(),
                    field_id: value_id,
                    nullable: !value_required,
                    default: None,
                    schema: type_to_canonical(value_type, &join_path(path, "key_value.value"))?,
                },
            ))
        }
        other => UnsupportedTypeSnafu {
            type_name: other.to_string(),
            path: path.to_string(),
        }
        .fail(),
    }
}

fn field_to_json(field: &CanonicalField, path: &str) -> SyncResult<Value> {
    let id = field.field_id.context(InvalidSchemaSnafu {
        detail: format!("field '{path}' has no id after assignment"),
    })?;
    Ok(json!({
        "id": id,
        "name": field.name,
        "required": !field.nullable,
        "type": type_to_json(&field.schema, path)?,
    }))
}

fn type_to_json(schema: &CanonicalSchema, path: &str) -> SyncResult<Value> {
    let value = match schema.kind {
        CanonicalKind::Boolean => json!("boolean"),
        CanonicalKind::Int => json!("int"),
        CanonicalKind::Long => json!("long"),
        CanonicalKind::Float => json!("float"),
        CanonicalKind::Double => json!("double"),
        CanonicalKind::String | CanonicalKind::Enum => json!("string"),
        CanonicalKind::Bytes => json!("binary"),
        CanonicalKind::Date => json!("date"),
        CanonicalKind::Timestamp => json!("timestamptz"),
        CanonicalKind::TimestampNtz => json!("timestamp"),
        CanonicalKind::Fixed => {
            let len = schema.metadata.fixed_length.context(InvalidSchemaSnafu {
                detail: format!("fixed type without a length at '{path}'"),
            })?;
            json!(format!("fixed[{len}]"))
        }
        CanonicalKind::Decimal => {
            let precision = schema.metadata.decimal_precision.unwrap_or(38);
            let scale = schema.metadata.decimal_scale.unwrap_or(0);
            json!(format!("decimal({precision},{scale})"))
        }
        CanonicalKind::Record => {
            let mut fields = Vec::with_capacity(schema.fields.len());
            for field in &schema.fields {
                fields.push(field_to_json(field, &join_path(path, &field.name))?);
            }
            json!({ "type": "struct", "fields": fields })
        }
        CanonicalKind::Array => {
            let element = schema.array_element().context(InvalidSchemaSnafu {
                detail: format!("array without element at '{path}'"),
            })?;
            let element_id = element.field_id.context(InvalidSchemaSnafu {
                detail: format!("array element without an id at '{path}'"),
            })?;
            json!({
                "type": "list",
                "element-id": element_id,
                "element": type_to_json(&element.schema, &join_path(path, "element"))?,
                "element-required": !element.nullable,
            })
        }
        CanonicalKind::Map => {
            let (key, value) = schema.map_entries().context(InvalidSchemaSnafu {
                detail: format!("map without key and value at '{path}'"),
            })?;
            let key_id = key.field_id.context(InvalidSchemaSnafu {
                detail: format!("map key without an id at '{path}'"),
            })?;
            let value_id = value.field_id.context(InvalidSchemaSnafu {
                detail: format!("map value without an id at '{path}'"),
            })?;
            json!({
                "type": "map",
                "key-id": key_id,
                "key": type_to_json(&key.schema, &join_path(path, "key_value.key"))?,
                "value-id": value_id,
                "value": type_to_json(&value.schema, &join_path(path, "key_value.value"))?,
                "value-required": !value.nullable,
            })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn sample() -> Value {
        json!({
            "type": "struct",
            "fields": [
                {"id": 1, "name": "id", "required": true, "type": "long"},
                {"id": 2, "name": "ts", "required": false, "type": "timestamptz"},
                {"id": 3, "name": "tags", "required": false, "type": {
                    "type": "list", "element-id": 4, "element": "string",
                    "element-required": true
                }}
            ],
            "identifier-field-ids": [1]
        })
    }

    #[test]
    fn ids_flow_through_canonicalization() {
        let canonical = to_canonical(&sample()).unwrap();
        assert_eq!(canonical.fields[0].field_id, Some(1));
        assert_eq!(
            canonical.field_at_path("tags.element").unwrap().field_id,
            Some(4)
        );
        assert_eq!(canonical.record_keys, vec!["id".to_string()]);
    }

    #[test]
    fn required_maps_to_not_nullable() {
        let canonical = to_canonical(&sample()).unwrap();
        assert!(!canonical.fields[0].nullable);
        assert!(canonical.fields[1].nullable);
    }

    #[test]
    fn roundtrip_is_identity_when_ids_exist() {
        let canonical = to_canonical(&sample()).unwrap();
        let (emitted, _) = from_canonical(&canonical).unwrap();
        let reparsed = to_canonical(&emitted).unwrap();
        assert_eq!(reparsed, canonical);
    }

    #[test]
    fn missing_record_key_path_is_schema_mismatch() {
        let mut canonical = to_canonical(&sample()).unwrap();
        canonical.record_keys = vec!["nope".to_string()];
        let err = from_canonical(&canonical).expect_err("unknown key path");
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    }

    #[test]
    fn timestamp_flavors_are_distinguished() {
        let value = json!({
            "type": "struct",
            "fields": [
                {"id": 1, "name": "utc", "required": false, "type": "timestamptz"},
                {"id": 2, "name": "wall", "required": false, "type": "timestamp"}
            ]
        });
        let canonical = to_canonical(&value).unwrap();
        assert_eq!(canonical.fields[0].schema.kind, CanonicalKind::Timestamp);
        assert_eq!(canonicals(&canonical, 1), CanonicalKind::TimestampNtz);
    }

    fn canonicals(schema: &CanonicalSchema, idx: usize) -> CanonicalKind {
        schema.fields[idx].schema.kind
    }

    #[test]
    fn fixed_and_decimal_metadata_roundtrip() {
        let value = json!({
            "type": "struct",
            "fields": [
                {"id": 1, "name": "token", "required": false, "type": "fixed[8]"},
                {"id": 2, "name": "amount", "required": false, "type": "decimal(18,4)"}
            ]
        });
        let canonical = to_canonical(&value).unwrap();
        let (emitted, _) = from_canonical(&canonical).unwrap();
        assert_eq!(emitted["fields"][0]["type"], json!("fixed[8]"));
        assert_eq!(emitted["fields"][1]["type"], json!("decimal(18,4)"));
    }
}
