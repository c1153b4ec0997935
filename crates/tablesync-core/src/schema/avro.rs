//! Avro schema translation, used by the Hudi adapters.
//!
//! Hudi records its table schema as an Avro JSON document inside commit
//! metadata. Avro has no field ids, so canonicalization assigns them, and
//! nullability is spelled as a `["null", T]` union. Map keys are implicitly
//! non-null strings.
use serde_json::{json, Map, Value};
use snafu::prelude::*;

use crate::error::{InvalidSchemaSnafu, SyncResult, UnsupportedTypeSnafu};
use crate::model::{
    CanonicalField, CanonicalKind, CanonicalSchema, TimestampPrecision, TypeMetadata,
};
use crate::schema::{annotate_field_ids, join_path};

/// Parse an Avro record schema into the canonical model, assigning field ids.
pub fn to_canonical(schema: &Value) -> SyncResult<CanonicalSchema> {
    let canonical = record_to_canonical(schema, "")?;
    Ok(annotate_field_ids(&canonical))
}

/// Emit an Avro record schema named `record_name` for a canonical schema.
pub fn from_canonical(schema: &CanonicalSchema, record_name: &str) -> SyncResult<Value> {
    ensure!(
        schema.kind == CanonicalKind::Record,
        InvalidSchemaSnafu {
            detail: format!("table schema must be a record, got {}", schema.kind),
        }
    );
    record_to_json(schema, record_name, "")
}

fn record_to_canonical(value: &Value, path: &str) -> SyncResult<CanonicalSchema> {
    let fields = value
        .get("fields")
        .and_then(Value::as_array)
        .context(InvalidSchemaSnafu {
            detail: format!("record without fields at '{path}'"),
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
        let type_value = field.get("type").context(InvalidSchemaSnafu {
            detail: format!("field '{field_path}' without a type"),
        })?;
        let (schema, nullable) = type_to_canonical(type_value, &field_path)?;
        canonical.push(CanonicalField {
            name,
            field_id: None,
            nullable,
            default: None,
            schema,
        });
    }
    Ok(CanonicalSchema::record(canonical))
}

/// Returns the canonical type plus whether a `null` union branch made it
/// nullable.
fn type_to_canonical(type_value: &Value, path: &str) -> SyncResult<(CanonicalSchema, bool)> {
    match type_value {
        Value::String(name) => Ok((primitive_to_canonical(name, path)?, false)),
        Value::Array(branches) => union_to_canonical(branches, path),
        Value::Object(obj) => Ok((complex_to_canonical(obj, path)?, false)),
        other => InvalidSchemaSnafu {
            detail: format!("malformed type at '{path}': {other}"),
        }
        .fail(),
    }
}

fn union_to_canonical(branches: &[Value], path: &str) -> SyncResult<(CanonicalSchema, bool)> {
    // Only the two-branch nullable union is representable.
    let non_null: Vec<&Value> = branches
        .iter()
        .filter(|b| b.as_str() != Some("null"))
        .collect();
    let has_null = non_null.len() != branches.len();
    ensure!(
        non_null.len() == 1 && has_null,
        UnsupportedTypeSnafu {
            type_name: format!("union of {} branches", branches.len()),
            path: path.to_string(),
        }
    );
    let (schema, _) = type_to_canonical(non_null[0], path)?;
    Ok((schema, true))
}

fn primitive_to_canonical(name: &str, path: &str) -> SyncResult<CanonicalSchema> {
    let schema = match name {
        "boolean" => CanonicalSchema::primitive(CanonicalKind::Boolean),
        "int" => CanonicalSchema::primitive(CanonicalKind::Int),
        "long" => CanonicalSchema::primitive(CanonicalKind::Long),
        "float" => CanonicalSchema::primitive(CanonicalKind::Float),
        "double" => CanonicalSchema::primitive(CanonicalKind::Double),
        "string" => CanonicalSchema::primitive(CanonicalKind::String),
        "bytes" => CanonicalSchema::primitive(CanonicalKind::Bytes),
        other => {
            return UnsupportedTypeSnafu {
                type_name: other.to_string(),
                path: path.to_string(),
            }
            .fail();
        }
    };
    Ok(schema)
}

fn complex_to_canonical(obj: &Map<String, Value>, path: &str) -> SyncResult<CanonicalSchema> {
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .context(InvalidSchemaSnafu {
            detail: format!("complex type without a type tag at '{path}'"),
        })?;
    let logical = obj.get("logicalType").and_then(Value::as_str);

    if let Some(logical) = logical {
        return logical_to_canonical(kind, logical, obj, path);
    }

    match kind {
        "record" => record_to_canonical(&Value::Object(obj.clone()), path),
        "enum" => {
            let symbols = obj
                .get("symbols")
                .and_then(Value::as_array)
                .context(InvalidSchemaSnafu {
                    detail: format!("enum without symbols at '{path}'"),
                })?
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            Ok(CanonicalSchema::primitive_with(
                CanonicalKind::Enum,
                TypeMetadata {
                    enum_symbols: Some(symbols),
                    ..Default::default()
                },
            ))
        }
        "fixed" => {
            let size = obj
                .get("size")
                .and_then(Value::as_i64)
                .context(InvalidSchemaSnafu {
                    detail: format!("fixed without a size at '{path}'"),
                })?;
            Ok(CanonicalSchema::primitive_with(
                CanonicalKind::Fixed,
                TypeMetadata::fixed(size as i32),
            ))
        }
        "array" => {
            let items = obj.get("items").context(InvalidSchemaSnafu {
                detail: format!("array without items at '{path}'"),
            })?;
            let (schema, nullable) = type_to_canonical(items, &join_path(path, "element"))?;
            Ok(CanonicalSchema::array(CanonicalField {
                name: "element".to_string(),
                field_id: None,
                nullable,
                default: None,
                schema,
            }))
        }
        "map" => {
            let values = obj.get("values").context(InvalidSchemaSnafu {
                detail: format!("map without values at '{path}'"),
            })?;
            let (value_schema, value_nullable) =
                type_to_canonical(values, &join_path(path, "key_value.value"))?;
            Ok(CanonicalSchema::map(
                CanonicalField::required("key", CanonicalKind::String),
                CanonicalField {
                    name: "value".to_string(),
                    field_id: None,
                    nullable: value_nullable,
                    default: None,
                    schema: value_schema,
                },
            ))
        }
        other => primitive_to_canonical(other, path),
    }
}

fn logical_to_canonical(
    kind: &str,
    logical: &str,
    obj: &Map<String, Value>,
    path: &str,
) -> SyncResult<CanonicalSchema> {
    let schema = match (kind, logical) {
        ("int", "date") => CanonicalSchema::primitive(CanonicalKind::Date),
        ("long", "timestamp-millis") => CanonicalSchema::primitive_with(
            CanonicalKind::Timestamp,
            TypeMetadata::timestamp(TimestampPrecision::Millis),
        ),
        ("long", "timestamp-micros") => CanonicalSchema::primitive_with(
            CanonicalKind::Timestamp,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        ("long", "local-timestamp-millis") => CanonicalSchema::primitive_with(
            CanonicalKind::TimestampNtz,
            TypeMetadata::timestamp(TimestampPrecision::Millis),
        ),
        ("long", "local-timestamp-micros") => CanonicalSchema::primitive_with(
            CanonicalKind::TimestampNtz,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        ("bytes", "decimal") | ("fixed", "decimal") => {
            let precision = obj.get("precision").and_then(Value::as_i64).context(
                InvalidSchemaSnafu {
                    detail: format!("decimal without precision at '{path}'"),
                },
            )?;
            let scale = obj.get("scale").and_then(Value::as_i64).unwrap_or(0);
            CanonicalSchema::primitive_with(
                CanonicalKind::Decimal,
                TypeMetadata::decimal(precision as i32, scale as i32),
            )
        }
        (kind, logical) => {
            return UnsupportedTypeSnafu {
                type_name: format!("{kind} with logicalType {logical}"),
                path: path.to_string(),
            }
            .fail();
        }
    };
    Ok(schema)
}

fn record_to_json(schema: &CanonicalSchema, name: &str, path: &str) -> SyncResult<Value> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let field_path = join_path(path, &field.name);
        let field_type = type_to_json(&field.schema, &field.name, &field_path)?;
        let field_type = if field.nullable {
            json!(["null", field_type])
        } else {
            field_type
        };
        let mut entry = json!({ "name": field.name, "type": field_type });
        if field.nullable {
            entry["default"] = Value::Null;
        }
        fields.push(entry);
    }
    Ok(json!({ "type": "record", "name": name, "fields": fields }))
}

fn type_to_json(schema: &CanonicalSchema, name: &str, path: &str) -> SyncResult<Value> {
    let value = match schema.kind {
        CanonicalKind::Boolean => json!("boolean"),
        CanonicalKind::Int => json!("int"),
        CanonicalKind::Long => json!("long"),
        CanonicalKind::Float => json!("float"),
        CanonicalKind::Double => json!("double"),
        CanonicalKind::String => json!("string"),
        CanonicalKind::Bytes => json!("bytes"),
        CanonicalKind::Date => json!({ "type": "int", "logicalType": "date" }),
        CanonicalKind::Timestamp => {
            let logical = match schema.metadata.timestamp_precision {
                Some(TimestampPrecision::Millis) => "timestamp-millis",
                _ => "timestamp-micros",
            };
            json!({ "type": "long", "logicalType": logical })
        }
        CanonicalKind::TimestampNtz => {
            let logical = match schema.metadata.timestamp_precision {
                Some(TimestampPrecision::Millis) => "local-timestamp-millis",
                _ => "local-timestamp-micros",
            };
            json!({ "type": "long", "logicalType": logical })
        }
        CanonicalKind::Decimal => json!({
            "type": "bytes",
            "logicalType": "decimal",
            "precision": schema.metadata.decimal_precision.unwrap_or(38),
            "scale": schema.metadata.decimal_scale.unwrap_or(0),
        }),
        CanonicalKind::Fixed => {
            let len = schema.metadata.fixed_length.context(InvalidSchemaSnafu {
                detail: format!("fixed type without a length at '{path}'"),
            })?;
            json!({ "type": "fixed", "name": format!("{name}_fixed"), "size": len })
        }
        CanonicalKind::Enum => {
            let symbols = schema
                .metadata
                .enum_symbols
                .clone()
                .context(InvalidSchemaSnafu {
                    detail: format!("enum without symbols at '{path}'"),
                })?;
            json!({ "type": "enum", "name": format!("{name}_enum"), "symbols": symbols })
        }
        CanonicalKind::Record => record_to_json(schema, name, path)?,
        CanonicalKind::Array => {
            let element = schema.array_element().context(InvalidSchemaSnafu {
                detail: format!("array without element at '{path}'"),
            })?;
            let items = type_to_json(&element.schema, name, &join_path(path, "element"))?;
            let items = if element.nullable {
                json!(["null", items])
            } else {
                items
            };
            json!({ "type": "array", "items": items })
        }
        CanonicalKind::Map => {
            let (_, value) = schema.map_entries().context(InvalidSchemaSnafu {
                detail: format!("map without key and value at '{path}'"),
            })?;
            let values = type_to_json(&value.schema, name, &join_path(path, "key_value.value"))?;
            let values = if value.nullable {
                json!(["null", values])
            } else {
                values
            };
            json!({ "type": "map", "values": values })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_union_maps_to_nullable_field() {
        let schema = json!({
            "type": "record",
            "name": "row",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "note", "type": ["null", "string"], "default": null}
            ]
        });
        let canonical = to_canonical(&schema).unwrap();
        assert!(!canonical.fields[0].nullable);
        assert!(canonical.fields[1].nullable);
        assert_eq!(canonical.fields[0].field_id, Some(1));
    }

    #[test]
    fn logical_types_become_canonical_kinds() {
        let schema = json!({
            "type": "record",
            "name": "row",
            "fields": [
                {"name": "d", "type": {"type": "int", "logicalType": "date"}},
                {"name": "ts", "type": {"type": "long", "logicalType": "timestamp-millis"}}
            ]
        });
        let canonical = to_canonical(&schema).unwrap();
        assert_eq!(canonical.fields[0].schema.kind, CanonicalKind::Date);
        assert_eq!(canonical.fields[1].schema.kind, CanonicalKind::Timestamp);
        assert_eq!(
            canonical.fields[1].schema.metadata.timestamp_precision,
            Some(TimestampPrecision::Millis)
        );
    }

    #[test]
    fn roundtrip_preserves_structure_modulo_ids() {
        let schema = json!({
            "type": "record",
            "name": "row",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "tags", "type": {"type": "array", "items": "string"}},
                {"name": "attrs", "type": {"type": "map", "values": ["null", "double"]}}
            ]
        });
        let canonical = to_canonical(&schema).unwrap();
        let emitted = from_canonical(&canonical, "row").unwrap();
        let reparsed = to_canonical(&emitted).unwrap();
        assert_eq!(reparsed, canonical);
    }

    #[test]
    fn three_branch_unions_are_unsupported() {
        let schema = json!({
            "type": "record",
            "name": "row",
            "fields": [
                {"name": "x", "type": ["null", "string", "long"]}
            ]
        });
        assert!(to_canonical(&schema).is_err());
    }
}
