//! Delta schema translation.
//!
//! Delta stores its schema as a Spark `StructType` JSON string inside the
//! `metaData` action. The format carries no field ids, so canonicalization
//! assigns them; the assignment is stable only within one canonicalization.
//! Generated partition columns (fields carrying a `delta.generationExpression`
//! metadata entry) are artifacts of the partition layout and are excluded
//! from the canonical read schema; the partition translator consumes them
//! separately.
use serde_json::{json, Map, Value};
use snafu::prelude::*;

use crate::error::{InvalidSchemaSnafu, SyncResult, UnsupportedTypeSnafu};
use crate::model::{
    CanonicalField, CanonicalKind, CanonicalSchema, TimestampPrecision, TypeMetadata,
};
use crate::schema::{annotate_field_ids, join_path};

/// Metadata key marking a generated column.
pub const GENERATION_EXPRESSION_KEY: &str = "delta.generationExpression";

/// A top-level Delta field as the partition translator sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaFieldInfo {
    pub name: String,
    pub generation_expression: Option<String>,
}

/// Parse a Delta `schemaString` into the canonical model, assigning field ids.
pub fn to_canonical(schema_string: &str) -> SyncResult<CanonicalSchema> {
    let value: Value = serde_json::from_str(schema_string).map_err(|e| {
        InvalidSchemaSnafu {
            detail: format!("unparseable schema string: {e}"),
        }
        .build()
    })?;
    let schema = struct_to_canonical(&value, "")?;
    Ok(annotate_field_ids(&schema))
}

/// List the top-level fields of a `schemaString` with their generation
/// expressions, including the generated columns `to_canonical` drops.
pub fn top_level_fields(schema_string: &str) -> SyncResult<Vec<DeltaFieldInfo>> {
    let value: Value = serde_json::from_str(schema_string).map_err(|e| {
        InvalidSchemaSnafu {
            detail: format!("unparseable schema string: {e}"),
        }
        .build()
    })?;
    let fields = value
        .get("fields")
        .and_then(Value::as_array)
        .context(InvalidSchemaSnafu {
            detail: "struct type without fields".to_string(),
        })?;
    let mut infos = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field_name(field)?;
        let generation_expression = field
            .get("metadata")
            .and_then(|m| m.get(GENERATION_EXPRESSION_KEY))
            .and_then(Value::as_str)
            .map(str::to_string);
        infos.push(DeltaFieldInfo {
            name,
            generation_expression,
        });
    }
    Ok(infos)
}

/// Serialize a canonical schema to a Delta `schemaString` JSON value.
///
/// Callers that partition by generated columns append those fields to the
/// emitted struct before serializing.
pub fn from_canonical(schema: &CanonicalSchema) -> SyncResult<Value> {
    ensure!(
        schema.kind == CanonicalKind::Record,
        InvalidSchemaSnafu {
            detail: format!("table schema must be a record, got {}", schema.kind),
        }
    );
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        fields.push(field_to_json(field, &field.name)?);
    }
    Ok(json!({ "type": "struct", "fields": fields }))
}

fn field_name(field: &Value) -> SyncResult<String> {
    field
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context(InvalidSchemaSnafu {
            detail: "field without a name".to_string(),
        })
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
        let name = field_name(field)?;
        let field_path = join_path(path, &name);
        let is_generated = field
            .get("metadata")
            .and_then(|m| m.get(GENERATION_EXPRESSION_KEY))
            .is_some();
        if path.is_empty() && is_generated {
            continue;
        }
        let nullable = field.get("nullable").and_then(Value::as_bool).unwrap_or(true);
        let type_value = field.get("type").context(InvalidSchemaSnafu {
            detail: format!("field '{field_path}' without a type"),
        })?;
        canonical.push(CanonicalField {
            name,
            field_id: None,
            nullable,
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
        // Narrow integers widen to int; Delta stats do not distinguish them.
        "byte" | "short" | "integer" => CanonicalSchema::primitive(CanonicalKind::Int),
        "long" => CanonicalSchema::primitive(CanonicalKind::Long),
        "float" => CanonicalSchema::primitive(CanonicalKind::Float),
        "double" => CanonicalSchema::primitive(CanonicalKind::Double),
        "string" => CanonicalSchema::primitive(CanonicalKind::String),
        "binary" => CanonicalSchema::primitive(CanonicalKind::Bytes),
        "date" => CanonicalSchema::primitive(CanonicalKind::Date),
        "timestamp" => CanonicalSchema::primitive_with(
            CanonicalKind::Timestamp,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        "timestamp_ntz" => CanonicalSchema::primitive_with(
            CanonicalKind::TimestampNtz,
            TypeMetadata::timestamp(TimestampPrecision::Micros),
        ),
        other => {
            if let Some(metadata) = parse_decimal(other) {
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
        "array" => {
            let element_type = obj.get("elementType").context(InvalidSchemaSnafu {
                detail: format!("array without elementType at '{path}'"),
            })?;
            let contains_null = obj
                .get("containsNull")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let element_path = join_path(path, "element");
            Ok(CanonicalSchema::array(CanonicalField {
                name: "element".to_string(),
                field_id: None,
                nullable: contains_null,
                default: None,
                schema: type_to_canonical(element_type, &element_path)?,
            }))
        }
        "map" => {
            let key_type = obj.get("keyType").context(InvalidSchemaSnafu {
                detail: format!("map without keyType at '{path}'"),
            })?;
            let value_type = obj.get("valueType").context(InvalidSchemaSnafu {
                detail: format!("map without valueType at '{path}'"),
            })?;
            let value_nullable = obj
                .get("valueContainsNull")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let key_path = join_path(path, "key_value.key");
            let value_path = join_path(path, "key_value.value");
            Ok(CanonicalSchema::map(
                CanonicalField {
                    name: "key".to_string(),
                    field_id: None,
                    nullable: false,
                    default: None,
                    schema: type_to_canonical(key_type, &key_path)?,
                },
                CanonicalField {
                    name: "value".to_string(),
                    field_id: None,
                    nullable: value_nullable,
                    default: None,
                    schema: type_to_canonical(value_type, &value_path)?,
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
    Ok(json!({
        "name": field.name,
        "type": type_to_json(&field.schema, path)?,
        "nullable": field.nullable,
        "metadata": {},
    }))
}

fn type_to_json(schema: &CanonicalSchema, path: &str) -> SyncResult<Value> {
    let value = match schema.kind {
        CanonicalKind::Boolean => json!("boolean"),
        CanonicalKind::Int => json!("integer"),
        CanonicalKind::Long => json!("long"),
        CanonicalKind::Float => json!("float"),
        CanonicalKind::Double => json!("double"),
        // Enums flatten to strings; Delta has no enum type.
        CanonicalKind::String | CanonicalKind::Enum => json!("string"),
        // Fixed width is not expressible; plain binary is the closest type.
        CanonicalKind::Bytes | CanonicalKind::Fixed => json!("binary"),
        CanonicalKind::Date => json!("date"),
        CanonicalKind::Timestamp => json!("timestamp"),
        CanonicalKind::TimestampNtz => json!("timestamp_ntz"),
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
            json!({
                "type": "array",
                "elementType": type_to_json(&element.schema, &join_path(path, "element"))?,
                "containsNull": element.nullable,
            })
        }
        CanonicalKind::Map => {
            let (key, value) = schema.map_entries().context(InvalidSchemaSnafu {
                detail: format!("map without key and value at '{path}'"),
            })?;
            json!({
                "type": "map",
                "keyType": type_to_json(&key.schema, &join_path(path, "key_value.key"))?,
                "valueType": type_to_json(&value.schema, &join_path(path, "key_value.value"))?,
                "valueContainsNull": value.nullable,
            })
        }
    };
    Ok(value)
}
