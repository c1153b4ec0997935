//! Column statistics translation.
//!
//! Statistics are projected per *leaf* field and keyed by field id; stats are
//! never synthesized for composite parents, and a file whose source entry
//! carries no statistics gets an empty map rather than zero-valued stats.
//! Timestamp bounds are normalized to the schema's declared precision.
pub mod parquet;

use serde_json::{json, Map, Value};

use crate::error::{SourceReadSnafu, SyncResult};
use crate::model::{
    CanonicalKind, CanonicalSchema, ColumnStat, DataFile, Range, Scalar, TimestampPrecision,
    TypeMetadata,
};
use crate::partition::parse_instant;
use std::collections::HashMap;

/// Parse a Delta `stats` JSON string into canonical per-field statistics.
pub fn delta_stats_to_canonical(
    stats_json: &str,
    schema: &CanonicalSchema,
) -> SyncResult<HashMap<i32, ColumnStat>> {
    let stats: Value = serde_json::from_str(stats_json).map_err(|e| {
        SourceReadSnafu {
            detail: format!("unparseable file stats: {e}"),
        }
        .build()
    })?;
    let num_records = stats
        .get("numRecords")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let min_values = stats.get("minValues");
    let max_values = stats.get("maxValues");
    let null_count = stats.get("nullCount");

    let mut out = HashMap::new();
    schema.visit_paths(&mut |path, field| {
        // Delta stats only describe record leaves; array and map interiors
        // never appear.
        if field.schema.kind.is_composite() || path.contains(".element") || path.contains(".key_value.") {
            return;
        }
        let Some(id) = field.field_id else { return };

        let min = min_values
            .and_then(|v| lookup_nested(v, path))
            .and_then(|v| scalar_from_json(v, field.schema.kind, &field.schema.metadata));
        let max = max_values
            .and_then(|v| lookup_nested(v, path))
            .and_then(|v| scalar_from_json(v, field.schema.kind, &field.schema.metadata));
        let nulls = null_count
            .and_then(|v| lookup_nested(v, path))
            .and_then(Value::as_u64);

        let range = match (min, max) {
            (Some(min), Some(max)) => Range::try_new(min, max),
            _ => None,
        };
        if range.is_none() && nulls.is_none() {
            return;
        }
        out.insert(
            id,
            ColumnStat {
                range,
                num_nulls: nulls.unwrap_or(0),
                num_values: num_records,
                total_size_bytes: 0,
            },
        );
    });
    Ok(out)
}

/// Render a file's canonical statistics as a Delta `stats` JSON string.
///
/// Files with empty stat maps produce a bare record count so downstream
/// engines still see row counts.
pub fn canonical_stats_to_delta(file: &DataFile, schema: &CanonicalSchema) -> SyncResult<String> {
    let index = schema.field_id_index();
    let mut min_values = Map::new();
    let mut max_values = Map::new();
    let mut null_count = Map::new();

    for (id, stat) in &file.column_stats {
        let Some(path) = index.get(id) else { continue };
        if path.contains(".element") || path.contains(".key_value.") {
            continue;
        }
        let metadata = schema
            .field_at_path(path)
            .map(|f| f.schema.metadata.clone())
            .unwrap_or_default();
        if let Some(range) = &stat.range {
            insert_nested(&mut min_values, path, scalar_to_json(range.min(), &metadata));
            insert_nested(&mut max_values, path, scalar_to_json(range.max(), &metadata));
        }
        insert_nested(&mut null_count, path, json!(stat.num_nulls));
    }

    let stats = json!({
        "numRecords": file.record_count,
        "minValues": min_values,
        "maxValues": max_values,
        "nullCount": null_count,
    });
    serde_json::to_string(&stats).map_err(|e| {
        SourceReadSnafu {
            detail: format!("encoding file stats: {e}"),
        }
        .build()
    })
}

fn lookup_nested<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn insert_nested(map: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        current = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("nested stat entries are objects");
    }
}

/// Interpret a JSON stat bound as a canonical scalar.
///
/// Unrepresentable bounds are dropped (`None`), never guessed.
pub fn scalar_from_json(
    value: &Value,
    kind: CanonicalKind,
    metadata: &TypeMetadata,
) -> Option<Scalar> {
    match kind {
        CanonicalKind::Boolean => value.as_bool().map(Scalar::Boolean),
        CanonicalKind::Int => value.as_i64().map(|v| Scalar::Int(v as i32)),
        CanonicalKind::Long => value.as_i64().map(Scalar::Long),
        CanonicalKind::Float => value.as_f64().map(|v| Scalar::Float(v as f32)),
        CanonicalKind::Double => value.as_f64().map(Scalar::Double),
        CanonicalKind::String | CanonicalKind::Enum => {
            value.as_str().map(|s| Scalar::String(s.to_string()))
        }
        CanonicalKind::Date => {
            let raw = value.as_str()?;
            let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
            Some(Scalar::Date(
                (date - chrono::NaiveDate::from_ymd_opt(1970, 1, 1)?).num_days() as i32,
            ))
        }
        CanonicalKind::Timestamp | CanonicalKind::TimestampNtz => {
            let instant = parse_instant(value.as_str()?)?;
            Some(match metadata.timestamp_precision {
                Some(TimestampPrecision::Millis) => Scalar::Timestamp(instant.timestamp_millis()),
                _ => Scalar::Timestamp(instant.timestamp_micros()),
            })
        }
        CanonicalKind::Decimal => {
            let scale = metadata.decimal_scale.unwrap_or(0);
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            match crate::partition::deserialize_scalar(&raw, CanonicalKind::Decimal, metadata) {
                Ok(scalar) => Some(scalar),
                Err(_) => {
                    // A plain integer bound for a scaled decimal.
                    let unscaled: i128 = raw.parse().ok()?;
                    Some(Scalar::Decimal {
                        unscaled: unscaled * 10i128.checked_pow(scale as u32)?,
                        scale,
                    })
                }
            }
        }
        _ => None,
    }
}

/// Render a canonical scalar as a JSON stat bound.
pub fn scalar_to_json(scalar: &Scalar, metadata: &TypeMetadata) -> Value {
    match scalar {
        Scalar::Boolean(v) => json!(v),
        Scalar::Int(v) => json!(v),
        Scalar::Long(v) => json!(v),
        Scalar::Float(v) => json!(v),
        Scalar::Double(v) => json!(v),
        Scalar::String(v) => json!(v),
        Scalar::Bytes(_) | Scalar::Date(_) | Scalar::Timestamp(_) | Scalar::Decimal { .. } => {
            match crate::partition::serialize_scalar(scalar, metadata) {
                Ok(s) => json!(s),
                Err(_) => Value::Null,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CanonicalField;
    use crate::schema::annotate_field_ids;

    fn schema() -> CanonicalSchema {
        annotate_field_ids(&CanonicalSchema::record(vec![
            CanonicalField::nullable("col1", CanonicalKind::Int),
            CanonicalField::nullable("col2", CanonicalKind::String),
            CanonicalField {
                name: "nested".to_string(),
                field_id: None,
                nullable: true,
                default: None,
                schema: CanonicalSchema::record(vec![CanonicalField::nullable(
                    "inner",
                    CanonicalKind::Long,
                )]),
            },
        ]))
    }

    #[test]
    fn delta_stats_project_to_leaf_field_ids() {
        let raw = r#"{
            "numRecords": 50,
            "minValues": {"col1": 1, "col2": "a", "nested": {"inner": 5}},
            "maxValues": {"col1": 50, "col2": "z", "nested": {"inner": 9}},
            "nullCount": {"col1": 0, "col2": 2, "nested": {"inner": 1}}
        }"#;
        let schema = schema();
        let stats = delta_stats_to_canonical(raw, &schema).unwrap();

        // col1=1, col2=2, nested=3, nested.inner=4; the record parent gets
        // no stats.
        assert_eq!(stats.len(), 3);
        assert!(!stats.contains_key(&3));
        let col1 = &stats[&1];
        assert_eq!(col1.num_values, 50);
        assert_eq!(col1.range.as_ref().unwrap().min(), &Scalar::Int(1));
        assert_eq!(stats[&4].num_nulls, 1);
    }

    #[test]
    fn files_without_stats_produce_empty_maps() {
        let stats = delta_stats_to_canonical(r#"{"numRecords": 10}"#, &schema()).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn canonical_stats_roundtrip_through_delta_json() {
        let schema = schema();
        let mut column_stats = HashMap::new();
        column_stats.insert(
            1,
            ColumnStat {
                range: Range::try_new(Scalar::Int(1), Scalar::Int(50)),
                num_nulls: 0,
                num_values: 50,
                total_size_bytes: 0,
            },
        );
        column_stats.insert(
            4,
            ColumnStat {
                range: Range::try_new(Scalar::Long(5), Scalar::Long(9)),
                num_nulls: 1,
                num_values: 50,
                total_size_bytes: 0,
            },
        );
        let file = DataFile {
            physical_path: "/t/f.parquet".to_string(),
            file_format: crate::model::FileFormat::ApacheParquet,
            schema_version: None,
            partition_values: Vec::new(),
            partition_path: None,
            file_size_bytes: 100,
            record_count: 50,
            last_modified_ms: 0,
            column_stats,
        };
        let encoded = canonical_stats_to_delta(&file, &schema).unwrap();
        let back = delta_stats_to_canonical(&encoded, &schema).unwrap();
        assert_eq!(back, file.column_stats);
    }

    #[test]
    fn timestamp_bounds_normalize_to_declared_precision() {
        let metadata = TypeMetadata::timestamp(TimestampPrecision::Millis);
        let scalar = scalar_from_json(
            &json!("2023-06-15T13:45:10.500Z"),
            CanonicalKind::Timestamp,
            &metadata,
        )
        .unwrap();
        assert_eq!(scalar, Scalar::Timestamp(1_686_836_710_500));
    }
}
