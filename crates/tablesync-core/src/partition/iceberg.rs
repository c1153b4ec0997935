//! Iceberg partition translation.
//!
//! Iceberg expresses transforms natively on the source field, so no generated
//! columns are synthesized: an hourly layout is `hour(ts)` in the partition
//! spec document, value dimensions are `identity`. Partition field ids start
//! at 1000 by the format's convention.
use snafu::prelude::*;

use crate::error::{
    InvalidPartitionSpecSnafu, SyncResult, UnsupportedPartitionTransformSnafu,
};
use crate::formats::iceberg_meta::{IcebergPartitionField, IcebergPartitionSpec};
use crate::model::{CanonicalSchema, PartitionField, PartitionSpec, TransformType};

/// First field id available to partition spec fields.
const PARTITION_FIELD_ID_START: i32 = 1000;

fn transform_name(transform: TransformType) -> String {
    match transform {
        TransformType::Value => "identity".to_string(),
        TransformType::Year => "year".to_string(),
        TransformType::Month => "month".to_string(),
        TransformType::Day => "day".to_string(),
        TransformType::Hour => "hour".to_string(),
        TransformType::Bucket(n) => format!("bucket[{n}]"),
        TransformType::Truncate(w) => format!("truncate[{w}]"),
    }
}

fn parse_transform(name: &str) -> SyncResult<TransformType> {
    let transform = match name {
        "identity" => TransformType::Value,
        "year" => TransformType::Year,
        "month" => TransformType::Month,
        "day" => TransformType::Day,
        "hour" => TransformType::Hour,
        other => {
            if let Some(n) = parse_bracketed(other, "bucket") {
                TransformType::Bucket(n)
            } else if let Some(w) = parse_bracketed(other, "truncate") {
                TransformType::Truncate(w)
            } else {
                return UnsupportedPartitionTransformSnafu {
                    detail: format!("unknown transform '{other}'"),
                }
                .fail();
            }
        }
    };
    Ok(transform)
}

fn parse_bracketed(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Emit a canonical spec as an Iceberg partition spec against an
/// id-annotated schema.
pub fn from_canonical(
    spec: &PartitionSpec,
    schema: &CanonicalSchema,
    spec_id: i32,
) -> SyncResult<IcebergPartitionSpec> {
    let mut fields = Vec::with_capacity(spec.fields.len());
    for (position, field) in spec.fields.iter().enumerate() {
        // The schema may have been re-annotated on emission; resolve the id
        // through the path rather than trusting the canonical one.
        let source = schema
            .field_at_path(&field.source_path)
            .and_then(|f| f.field_id)
            .context(InvalidPartitionSpecSnafu {
                detail: format!("partition source '{}' not in schema", field.source_path),
            })?;
        let name = if field.transform == TransformType::Value {
            field.source_name().to_string()
        } else {
            format!(
                "{}_{}",
                field.source_name(),
                transform_name(field.transform)
            )
        };
        fields.push(IcebergPartitionField {
            name,
            transform: transform_name(field.transform),
            source_id: source,
            field_id: PARTITION_FIELD_ID_START + position as i32,
        });
    }
    Ok(IcebergPartitionSpec { spec_id, fields })
}

/// Canonicalize an Iceberg partition spec against its canonical schema.
pub fn to_canonical(
    spec: &IcebergPartitionSpec,
    schema: &CanonicalSchema,
) -> SyncResult<PartitionSpec> {
    let index = schema.field_id_index();
    let mut fields = Vec::with_capacity(spec.fields.len());
    for field in &spec.fields {
        let path = index
            .get(&field.source_id)
            .context(InvalidPartitionSpecSnafu {
                detail: format!("partition source id {} not in schema", field.source_id),
            })?;
        let source = schema
            .field_at_path(path)
            .context(InvalidPartitionSpecSnafu {
                detail: format!("partition source '{path}' not in schema"),
            })?;
        let transform = parse_transform(&field.transform)?;
        if transform.is_time_granularity() {
            ensure!(
                source.schema.kind.is_temporal(),
                InvalidPartitionSpecSnafu {
                    detail: format!(
                        "{transform} transform over non-temporal column '{path}'"
                    ),
                }
            );
        }
        fields.push(PartitionField {
            source_path: path.clone(),
            source_field_id: field.source_id,
            source_kind: source.schema.kind,
            source_metadata: source.schema.metadata.clone(),
            transform,
        });
    }
    Ok(PartitionSpec::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalField, CanonicalKind};
    use crate::schema::annotate_field_ids;

    fn schema() -> CanonicalSchema {
        annotate_field_ids(&CanonicalSchema::record(vec![
            CanonicalField::nullable("part_col", CanonicalKind::String),
            CanonicalField::nullable("ts", CanonicalKind::Timestamp),
        ]))
    }

    #[test]
    fn value_transform_becomes_identity() {
        let schema = schema();
        let canonical = PartitionSpec::new(vec![PartitionField {
            source_path: "part_col".to_string(),
            source_field_id: 1,
            source_kind: CanonicalKind::String,
            source_metadata: Default::default(),
            transform: TransformType::Value,
        }]);
        let emitted = from_canonical(&canonical, &schema, 0).unwrap();
        assert_eq!(emitted.fields.len(), 1);
        assert_eq!(emitted.fields[0].transform, "identity");
        assert_eq!(emitted.fields[0].name, "part_col");
        assert_eq!(emitted.fields[0].source_id, 1);
        assert_eq!(emitted.fields[0].field_id, 1000);
    }

    #[test]
    fn time_transforms_stay_native() {
        let schema = schema();
        let canonical = PartitionSpec::new(vec![PartitionField {
            source_path: "ts".to_string(),
            source_field_id: 2,
            source_kind: CanonicalKind::Timestamp,
            source_metadata: Default::default(),
            transform: TransformType::Hour,
        }]);
        let emitted = from_canonical(&canonical, &schema, 0).unwrap();
        assert_eq!(emitted.fields[0].transform, "hour");
        assert_eq!(emitted.fields[0].name, "ts_hour");

        let back = to_canonical(&emitted, &schema).unwrap();
        assert_eq!(back, canonical);
    }

    #[test]
    fn bucket_and_truncate_roundtrip() {
        let schema = schema();
        let canonical = PartitionSpec::new(vec![PartitionField {
            source_path: "part_col".to_string(),
            source_field_id: 1,
            source_kind: CanonicalKind::String,
            source_metadata: Default::default(),
            transform: TransformType::Bucket(16),
        }]);
        let emitted = from_canonical(&canonical, &schema, 0).unwrap();
        assert_eq!(emitted.fields[0].transform, "bucket[16]");
        let back = to_canonical(&emitted, &schema).unwrap();
        assert_eq!(back.fields[0].transform, TransformType::Bucket(16));
    }

    #[test]
    fn unknown_transform_is_unsupported() {
        let schema = schema();
        let spec = IcebergPartitionSpec {
            spec_id: 0,
            fields: vec![IcebergPartitionField {
                name: "x".to_string(),
                transform: "void".to_string(),
                source_id: 1,
                field_id: 1000,
            }],
        };
        assert!(to_canonical(&spec, &schema).is_err());
    }
}
