//! Partition spec translation and partition value serialization.
//!
//! Value-transform dimensions serialize the scalar in the source type's
//! lexical form; time-granularity transforms format the range maximum with
//! the transform's date format. Null partition values serialize to the Hive
//! convention token so directory layouts and manifest layouts agree.
pub mod delta;
pub mod iceberg;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use snafu::prelude::*;

use crate::error::{
    InvalidPartitionSpecSnafu, SyncResult, UnsupportedPartitionTransformSnafu,
};
use crate::model::{
    CanonicalKind, PartitionField, PartitionValue, Range, Scalar, TimestampPrecision,
    TransformType, TypeMetadata,
};

/// Token used for null partition values.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Serialize one partition dimension's value for a file.
pub fn serialize_partition_value(value: &PartitionValue) -> SyncResult<String> {
    let range = match &value.range {
        None => return Ok(HIVE_DEFAULT_PARTITION.to_string()),
        Some(range) => range,
    };
    match value.field.transform {
        TransformType::Value => serialize_scalar(range.max(), &value.field.source_metadata),
        transform if transform.is_time_granularity() => {
            let format = transform
                .date_format()
                .expect("time granularity has a date format");
            let instant = scalar_to_datetime(range.max(), &value.field.source_metadata)?;
            Ok(instant.format(format).to_string())
        }
        transform => UnsupportedPartitionTransformSnafu {
            detail: format!("cannot serialize values of transform {transform}"),
        }
        .fail(),
    }
}

/// Invert [`serialize_partition_value`], modulo the transform's precision
/// loss (an hour value truncates sub-hour detail, and so on).
pub fn deserialize_partition_value(
    field: &PartitionField,
    raw: &str,
) -> SyncResult<Option<Range>> {
    if raw == HIVE_DEFAULT_PARTITION {
        return Ok(None);
    }
    let scalar = match field.transform {
        TransformType::Value => {
            deserialize_scalar(raw, field.source_kind, &field.source_metadata)?
        }
        transform if transform.is_time_granularity() => {
            let truncated = parse_truncated_instant(raw, transform)?;
            datetime_to_scalar(truncated, field.source_kind, &field.source_metadata)?
        }
        transform => {
            return UnsupportedPartitionTransformSnafu {
                detail: format!("cannot deserialize values of transform {transform}"),
            }
            .fail();
        }
    };
    Ok(Some(Range::scalar(scalar)))
}

/// `col=value/...` directory path for a file's partition values, `None` for
/// unpartitioned files.
pub fn partition_path(
    values: &[PartitionValue],
    column_names: &[String],
) -> SyncResult<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    let mut segments = Vec::with_capacity(values.len());
    for (value, name) in values.iter().zip(column_names) {
        segments.push(format!("{name}={}", serialize_partition_value(value)?));
    }
    Ok(Some(segments.join("/")))
}

/// Format a scalar in its type's lexical form.
pub fn serialize_scalar(scalar: &Scalar, metadata: &TypeMetadata) -> SyncResult<String> {
    let out = match scalar {
        Scalar::Boolean(v) => v.to_string(),
        Scalar::Int(v) => v.to_string(),
        Scalar::Long(v) => v.to_string(),
        Scalar::Float(v) => v.to_string(),
        Scalar::Double(v) => v.to_string(),
        Scalar::String(v) => v.clone(),
        Scalar::Date(days) => date_from_days(*days)
            .context(InvalidPartitionSpecSnafu {
                detail: format!("date value {days} out of range"),
            })?
            .format("%Y-%m-%d")
            .to_string(),
        Scalar::Timestamp(raw) => {
            let instant = instant_from_raw(*raw, metadata).context(InvalidPartitionSpecSnafu {
                detail: format!("timestamp value {raw} out of range"),
            })?;
            instant.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
        }
        Scalar::Decimal { unscaled, scale } => format_decimal(*unscaled, *scale),
        Scalar::Bytes(_) => {
            return UnsupportedPartitionTransformSnafu {
                detail: "binary partition values have no lexical form".to_string(),
            }
            .fail();
        }
    };
    Ok(out)
}

/// Parse a lexical partition value back into a scalar of the given kind.
pub fn deserialize_scalar(
    raw: &str,
    kind: CanonicalKind,
    metadata: &TypeMetadata,
) -> SyncResult<Scalar> {
    let parse_err = |detail: String| InvalidPartitionSpecSnafu { detail }.build();
    let scalar = match kind {
        CanonicalKind::Boolean => Scalar::Boolean(
            raw.parse()
                .map_err(|_| parse_err(format!("invalid boolean '{raw}'")))?,
        ),
        CanonicalKind::Int => Scalar::Int(
            raw.parse()
                .map_err(|_| parse_err(format!("invalid int '{raw}'")))?,
        ),
        CanonicalKind::Long => Scalar::Long(
            raw.parse()
                .map_err(|_| parse_err(format!("invalid long '{raw}'")))?,
        ),
        CanonicalKind::Float => Scalar::Float(
            raw.parse()
                .map_err(|_| parse_err(format!("invalid float '{raw}'")))?,
        ),
        CanonicalKind::Double => Scalar::Double(
            raw.parse()
                .map_err(|_| parse_err(format!("invalid double '{raw}'")))?,
        ),
        CanonicalKind::String | CanonicalKind::Enum => Scalar::String(raw.to_string()),
        CanonicalKind::Date => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| parse_err(format!("invalid date '{raw}'")))?;
            Scalar::Date(days_from_date(date))
        }
        CanonicalKind::Timestamp | CanonicalKind::TimestampNtz => {
            let instant = parse_instant(raw)
                .ok_or_else(|| parse_err(format!("invalid timestamp '{raw}'")))?;
            datetime_to_scalar(instant, kind, metadata)?
        }
        CanonicalKind::Decimal => {
            let scale = metadata.decimal_scale.unwrap_or(0);
            parse_decimal_scalar(raw, scale)
                .ok_or_else(|| parse_err(format!("invalid decimal '{raw}'")))?
        }
        other => {
            return UnsupportedPartitionTransformSnafu {
                detail: format!("cannot partition by {other} values"),
            }
            .fail();
        }
    };
    Ok(scalar)
}

fn format_decimal(unscaled: i128, scale: i32) -> String {
    if scale <= 0 {
        let factor = 10i128.checked_pow(scale.unsigned_abs()).unwrap_or(1);
        return (unscaled.saturating_mul(factor)).to_string();
    }
    let negative = unscaled < 0;
    let digits = unscaled.unsigned_abs().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits
    };
    let split = padded.len() - scale;
    let (int_part, frac_part) = padded.split_at(split);
    let sign = if negative { "-" } else { "" };
    format!("{sign}{int_part}.{frac_part}")
}

fn parse_decimal_scalar(raw: &str, scale: i32) -> Option<Scalar> {
    let negative = raw.starts_with('-');
    let digits = raw.trim_start_matches('-');
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if scale < 0 || frac_part.len() > scale as usize {
        return None;
    }
    let mut combined = String::with_capacity(int_part.len() + scale as usize);
    combined.push_str(int_part);
    combined.push_str(frac_part);
    combined.push_str(&"0".repeat(scale as usize - frac_part.len()));
    let mut unscaled: i128 = combined.parse().ok()?;
    if negative {
        unscaled = -unscaled;
    }
    Some(Scalar::Decimal { unscaled, scale })
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + 719_163)
}

fn days_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - 719_163
}

fn instant_from_raw(raw: i64, metadata: &TypeMetadata) -> Option<DateTime<Utc>> {
    match metadata.timestamp_precision {
        Some(TimestampPrecision::Millis) => Utc.timestamp_millis_opt(raw).single(),
        _ => DateTime::from_timestamp_micros(raw),
    }
}

/// Project a scalar onto the UTC timeline for date formatting.
fn scalar_to_datetime(scalar: &Scalar, metadata: &TypeMetadata) -> SyncResult<DateTime<Utc>> {
    let instant = match scalar {
        Scalar::Timestamp(raw) => instant_from_raw(*raw, metadata),
        Scalar::Date(days) => {
            date_from_days(*days).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc())
        }
        _ => None,
    };
    instant.context(InvalidPartitionSpecSnafu {
        detail: format!("value {scalar:?} is not a time instant"),
    })
}

fn datetime_to_scalar(
    instant: DateTime<Utc>,
    kind: CanonicalKind,
    metadata: &TypeMetadata,
) -> SyncResult<Scalar> {
    let scalar = match kind {
        CanonicalKind::Date => Scalar::Date(days_from_date(instant.date_naive())),
        CanonicalKind::Timestamp | CanonicalKind::TimestampNtz => {
            match metadata.timestamp_precision {
                Some(TimestampPrecision::Millis) => Scalar::Timestamp(instant.timestamp_millis()),
                _ => Scalar::Timestamp(instant.timestamp_micros()),
            }
        }
        other => {
            return InvalidPartitionSpecSnafu {
                detail: format!("time transform over non-temporal kind {other}"),
            }
            .fail();
        }
    };
    Ok(scalar)
}

pub(crate) fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Engines also write a space-separated form without an offset.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_truncated_instant(raw: &str, transform: TransformType) -> SyncResult<DateTime<Utc>> {
    let invalid = || {
        InvalidPartitionSpecSnafu {
            detail: format!("invalid {transform} partition value '{raw}'"),
        }
        .build()
    };
    let date = match transform {
        TransformType::Year => {
            let year: i32 = raw.parse().map_err(|_| invalid())?;
            NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?
        }
        TransformType::Month => {
            let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
            NaiveDate::from_ymd_opt(
                year.parse().map_err(|_| invalid())?,
                month.parse().map_err(|_| invalid())?,
                1,
            )
            .ok_or_else(invalid)?
        }
        TransformType::Day => {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?
        }
        TransformType::Hour => {
            let (date_part, hour_part) = raw.rsplit_once('-').ok_or_else(invalid)?;
            let date =
                NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| invalid())?;
            let hour: u32 = hour_part.parse().map_err(|_| invalid())?;
            return date
                .and_hms_opt(hour, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(invalid);
        }
        _ => return Err(invalid()),
    };
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_field(transform: TransformType) -> PartitionField {
        PartitionField {
            source_path: "ts".to_string(),
            source_field_id: 2,
            source_kind: CanonicalKind::Timestamp,
            source_metadata: TypeMetadata::timestamp(TimestampPrecision::Micros),
            transform,
        }
    }

    fn micros(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_micros()
    }

    #[test]
    fn value_transform_serializes_lexically() {
        let value = PartitionValue {
            field: PartitionField {
                source_path: "part_col".to_string(),
                source_field_id: 1,
                source_kind: CanonicalKind::String,
                source_metadata: TypeMetadata::default(),
                transform: TransformType::Value,
            },
            range: Some(Range::scalar(Scalar::String("SingleValue".to_string()))),
        };
        assert_eq!(serialize_partition_value(&value).unwrap(), "SingleValue");
    }

    #[test]
    fn null_value_serializes_to_hive_token() {
        let value = PartitionValue {
            field: time_field(TransformType::Day),
            range: None,
        };
        assert_eq!(
            serialize_partition_value(&value).unwrap(),
            HIVE_DEFAULT_PARTITION
        );
    }

    #[test]
    fn time_transforms_format_the_range_max() {
        let ts = micros("2023-06-15T13:45:10Z");
        let value = PartitionValue {
            field: time_field(TransformType::Hour),
            range: Some(Range::scalar(Scalar::Timestamp(ts))),
        };
        assert_eq!(serialize_partition_value(&value).unwrap(), "2023-06-15-13");

        let value = PartitionValue {
            field: time_field(TransformType::Month),
            range: Some(Range::scalar(Scalar::Timestamp(ts))),
        };
        assert_eq!(serialize_partition_value(&value).unwrap(), "2023-06");
    }

    #[test]
    fn roundtrip_is_identity_modulo_truncation() {
        for (transform, raw) in [
            (TransformType::Year, "2023"),
            (TransformType::Month, "2023-06"),
            (TransformType::Day, "2023-06-15"),
            (TransformType::Hour, "2023-06-15-13"),
        ] {
            let field = time_field(transform);
            let range = deserialize_partition_value(&field, raw)
                .unwrap()
                .expect("non-null");
            let value = PartitionValue {
                field,
                range: Some(range),
            };
            assert_eq!(serialize_partition_value(&value).unwrap(), raw);
        }
    }

    #[test]
    fn scalar_roundtrip_for_primitives() {
        let cases = [
            (CanonicalKind::Boolean, "true"),
            (CanonicalKind::Int, "42"),
            (CanonicalKind::Long, "-7"),
            (CanonicalKind::String, "plain"),
            (CanonicalKind::Date, "2020-02-29"),
        ];
        for (kind, raw) in cases {
            let metadata = TypeMetadata::default();
            let scalar = deserialize_scalar(raw, kind, &metadata).unwrap();
            assert_eq!(serialize_scalar(&scalar, &metadata).unwrap(), raw);
        }
    }

    #[test]
    fn decimal_serialization_respects_scale() {
        let metadata = TypeMetadata::decimal(10, 2);
        let scalar = Scalar::Decimal {
            unscaled: 12345,
            scale: 2,
        };
        assert_eq!(serialize_scalar(&scalar, &metadata).unwrap(), "123.45");

        let back = deserialize_scalar("123.45", CanonicalKind::Decimal, &metadata).unwrap();
        assert_eq!(back, scalar);

        let small = Scalar::Decimal {
            unscaled: 5,
            scale: 2,
        };
        assert_eq!(serialize_scalar(&small, &metadata).unwrap(), "0.05");
    }

    #[test]
    fn partition_path_joins_dimensions() {
        let values = vec![PartitionValue {
            field: PartitionField {
                source_path: "part_col".to_string(),
                source_field_id: 1,
                source_kind: CanonicalKind::String,
                source_metadata: TypeMetadata::default(),
                transform: TransformType::Value,
            },
            range: Some(Range::scalar(Scalar::String("a".to_string()))),
        }];
        let path = partition_path(&values, &["part_col".to_string()]).unwrap();
        assert_eq!(path.as_deref(), Some("part_col=a"));
        assert_eq!(partition_path(&[], &[]).unwrap(), None);
    }
}
