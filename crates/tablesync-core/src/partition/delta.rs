//! Delta partition translation, including generated columns.
//!
//! Delta encodes time-granularity partitioning as *generated columns*: extra
//! partition-only columns whose values are derived from a source column by a
//! declared expression. The accepted expressions are `YEAR(col)`,
//! `MONTH(col)`, `DAY(col)`, `HOUR(col)`, `CAST(col AS DATE)`, and
//! `DATE_FORMAT(col, 'fmt')` with the four literal patterns below. Anything
//! else, bucket and truncate expressions in particular, is rejected, never
//! guessed at.
//!
//! Writers commonly emit coarse companions next to a fine granularity (an
//! hourly layout also materializes day, month, and year columns over the same
//! source). Those collapse to a single canonical dimension of the finest
//! granularity; duplicate granularities of the same level are an invalid
//! spec.
use std::collections::HashMap;

use snafu::prelude::*;

use crate::error::{
    InvalidPartitionSpecSnafu, SyncResult, UnsupportedPartitionTransformSnafu,
};
use crate::model::{
    CanonicalSchema, DataFile, PartitionField, PartitionSpec, TransformType,
};
use crate::partition::serialize_partition_value;
use crate::schema::delta::DeltaFieldInfo;

const DATE_FORMAT_FOR_YEAR: &str = "yyyy";
const DATE_FORMAT_FOR_MONTH: &str = "yyyy-MM";
const DATE_FORMAT_FOR_DAY: &str = "yyyy-MM-dd";
const DATE_FORMAT_FOR_HOUR: &str = "yyyy-MM-dd-HH";

/// Name prefix of synthesized partition columns on the way *out* of the
/// canonical model.
const PARTITION_COL_NAME_PREFIX: &str = "onetable_partition_col";

/// A generated column to add to an emitted Delta schema.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedColumnSpec {
    pub column_name: String,
    pub expression: String,
    /// Delta type string of the generated column.
    pub delta_type: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedExpr {
    source_column: String,
    transform: TransformType,
}

/// Canonicalize a Delta partition layout.
///
/// `partition_columns` is the ordered `partitionColumns` list from the
/// `metaData` action; `fields` describes the top-level schema fields with
/// their generation expressions. The canonical schema must already carry
/// field ids.
pub fn to_canonical(
    schema: &CanonicalSchema,
    partition_columns: &[String],
    fields: &[DeltaFieldInfo],
) -> SyncResult<PartitionSpec> {
    Ok(to_canonical_with_columns(schema, partition_columns, fields)?.0)
}

/// Like [`to_canonical`], additionally returning, per canonical dimension,
/// the Delta partition column that carries its serialized value (after a
/// granularity collapse this is the finest generated column).
pub fn to_canonical_with_columns(
    schema: &CanonicalSchema,
    partition_columns: &[String],
    fields: &[DeltaFieldInfo],
) -> SyncResult<(PartitionSpec, Vec<String>)> {
    if partition_columns.is_empty() {
        return Ok((PartitionSpec::unpartitioned(), Vec::new()));
    }
    let by_name: HashMap<&str, &DeltaFieldInfo> =
        fields.iter().map(|f| (f.name.as_str(), f)).collect();

    // Parse every generated partition column first so collapse sees the
    // whole picture.
    let mut parsed: Vec<(usize, ParsedExpr)> = Vec::new();
    let mut plain: Vec<(usize, &str)> = Vec::new();
    for (position, column) in partition_columns.iter().enumerate() {
        let info = by_name
            .get(column.as_str())
            .context(InvalidPartitionSpecSnafu {
                detail: format!("partition column '{column}' not in schema"),
            })?;
        match &info.generation_expression {
            Some(expr) => parsed.push((position, parse_generated_expression(expr)?)),
            None => plain.push((position, column.as_str())),
        }
    }

    // Collapse granularities per source column; finest wins, duplicate
    // levels are invalid. The ordering position is the first appearance of
    // the source column, the value position follows the finest column.
    let mut collapsed: Vec<(usize, usize, ParsedExpr)> = Vec::new();
    for (position, expr) in parsed {
        match collapsed
            .iter_mut()
            .find(|(_, _, kept)| kept.source_column == expr.source_column)
        {
            None => collapsed.push((position, position, expr)),
            Some((order_pos, value_pos, kept)) => {
                let new_rank = expr.transform.granularity_rank();
                let kept_rank = kept.transform.granularity_rank();
                ensure!(
                    new_rank != kept_rank,
                    InvalidPartitionSpecSnafu {
                        detail: format!(
                            "duplicate {} granularity over column '{}'",
                            expr.transform, expr.source_column
                        ),
                    }
                );
                if new_rank > kept_rank {
                    *kept = expr;
                    *order_pos = position.min(*order_pos);
                    *value_pos = position;
                }
            }
        }
    }

    let mut dimensions: Vec<(usize, PartitionField, String)> = Vec::new();
    for (position, name) in plain {
        dimensions.push((position, value_field(schema, name)?, name.to_string()));
    }
    for (order_pos, value_pos, expr) in collapsed {
        let field = transform_field(schema, &expr.source_column, expr.transform)?;
        dimensions.push((order_pos, field, partition_columns[value_pos].clone()));
    }
    dimensions.sort_by_key(|(position, _, _)| *position);

    let columns = dimensions.iter().map(|(_, _, c)| c.clone()).collect();
    let spec = PartitionSpec::new(dimensions.into_iter().map(|(_, f, _)| f).collect());
    Ok((spec, columns))
}

fn value_field(schema: &CanonicalSchema, path: &str) -> SyncResult<PartitionField> {
    let source = schema
        .field_at_path(path)
        .context(InvalidPartitionSpecSnafu {
            detail: format!("partition source '{path}' not in schema"),
        })?;
    Ok(PartitionField {
        source_path: path.to_string(),
        source_field_id: source.field_id.context(InvalidPartitionSpecSnafu {
            detail: format!("partition source '{path}' has no field id"),
        })?,
        source_kind: source.schema.kind,
        source_metadata: source.schema.metadata.clone(),
        transform: TransformType::Value,
    })
}

fn transform_field(
    schema: &CanonicalSchema,
    path: &str,
    transform: TransformType,
) -> SyncResult<PartitionField> {
    let mut field = value_field(schema, path)?;
    ensure!(
        field.source_kind.is_temporal(),
        InvalidPartitionSpecSnafu {
            detail: format!(
                "{transform} transform over non-temporal column '{path}' ({})",
                field.source_kind
            ),
        }
    );
    field.transform = transform;
    Ok(field)
}

fn parse_generated_expression(expr: &str) -> SyncResult<ParsedExpr> {
    let unsupported = |detail: String| UnsupportedPartitionTransformSnafu { detail }.build();

    if let Some(column) = strip_call(expr, "YEAR") {
        return Ok(ParsedExpr {
            source_column: column,
            transform: TransformType::Year,
        });
    }
    if let Some(column) = strip_call(expr, "MONTH") {
        return Ok(ParsedExpr {
            source_column: column,
            transform: TransformType::Month,
        });
    }
    if let Some(column) = strip_call(expr, "DAY") {
        return Ok(ParsedExpr {
            source_column: column,
            transform: TransformType::Day,
        });
    }
    if let Some(column) = strip_call(expr, "HOUR") {
        return Ok(ParsedExpr {
            source_column: column,
            transform: TransformType::Hour,
        });
    }
    if let Some(inner) = strip_call(expr, "CAST") {
        // CAST(col AS DATE) has the default day format.
        let column = inner
            .strip_suffix("AS DATE")
            .or_else(|| inner.strip_suffix("as DATE"))
            .map(str::trim)
            .ok_or_else(|| unsupported(format!("CAST expression '{expr}'")))?;
        return Ok(ParsedExpr {
            source_column: column.to_string(),
            transform: TransformType::Day,
        });
    }
    if let Some(inner) = strip_call(expr, "DATE_FORMAT") {
        let (column, format) = inner
            .split_once(',')
            .ok_or_else(|| unsupported(format!("DATE_FORMAT expression '{expr}'")))?;
        let format = format.trim().trim_matches('\'');
        let transform = match format {
            DATE_FORMAT_FOR_YEAR => TransformType::Year,
            DATE_FORMAT_FOR_MONTH => TransformType::Month,
            DATE_FORMAT_FOR_DAY => TransformType::Day,
            DATE_FORMAT_FOR_HOUR => TransformType::Hour,
            other => {
                return Err(unsupported(format!(
                    "date format '{other}' in generated expression"
                )));
            }
        };
        return Ok(ParsedExpr {
            source_column: column.trim().to_string(),
            transform,
        });
    }
    Err(unsupported(format!("generated expression '{expr}'")))
}

fn strip_call(expr: &str, function: &str) -> Option<String> {
    let inner = expr
        .trim()
        .strip_prefix(function)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    Some(inner.trim().to_string())
}

fn generated_column_name(field: &PartitionField) -> String {
    format!(
        "{PARTITION_COL_NAME_PREFIX}_{}_{}",
        field.transform,
        field.source_name()
    )
}

fn date_format_literal(transform: TransformType) -> &'static str {
    match transform {
        TransformType::Year => DATE_FORMAT_FOR_YEAR,
        TransformType::Month => DATE_FORMAT_FOR_MONTH,
        TransformType::Day => DATE_FORMAT_FOR_DAY,
        _ => DATE_FORMAT_FOR_HOUR,
    }
}

/// Emit a canonical spec as Delta partition columns.
///
/// Returns the ordered `partitionColumns` list and the generated columns to
/// append to the emitted schema.
pub fn from_canonical(
    spec: &PartitionSpec,
) -> SyncResult<(Vec<String>, Vec<GeneratedColumnSpec>)> {
    let mut columns = Vec::with_capacity(spec.fields.len());
    let mut generated = Vec::new();
    for field in &spec.fields {
        match field.transform {
            TransformType::Value => columns.push(field.source_name().to_string()),
            TransformType::Year => {
                let name = generated_column_name(field);
                generated.push(GeneratedColumnSpec {
                    column_name: name.clone(),
                    expression: format!("YEAR({})", field.source_path),
                    delta_type: "integer",
                });
                columns.push(name);
            }
            TransformType::Month | TransformType::Hour => {
                let name = generated_column_name(field);
                generated.push(GeneratedColumnSpec {
                    column_name: name.clone(),
                    expression: format!(
                        "DATE_FORMAT({}, '{}')",
                        field.source_path,
                        date_format_literal(field.transform)
                    ),
                    delta_type: "string",
                });
                columns.push(name);
            }
            TransformType::Day => {
                let name = generated_column_name(field);
                generated.push(GeneratedColumnSpec {
                    column_name: name.clone(),
                    expression: format!("CAST({} AS DATE)", field.source_path),
                    delta_type: "date",
                });
                columns.push(name);
            }
            transform => {
                return UnsupportedPartitionTransformSnafu {
                    detail: format!("{transform} has no Delta generated-column form"),
                }
                .fail();
            }
        }
    }
    Ok((columns, generated))
}

/// Serialize a file's partition values keyed by Delta partition column name.
pub fn serialize_partition_values(file: &DataFile) -> SyncResult<HashMap<String, String>> {
    let mut out = HashMap::with_capacity(file.partition_values.len());
    for value in &file.partition_values {
        let column = if value.field.transform == TransformType::Value {
            value.field.source_name().to_string()
        } else {
            generated_column_name(&value.field)
        };
        out.insert(column, serialize_partition_value(value)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::{CanonicalField, CanonicalKind};
    use crate::schema::annotate_field_ids;

    fn schema() -> CanonicalSchema {
        annotate_field_ids(&CanonicalSchema::record(vec![
            CanonicalField::nullable("part_col", CanonicalKind::String),
            CanonicalField::nullable("ts", CanonicalKind::Timestamp),
            CanonicalField::nullable("value", CanonicalKind::Long),
        ]))
    }

    fn info(name: &str, expr: Option<&str>) -> DeltaFieldInfo {
        DeltaFieldInfo {
            name: name.to_string(),
            generation_expression: expr.map(str::to_string),
        }
    }

    #[test]
    fn plain_columns_become_value_transforms() {
        let spec = to_canonical(
            &schema(),
            &["part_col".to_string()],
            &[info("part_col", None)],
        )
        .unwrap();
        assert_eq!(spec.fields.len(), 1);
        assert_eq!(spec.fields[0].transform, TransformType::Value);
        assert_eq!(spec.fields[0].source_path, "part_col");
    }

    #[test]
    fn granularity_chain_collapses_to_finest() {
        let columns: Vec<String> = ["y", "m", "d", "h"].iter().map(|s| s.to_string()).collect();
        let fields = vec![
            info("y", Some("YEAR(ts)")),
            info("m", Some("MONTH(ts)")),
            info("d", Some("DAY(ts)")),
            info("h", Some("HOUR(ts)")),
        ];
        let (spec, value_columns) =
            to_canonical_with_columns(&schema(), &columns, &fields).unwrap();
        assert_eq!(spec.fields.len(), 1);
        assert_eq!(spec.fields[0].transform, TransformType::Hour);
        assert_eq!(spec.fields[0].source_path, "ts");
        // Values come from the finest generated column.
        assert_eq!(value_columns, vec!["h".to_string()]);
    }

    #[test]
    fn duplicate_granularity_is_invalid() {
        let columns: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let fields = vec![
            info("a", Some("DAY(ts)")),
            info("b", Some("CAST(ts AS DATE)")),
        ];
        let err = to_canonical(&schema(), &columns, &fields).expect_err("two day transforms");
        assert!(matches!(err, SyncError::InvalidPartitionSpec { .. }));
    }

    #[test]
    fn date_format_patterns_map_by_literal() {
        for (fmt, expected) in [
            ("yyyy", TransformType::Year),
            ("yyyy-MM", TransformType::Month),
            ("yyyy-MM-dd", TransformType::Day),
            ("yyyy-MM-dd-HH", TransformType::Hour),
        ] {
            let expr = format!("DATE_FORMAT(ts, '{fmt}')");
            let parsed = parse_generated_expression(&expr).unwrap();
            assert_eq!(parsed.transform, expected);
            assert_eq!(parsed.source_column, "ts");
        }
    }

    #[test]
    fn unknown_date_format_is_unsupported() {
        let err = parse_generated_expression("DATE_FORMAT(ts, 'MM-dd')")
            .expect_err("pattern not in the accepted table");
        assert!(matches!(
            err,
            SyncError::UnsupportedPartitionTransform { .. }
        ));
    }

    #[test]
    fn bucket_like_expressions_are_rejected_outright() {
        let err = parse_generated_expression("HASH(ts) % 16").expect_err("not a time transform");
        assert!(matches!(
            err,
            SyncError::UnsupportedPartitionTransform { .. }
        ));
    }

    #[test]
    fn time_transform_over_string_column_is_invalid() {
        let err = to_canonical(
            &schema(),
            &["g".to_string()],
            &[info("g", Some("YEAR(part_col)"))],
        )
        .expect_err("string column cannot carry a year transform");
        assert!(matches!(err, SyncError::InvalidPartitionSpec { .. }));
    }

    #[test]
    fn emission_synthesizes_generated_columns() {
        let columns: Vec<String> = ["h"].iter().map(|s| s.to_string()).collect();
        let fields = vec![info("h", Some("HOUR(ts)"))];
        let spec = to_canonical(&schema(), &columns, &fields).unwrap();

        let (names, generated) = from_canonical(&spec).unwrap();
        assert_eq!(names, vec!["onetable_partition_col_HOUR_ts".to_string()]);
        assert_eq!(generated.len(), 1);
        assert_eq!(
            generated[0].expression,
            "DATE_FORMAT(ts, 'yyyy-MM-dd-HH')"
        );
        assert_eq!(generated[0].delta_type, "string");
    }

    #[test]
    fn emission_roundtrips_through_parsing() {
        let columns: Vec<String> = ["d"].iter().map(|s| s.to_string()).collect();
        let fields = vec![info("d", Some("CAST(ts AS DATE)"))];
        let spec = to_canonical(&schema(), &columns, &fields).unwrap();

        let (names, generated) = from_canonical(&spec).unwrap();
        let reparsed_fields: Vec<DeltaFieldInfo> = generated
            .iter()
            .map(|g| info(&g.column_name, Some(&g.expression)))
            .collect();
        let reparsed = to_canonical(&schema(), &names, &reparsed_fields).unwrap();
        assert_eq!(reparsed, spec);
    }
}
