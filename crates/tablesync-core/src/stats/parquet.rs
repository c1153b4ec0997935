//! Parquet footer statistics harvesting.
//!
//! Fallback for source entries that carry no statistics of their own: the
//! file's row-group column-chunk statistics are aggregated into canonical
//! per-field stats. Columns whose physical type cannot be interpreted under
//! the canonical schema simply contribute no range: absent, not invented.
use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::statistics::Statistics;

use crate::error::{SourceReadSnafu, SyncResult};
use crate::model::{CanonicalKind, CanonicalSchema, ColumnStat, Range, Scalar};
use crate::storage::{self, TableLocation};

/// Read a Parquet file's footer and project its statistics onto the schema.
pub async fn harvest_file_stats(
    location: &TableLocation,
    rel_path: &Path,
    schema: &CanonicalSchema,
) -> SyncResult<HashMap<i32, ColumnStat>> {
    let bytes = storage::read_bytes(location, rel_path).await.map_err(|e| {
        SourceReadSnafu {
            detail: format!("parquet footer of {}: {e}", rel_path.display()),
        }
        .build()
    })?;
    footer_stats(Bytes::from(bytes), schema, &rel_path.display().to_string())
}

fn footer_stats(
    bytes: Bytes,
    schema: &CanonicalSchema,
    path: &str,
) -> SyncResult<HashMap<i32, ColumnStat>> {
    let reader = SerializedFileReader::new(bytes).map_err(|e| {
        SourceReadSnafu {
            detail: format!("parquet footer of {path}: {e}"),
        }
        .build()
    })?;
    let meta = reader.metadata();

    // Column index in the parquet schema -> canonical field id.
    let leaves = meta.file_metadata().schema_descr().columns();
    let mut id_by_index: Vec<Option<(i32, CanonicalKind)>> = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        let canonical_path = canonical_path_of(&leaf.path().string());
        let field = schema.field_at_path(&canonical_path);
        id_by_index.push(field.and_then(|f| f.field_id.map(|id| (id, f.schema.kind))));
    }

    let mut out: HashMap<i32, ColumnStat> = HashMap::new();
    for rg in meta.row_groups() {
        for (index, col_meta) in rg.columns().iter().enumerate() {
            let Some((field_id, kind)) = id_by_index.get(index).copied().flatten() else {
                continue;
            };
            let entry = out.entry(field_id).or_default();
            entry.num_values = entry
                .num_values
                .saturating_add(col_meta.num_values().max(0) as u64);
            entry.total_size_bytes = entry
                .total_size_bytes
                .saturating_add(col_meta.compressed_size().max(0) as u64);

            let Some(stats) = col_meta.statistics() else {
                continue;
            };
            if let Some(nulls) = stats.null_count_opt() {
                entry.num_nulls = entry.num_nulls.saturating_add(nulls);
            }
            let bounds = chunk_bounds(stats, kind);
            if let Some((min, max)) = bounds {
                entry.range = merge_range(entry.range.take(), min, max);
            }
        }
    }
    Ok(out)
}

/// Map a parquet column path to the canonical dotted path. Parquet spells
/// list interiors as `col.list.element`; the map `key_value` level matches
/// the canonical synthesized segment directly.
fn canonical_path_of(parquet_path: &str) -> String {
    parquet_path.replace(".list.element", ".element")
}

fn merge_range(current: Option<Range>, min: Scalar, max: Scalar) -> Option<Range> {
    let (min, max) = match current {
        None => (min, max),
        Some(existing) => {
            let min = match existing.min().compare(&min) {
                Some(std::cmp::Ordering::Greater) => min,
                _ => existing.min().clone(),
            };
            let max = match existing.max().compare(&max) {
                Some(std::cmp::Ordering::Less) => max,
                _ => existing.max().clone(),
            };
            (min, max)
        }
    };
    Range::try_new(min, max)
}

fn chunk_bounds(stats: &Statistics, kind: CanonicalKind) -> Option<(Scalar, Scalar)> {
    match (stats, kind) {
        (Statistics::Boolean(s), CanonicalKind::Boolean) => Some((
            Scalar::Boolean(*s.min_opt()?),
            Scalar::Boolean(*s.max_opt()?),
        )),
        (Statistics::Int32(s), CanonicalKind::Int) => {
            Some((Scalar::Int(*s.min_opt()?), Scalar::Int(*s.max_opt()?)))
        }
        (Statistics::Int32(s), CanonicalKind::Date) => {
            Some((Scalar::Date(*s.min_opt()?), Scalar::Date(*s.max_opt()?)))
        }
        (Statistics::Int64(s), CanonicalKind::Long) => {
            Some((Scalar::Long(*s.min_opt()?), Scalar::Long(*s.max_opt()?)))
        }
        (Statistics::Int64(s), CanonicalKind::Timestamp | CanonicalKind::TimestampNtz) => Some((
            Scalar::Timestamp(*s.min_opt()?),
            Scalar::Timestamp(*s.max_opt()?),
        )),
        (Statistics::Float(s), CanonicalKind::Float) => {
            Some((Scalar::Float(*s.min_opt()?), Scalar::Float(*s.max_opt()?)))
        }
        (Statistics::Double(s), CanonicalKind::Double) => Some((
            Scalar::Double(*s.min_opt()?),
            Scalar::Double(*s.max_opt()?),
        )),
        (Statistics::ByteArray(s), CanonicalKind::String | CanonicalKind::Enum) => {
            let min = s.min_opt()?.as_utf8().ok()?.to_string();
            let max = s.max_opt()?.as_utf8().ok()?.to_string();
            Some((Scalar::String(min), Scalar::String(max)))
        }
        (Statistics::ByteArray(s), CanonicalKind::Bytes) => Some((
            Scalar::Bytes(s.min_opt()?.data().to_vec()),
            Scalar::Bytes(s.max_opt()?.data().to_vec()),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parquet_list_paths_map_to_canonical_paths() {
        assert_eq!(canonical_path_of("tags.list.element"), "tags.element");
        assert_eq!(
            canonical_path_of("attrs.key_value.value"),
            "attrs.key_value.value"
        );
        assert_eq!(canonical_path_of("plain"), "plain");
    }

    #[test]
    fn merge_range_widens_bounds() {
        let merged = merge_range(
            Range::try_new(Scalar::Int(5), Scalar::Int(10)),
            Scalar::Int(1),
            Scalar::Int(7),
        )
        .unwrap();
        assert_eq!(merged.min(), &Scalar::Int(1));
        assert_eq!(merged.max(), &Scalar::Int(10));
    }

    #[test]
    fn merge_range_drops_incomparable_bounds() {
        assert!(merge_range(None, Scalar::Int(1), Scalar::Long(2)).is_none());
    }
}
