//! Partition fields, transforms, and specs.
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::model::schema::{CanonicalKind, TypeMetadata};
use crate::model::stat::Range;

/// How a partition value is derived from its source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformType {
    /// The column value itself.
    Value,
    Year,
    Month,
    Day,
    Hour,
    /// Hash bucket with the given count.
    Bucket(u32),
    /// Value truncated to the given width.
    Truncate(u32),
}

impl TransformType {
    /// Whether this transform derives a time granularity from its source.
    pub fn is_time_granularity(self) -> bool {
        matches!(
            self,
            TransformType::Year | TransformType::Month | TransformType::Day | TransformType::Hour
        )
    }

    /// The chrono format string used when serializing values of a time
    /// granularity transform.
    pub fn date_format(self) -> Option<&'static str> {
        match self {
            TransformType::Year => Some("%Y"),
            TransformType::Month => Some("%Y-%m"),
            TransformType::Day => Some("%Y-%m-%d"),
            TransformType::Hour => Some("%Y-%m-%d-%H"),
            _ => None,
        }
    }

    /// Rank for picking the finest of several granularities; larger is finer.
    pub fn granularity_rank(self) -> Option<u8> {
        match self {
            TransformType::Year => Some(1),
            TransformType::Month => Some(2),
            TransformType::Day => Some(3),
            TransformType::Hour => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for TransformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformType::Value => write!(f, "VALUE"),
            TransformType::Year => write!(f, "YEAR"),
            TransformType::Month => write!(f, "MONTH"),
            TransformType::Day => write!(f, "DAY"),
            TransformType::Hour => write!(f, "HOUR"),
            TransformType::Bucket(n) => write!(f, "BUCKET_{n}"),
            TransformType::Truncate(w) => write!(f, "TRUNCATE_{w}"),
        }
    }
}

/// A partition dimension: a source schema field plus a transform.
///
/// Equality and hashing consider only the source field id and the transform,
/// so two specs agree on a dimension regardless of how the source column was
/// spelled.
#[derive(Debug, Clone)]
pub struct PartitionField {
    /// Dotted path of the source field in the canonical schema.
    pub source_path: String,
    /// Identity of the source field.
    pub source_field_id: i32,
    /// Kind of the source field, needed to pick the lexical form of values.
    pub source_kind: CanonicalKind,
    /// Logical-type details of the source field.
    pub source_metadata: TypeMetadata,
    pub transform: TransformType,
}

impl PartitionField {
    /// Last segment of the source path, the bare column name.
    pub fn source_name(&self) -> &str {
        self.source_path
            .rsplit('.')
            .next()
            .unwrap_or(&self.source_path)
    }
}

impl PartialEq for PartitionField {
    fn eq(&self, other: &Self) -> bool {
        self.source_field_id == other.source_field_id && self.transform == other.transform
    }
}

impl Eq for PartitionField {}

impl Hash for PartitionField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_field_id.hash(state);
        self.transform.hash(state);
    }
}

/// Ordered sequence of partition fields; empty means unpartitioned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionSpec {
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        PartitionSpec { fields: Vec::new() }
    }

    pub fn new(fields: Vec<PartitionField>) -> Self {
        PartitionSpec { fields }
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One partition dimension's value range for a single data file.
///
/// Time granularity transforms carry the source column's raw range; the
/// serialized form is derived from `range.max()` with the transform's date
/// format.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionValue {
    pub field: PartitionField,
    /// `None` when the partition value is null.
    pub range: Option<Range>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: i32, transform: TransformType) -> PartitionField {
        PartitionField {
            source_path: format!("col{id}"),
            source_field_id: id,
            source_kind: CanonicalKind::Timestamp,
            source_metadata: TypeMetadata::default(),
            transform,
        }
    }

    #[test]
    fn equality_ignores_spelling() {
        let mut a = field(7, TransformType::Day);
        let b = field(7, TransformType::Day);
        a.source_path = "renamed".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn equality_distinguishes_transforms() {
        assert_ne!(field(7, TransformType::Day), field(7, TransformType::Hour));
        assert_ne!(field(7, TransformType::Day), field(8, TransformType::Day));
    }

    #[test]
    fn granularity_rank_orders_hour_finest() {
        assert!(
            TransformType::Hour.granularity_rank() > TransformType::Day.granularity_rank()
        );
        assert!(TransformType::Day.granularity_rank() > TransformType::Month.granularity_rank());
        assert!(TransformType::Value.granularity_rank().is_none());
    }
}
