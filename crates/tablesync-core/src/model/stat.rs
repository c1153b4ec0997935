//! Scalar values, ranges, and per-column statistics.
use std::cmp::Ordering;

/// A single typed value carried in statistics and partition ranges.
///
/// Temporal variants store raw integers; their unit (days, millis, micros)
/// is dictated by the owning schema field's kind and metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i32),
    /// Instant in the schema's declared precision (millis or micros).
    Timestamp(i64),
    /// Unscaled decimal with its scale.
    Decimal { unscaled: i128, scale: i32 },
}

impl Scalar {
    /// Compare two scalars of the same variant under the type's natural
    /// order. Mixed variants (and NaN floats) are incomparable.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Boolean(a), Scalar::Boolean(b)) => Some(a.cmp(b)),
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Long(a), Scalar::Long(b)) => Some(a.cmp(b)),
            (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
            (Scalar::Double(a), Scalar::Double(b)) => a.partial_cmp(b),
            (Scalar::String(a), Scalar::String(b)) => Some(a.cmp(b)),
            (Scalar::Bytes(a), Scalar::Bytes(b)) => Some(a.cmp(b)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => Some(a.cmp(b)),
            (
                Scalar::Decimal {
                    unscaled: a,
                    scale: sa,
                },
                Scalar::Decimal {
                    unscaled: b,
                    scale: sb,
                },
            ) if sa == sb => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// A closed interval `[min, max]` under the scalar type's natural order.
///
/// Point values are represented as `Range::scalar(v)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    min: Scalar,
    max: Scalar,
}

impl Range {
    /// Build a range, refusing pairs that are incomparable or inverted.
    pub fn try_new(min: Scalar, max: Scalar) -> Option<Range> {
        match min.compare(&max)? {
            Ordering::Greater => None,
            _ => Some(Range { min, max }),
        }
    }

    /// The degenerate range holding a single value.
    pub fn scalar(value: Scalar) -> Range {
        Range {
            min: value.clone(),
            max: value,
        }
    }

    pub fn min(&self) -> &Scalar {
        &self.min
    }

    pub fn max(&self) -> &Scalar {
        &self.max
    }
}

/// Per-column statistics for one data file.
///
/// Absent statistics are `None`/empty, never sentinel values: a file with no
/// stats has an empty column-stat map, and a column with unknown bounds has
/// `range: None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnStat {
    pub range: Option<Range>,
    pub num_nulls: u64,
    pub num_values: u64,
    pub total_size_bytes: u64,
}
