//! Table-level descriptors.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::partition::PartitionSpec;
use crate::model::schema::CanonicalSchema;

/// The supported table formats, as sources and as targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableFormat {
    Delta,
    Iceberg,
    Hudi,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Delta => write!(f, "DELTA"),
            TableFormat::Iceberg => write!(f, "ICEBERG"),
            TableFormat::Hudi => write!(f, "HUDI"),
        }
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DELTA" => Ok(TableFormat::Delta),
            "ICEBERG" => Ok(TableFormat::Iceberg),
            "HUDI" => Ok(TableFormat::Hudi),
            other => Err(format!("unknown table format: {other}")),
        }
    }
}

/// How data files are laid out under the table root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutStrategy {
    /// All files directly under the base path.
    Flat,
    /// `col=value/` directory hierarchy per partition dimension.
    DirHierarchyPartitionValues,
}

/// A table's identity and shape at one point in its history.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    pub format: TableFormat,
    /// Absolute base path of the table root.
    pub base_path: String,
    /// The schema readers should use at this point.
    pub read_schema: CanonicalSchema,
    pub partition_spec: PartitionSpec,
    pub layout: LayoutStrategy,
}

impl TableDescriptor {
    /// Layout implied by the partition spec: partitioned directory-layout
    /// tables use value hierarchies, everything else is flat.
    pub fn layout_for(spec: &PartitionSpec) -> LayoutStrategy {
        if spec.is_unpartitioned() {
            LayoutStrategy::Flat
        } else {
            LayoutStrategy::DirHierarchyPartitionValues
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_roundtrips_through_strings() {
        for format in [TableFormat::Delta, TableFormat::Iceberg, TableFormat::Hudi] {
            let parsed: TableFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
        assert!("CSV".parse::<TableFormat>().is_err());
    }

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!("iceberg".parse::<TableFormat>(), Ok(TableFormat::Iceberg));
    }
}
