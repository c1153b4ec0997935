//! Data files, partition groupings, and file-level diffs.
use std::collections::{HashMap, HashSet};

use snafu::prelude::*;

use crate::error::{InvalidDiffSnafu, SyncError, SyncResult};
use crate::model::partition::PartitionValue;
use crate::model::stat::ColumnStat;
use crate::model::SchemaVersion;

/// On-disk format of a data file.
///
/// Parquet is the only format every supported table format can reference
/// without rewriting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    ApacheParquet,
}

/// One physical data file as seen by the canonical model.
///
/// The physical path is an absolute location; writers must reference it
/// verbatim; copying or renaming data is out of the question.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub physical_path: String,
    pub file_format: FileFormat,
    /// Version of the schema the file was written under, when known.
    pub schema_version: Option<SchemaVersion>,
    /// Value ranges per partition dimension, in spec order.
    pub partition_values: Vec<PartitionValue>,
    /// Directory-layout partition string (`a=1/b=2`); `None` for manifest
    /// formats and unpartitioned tables.
    pub partition_path: Option<String>,
    pub file_size_bytes: u64,
    pub record_count: u64,
    pub last_modified_ms: i64,
    /// Per-column statistics keyed by field id. Empty when the source
    /// carried none.
    pub column_stats: HashMap<i32, ColumnStat>,
}

impl DataFile {
    /// Whether two files land in the same partition.
    pub fn same_partition(&self, other: &DataFile) -> bool {
        self.partition_values == other.partition_values
    }
}

/// Groups of data files sharing identical partition value vectors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionedDataFiles {
    groups: Vec<Vec<DataFile>>,
}

impl PartitionedDataFiles {
    /// Group files by their partition value vector.
    pub fn from_files(files: Vec<DataFile>) -> Self {
        let mut groups: Vec<Vec<DataFile>> = Vec::new();
        for file in files {
            match groups
                .iter_mut()
                .find(|g| g[0].same_partition(&file))
            {
                Some(group) => group.push(file),
                None => groups.push(vec![file]),
            }
        }
        PartitionedDataFiles { groups }
    }

    pub fn groups(&self) -> &[Vec<DataFile>] {
        &self.groups
    }

    /// Iterate all files regardless of grouping.
    pub fn all_files(&self) -> impl Iterator<Item = &DataFile> {
        self.groups.iter().flatten()
    }

    pub fn file_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

/// The file-level delta of one commit.
///
/// `added` and `removed` are disjoint by physical path; the constructor
/// rejects overlap. Removed entries only need the path and partition
/// identity, and stats on them are ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFilesDiff {
    added: Vec<DataFile>,
    removed: Vec<DataFile>,
}

impl DataFilesDiff {
    /// Build a diff, enforcing path disjointness.
    pub fn new(added: Vec<DataFile>, removed: Vec<DataFile>) -> SyncResult<Self> {
        let added_paths: HashSet<&str> =
            added.iter().map(|f| f.physical_path.as_str()).collect();
        for file in &removed {
            ensure!(
                !added_paths.contains(file.physical_path.as_str()),
                InvalidDiffSnafu {
                    path: file.physical_path.clone(),
                }
            );
        }
        Ok(DataFilesDiff { added, removed })
    }

    /// The empty diff of a metadata-only commit.
    pub fn empty() -> Self {
        DataFilesDiff::default()
    }

    pub fn added(&self) -> &[DataFile] {
        &self.added
    }

    pub fn removed(&self) -> &[DataFile] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The offending path of an [`SyncError::InvalidDiff`], if that is what
/// `err` is.
pub fn diff_error_path(err: &SyncError) -> Option<&str> {
    match err {
        SyncError::InvalidDiff { path, .. } => Some(path),
        _ => None,
    }
}
