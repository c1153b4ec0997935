//! Commits, snapshots, and sync checkpoints.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::file::{DataFilesDiff, PartitionedDataFiles};
use crate::model::schema::CanonicalSchema;
use crate::model::table::TableDescriptor;

/// A source format's commit identifier.
///
/// Log-structured formats use dense integer versions; timeline formats use
/// fixed-width instant strings whose lexicographic order is chronological.
/// Tokens are only ever compared within one source format, so ordering across
/// variants is by discriminant and never exercised in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionToken {
    Number(u64),
    Instant(String),
}

impl VersionToken {
    /// The integer version, for sources that use one.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            VersionToken::Number(n) => Some(*n),
            VersionToken::Instant(_) => None,
        }
    }

    /// The instant string, for timeline sources.
    pub fn as_instant(&self) -> Option<&str> {
        match self {
            VersionToken::Number(_) => None,
            VersionToken::Instant(s) => Some(s),
        }
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionToken::Number(a), VersionToken::Number(b)) => a.cmp(b),
            (VersionToken::Instant(a), VersionToken::Instant(b)) => a.cmp(b),
            (VersionToken::Number(_), VersionToken::Instant(_)) => Ordering::Less,
            (VersionToken::Instant(_), VersionToken::Number(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Number(n) => write!(f, "{n}"),
            VersionToken::Instant(s) => write!(f, "{s}"),
        }
    }
}

/// Position of a schema in a table's evolution history.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SchemaVersion(pub u32);

/// A full point-in-time view of a source table.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub table: TableDescriptor,
    /// Every schema version observed up to this point.
    pub schema_catalog: BTreeMap<SchemaVersion, CanonicalSchema>,
    pub files: PartitionedDataFiles,
    pub source_version: VersionToken,
}

/// One atomic source commit translated to the canonical model.
///
/// Schema evolution is conveyed by `table_after.read_schema` differing from
/// the previous commit's schema; field identity is preserved by field id.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub version: VersionToken,
    pub timestamp_ms: i64,
    pub files_diff: DataFilesDiff,
    /// Table state after this commit is applied.
    pub table_after: TableDescriptor,
}

/// Incremental-sync plan returned by a source adapter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitPlan {
    /// Commits strictly after the checkpoint, ascending.
    pub commits_to_process: Vec<VersionToken>,
    /// Set when the source cannot serve incremental changes from the
    /// checkpoint (truncated or unreadable log).
    pub must_do_full_sync: bool,
}

/// The point a sync round resumes from, derived from the target checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAnchor {
    pub instant_ms: i64,
    pub version: Option<VersionToken>,
}

/// Per-target marker of the last source commit applied.
///
/// Persisted inside the target's own metadata in the same atomic unit as the
/// target commit, so the pair can never diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub last_source_version: VersionToken,
    pub last_source_instant_ms: i64,
    /// Opaque token naming the target metadata version that carries this
    /// checkpoint.
    pub target_metadata_version: String,
}

impl SyncCheckpoint {
    /// The anchor a source adapter should resume after.
    pub fn anchor(&self) -> SyncAnchor {
        SyncAnchor {
            instant_ms: self.last_source_instant_ms,
            version: Some(self.last_source_version.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_tokens_order_by_value() {
        assert!(VersionToken::Number(2) < VersionToken::Number(10));
    }

    #[test]
    fn instant_tokens_order_lexicographically() {
        // Fixed-width instants make lexicographic order chronological.
        assert!(
            VersionToken::Instant("20240101000000000".to_string())
                < VersionToken::Instant("20240102000000000".to_string())
        );
    }

    #[test]
    fn checkpoint_serializes_to_stable_json() {
        let cp = SyncCheckpoint {
            last_source_version: VersionToken::Number(4),
            last_source_instant_ms: 1_700_000_000_000,
            target_metadata_version: "7".to_string(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: SyncCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }
}
