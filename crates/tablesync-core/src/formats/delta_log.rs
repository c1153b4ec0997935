//! Delta transaction log shapes shared by the source and target adapters.
//!
//! A commit is one newline-delimited JSON file under `_delta_log/`, named by
//! its zero-padded version. Each line wraps exactly one action; unknown
//! action keys are preserved by serde's defaults so foreign writers do not
//! break replay.
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{SourceReadSnafu, SourceStorageSnafu, SyncResult};
use crate::storage::{self, StorageError, TableLocation};

/// Name of the transaction log directory.
pub const LOG_DIR: &str = "_delta_log";
/// Digits in a zero-padded commit file name.
pub const COMMIT_FILENAME_DIGITS: usize = 20;

/// Relative path of the commit file for `version`.
pub fn commit_rel_path(version: u64) -> PathBuf {
    PathBuf::from(LOG_DIR).join(format!(
        "{:0width$}.json",
        version,
        width = COMMIT_FILENAME_DIGITS
    ))
}

/// Extract the version from a commit file name, ignoring checkpoints and
/// other log artifacts.
pub fn parse_commit_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() != COMMIT_FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// One line of a commit file; exactly one action field is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<AddAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<RemoveAction>,
    #[serde(rename = "metaData", skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaDataAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolAction>,
    #[serde(rename = "commitInfo", skip_serializing_if = "Option::is_none")]
    pub commit_info: Option<CommitInfoAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<TxnAction>,
}

impl ActionLine {
    pub fn add(action: AddAction) -> Self {
        ActionLine {
            add: Some(action),
            ..Default::default()
        }
    }

    pub fn remove(action: RemoveAction) -> Self {
        ActionLine {
            remove: Some(action),
            ..Default::default()
        }
    }

    pub fn meta_data(action: MetaDataAction) -> Self {
        ActionLine {
            meta_data: Some(action),
            ..Default::default()
        }
    }

    pub fn protocol(action: ProtocolAction) -> Self {
        ActionLine {
            protocol: Some(action),
            ..Default::default()
        }
    }

    pub fn commit_info(action: CommitInfoAction) -> Self {
        ActionLine {
            commit_info: Some(action),
            ..Default::default()
        }
    }
}

/// An `add` action: a data file became part of the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddAction {
    /// Path relative to the table root.
    pub path: String,
    /// Serialized partition values; `null` entries mean a null value.
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    pub modification_time: i64,
    pub data_change: bool,
    /// Per-file statistics JSON, when the writer recorded them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

/// A `remove` action: a data file left the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoveAction {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, Option<String>>>,
}

/// File-format descriptor inside `metaData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatSpec {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        FormatSpec {
            provider: "parquet".to_string(),
            options: HashMap::new(),
        }
    }
}

/// A `metaData` action: table identity, schema, partitioning, properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetaDataAction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub format: FormatSpec,
    pub schema_string: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

/// A `protocol` action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAction {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
}

/// A `commitInfo` action. Only the fields replay cares about are modeled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfoAction {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// A `txn` action recording a streaming writer's progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TxnAction {
    pub app_id: String,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// List the commit versions present in the log, ascending.
///
/// A missing log directory yields an empty list (fresh table).
pub async fn list_versions(location: &TableLocation) -> SyncResult<Vec<u64>> {
    let names = match storage::list_dir(location, &PathBuf::from(LOG_DIR)).await {
        Ok(names) => names,
        Err(StorageError::NotFound { .. }) => return Ok(Vec::new()),
        Err(e) => {
            return SourceReadSnafu {
                detail: format!("listing {LOG_DIR}: {e}"),
            }
            .fail();
        }
    };
    let mut versions: Vec<u64> = names
        .iter()
        .filter_map(|n| parse_commit_file_name(n))
        .collect();
    versions.sort_unstable();
    Ok(versions)
}

/// Read and parse one commit file.
pub async fn read_commit(location: &TableLocation, version: u64) -> SyncResult<Vec<ActionLine>> {
    let rel = commit_rel_path(version);
    let contents = storage::read_to_string(location, &rel)
        .await
        .context(SourceStorageSnafu {
            detail: format!("commit {version}"),
        })?;
    let mut actions = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let action: ActionLine = serde_json::from_str(line).map_err(|e| {
            SourceReadSnafu {
                detail: format!("commit {version} line {}: {e}", line_no + 1),
            }
            .build()
        })?;
        actions.push(action);
    }
    Ok(actions)
}

/// Serialize actions as a newline-delimited commit payload.
pub fn encode_commit(actions: &[ActionLine]) -> SyncResult<Vec<u8>> {
    let mut out = Vec::new();
    for action in actions {
        let line = serde_json::to_vec(action).map_err(|e| {
            SourceReadSnafu {
                detail: format!("encoding action: {e}"),
            }
            .build()
        })?;
        out.extend_from_slice(&line);
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn commit_file_names_are_zero_padded() {
        let rel = commit_rel_path(7);
        assert_eq!(
            rel.to_str().unwrap(),
            "_delta_log/00000000000000000007.json"
        );
        assert_eq!(parse_commit_file_name("00000000000000000007.json"), Some(7));
        assert_eq!(parse_commit_file_name("7.json"), None);
        assert_eq!(
            parse_commit_file_name("00000000000000000007.checkpoint.parquet"),
            None
        );
    }

    #[tokio::test]
    async fn commit_roundtrips_through_the_log() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let actions = vec![
            ActionLine::commit_info(CommitInfoAction {
                timestamp: 1000,
                operation: Some("WRITE".to_string()),
            }),
            ActionLine::add(AddAction {
                path: "part-0000.parquet".to_string(),
                partition_values: HashMap::from([(
                    "part_col".to_string(),
                    Some("a".to_string()),
                )]),
                size: 512,
                modification_time: 1000,
                data_change: true,
                stats: Some(r#"{"numRecords":1}"#.to_string()),
            }),
        ];

        let payload = encode_commit(&actions)?;
        storage::write_new(&location, &commit_rel_path(0), &payload).await?;

        let back = read_commit(&location, 0).await?;
        assert_eq!(back, actions);

        let versions = list_versions(&location).await?;
        assert_eq!(versions, vec![0]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_log_means_no_versions() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        assert!(list_versions(&location).await?.is_empty());
        Ok(())
    }

    #[test]
    fn null_partition_values_survive_serde() {
        let add = AddAction {
            path: "p.parquet".to_string(),
            partition_values: HashMap::from([("part_col".to_string(), None)]),
            size: 1,
            modification_time: 0,
            data_change: true,
            stats: None,
        };
        let json = serde_json::to_string(&ActionLine::add(add.clone())).unwrap();
        assert!(json.contains(r#""partitionValues":{"part_col":null}"#));
        let back: ActionLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back.add, Some(add));
    }
}
