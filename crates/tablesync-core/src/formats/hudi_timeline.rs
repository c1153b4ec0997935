//! Hudi timeline shapes shared by the source and target adapters.
//!
//! The timeline lives under `.hoodie/`: one file per instant, named
//! `<yyyyMMddHHmmssSSS>.<action>`. Completed commits carry a JSON commit
//! metadata document; replace commits additionally name the file groups they
//! retire. Fixed-width instant strings sort chronologically.
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{SourceReadSnafu, SyncResult};
use crate::storage::{self, StorageError, TableLocation};

/// Name of the timeline directory.
pub const HOODIE_DIR: &str = ".hoodie";
/// Table property file inside the timeline directory.
pub const PROPERTIES_FILE: &str = "hoodie.properties";

const INSTANT_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Completed timeline actions the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantAction {
    Commit,
    ReplaceCommit,
    Clean,
}

impl InstantAction {
    pub fn file_suffix(self) -> &'static str {
        match self {
            InstantAction::Commit => "commit",
            InstantAction::ReplaceCommit => "replacecommit",
            InstantAction::Clean => "clean",
        }
    }
}

/// One completed instant on the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instant {
    /// Fixed-width `yyyyMMddHHmmssSSS` timestamp string.
    pub timestamp: String,
    pub action: InstantAction,
}

impl Instant {
    /// Parse a completed instant file name; in-flight and requested instants
    /// (and foreign files) return `None`.
    pub fn parse_file_name(name: &str) -> Option<Instant> {
        let (timestamp, suffix) = name.split_once('.')?;
        if timestamp.len() != 17 || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let action = match suffix {
            "commit" => InstantAction::Commit,
            "replacecommit" => InstantAction::ReplaceCommit,
            "clean" => InstantAction::Clean,
            _ => return None,
        };
        Some(Instant {
            timestamp: timestamp.to_string(),
            action,
        })
    }

    pub fn rel_path(&self) -> PathBuf {
        PathBuf::from(HOODIE_DIR).join(format!("{}.{}", self.timestamp, self.action.file_suffix()))
    }

    /// The instant as epoch milliseconds.
    pub fn epoch_ms(&self) -> SyncResult<i64> {
        let parsed = chrono::NaiveDateTime::parse_from_str(&self.timestamp, INSTANT_FORMAT)
            .map_err(|e| {
                SourceReadSnafu {
                    detail: format!("invalid instant '{}': {e}", self.timestamp),
                }
                .build()
            })?;
        Ok(parsed.and_utc().timestamp_millis())
    }
}

/// Render an epoch-milliseconds timestamp as an instant string.
pub fn instant_string(epoch_ms: i64) -> SyncResult<String> {
    let instant: DateTime<Utc> =
        Utc.timestamp_millis_opt(epoch_ms)
            .single()
            .context(SourceReadSnafu {
                detail: format!("epoch ms {epoch_ms} out of range"),
            })?;
    Ok(instant.format(INSTANT_FORMAT).to_string())
}

/// Per-file write statistics inside commit metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HudiWriteStat {
    /// Path relative to the table root.
    pub path: String,
    /// File group id; by convention the file name stem.
    pub file_id: String,
    pub num_writes: i64,
    #[serde(default)]
    pub num_deletes: i64,
    pub file_size_in_bytes: i64,
}

/// The JSON document of a `.commit` or `.replacecommit` instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HudiCommitMetadata {
    #[serde(default)]
    pub partition_to_write_stats: HashMap<String, Vec<HudiWriteStat>>,
    /// File group ids retired by a replace commit, keyed by partition.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub partition_to_replace_file_ids: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub extra_metadata: HashMap<String, String>,
    #[serde(default)]
    pub operation_type: String,
}

/// List the completed instants on the timeline, chronological.
///
/// A missing `.hoodie` directory yields an empty timeline (fresh table).
pub async fn list_completed_instants(location: &TableLocation) -> SyncResult<Vec<Instant>> {
    let names = match storage::list_dir(location, &PathBuf::from(HOODIE_DIR)).await {
        Ok(names) => names,
        Err(StorageError::NotFound { .. }) => return Ok(Vec::new()),
        Err(e) => {
            return SourceReadSnafu {
                detail: format!("listing {HOODIE_DIR}: {e}"),
            }
            .fail();
        }
    };
    let mut instants: Vec<Instant> = names
        .iter()
        .filter_map(|n| Instant::parse_file_name(n))
        .collect();
    instants.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(instants)
}

/// Read and parse one instant's commit metadata.
pub async fn read_commit_metadata(
    location: &TableLocation,
    instant: &Instant,
) -> SyncResult<HudiCommitMetadata> {
    let contents = storage::read_to_string(location, &instant.rel_path())
        .await
        .map_err(|e| {
            SourceReadSnafu {
                detail: format!("instant {}: {e}", instant.timestamp),
            }
            .build()
        })?;
    if contents.trim().is_empty() {
        // Clean instants may be empty markers.
        return Ok(HudiCommitMetadata::default());
    }
    serde_json::from_str(&contents).map_err(|e| {
        SourceReadSnafu {
            detail: format!("instant {}: {e}", instant.timestamp),
        }
        .build()
    })
}
