//! Sync configuration.
//!
//! The CLI deserializes this from a YAML document; every field can also be
//! set programmatically. Validation is explicit: a config that deserialized
//! cleanly can still be rejected.
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{ConfigSnafu, SyncResult};
use crate::formats::{delta_log, hudi_timeline, iceberg_meta};
use crate::model::TableFormat;
use crate::storage::{self, TableLocation};

fn default_incremental_max_commits() -> u32 {
    20
}

fn default_incremental_sync_enabled() -> bool {
    true
}

fn default_sync_timeout_ms() -> u64 {
    600_000
}

/// Configuration of one source table and its sync targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the source table.
    pub table_name: String,
    /// Base path of the table root.
    pub table_base_path: String,
    /// Source format; inferred from the path contents when omitted.
    #[serde(default)]
    pub source_format: Option<TableFormat>,
    /// Formats to emit; must not be empty.
    pub target_table_formats: Vec<TableFormat>,
    /// Opaque credential map handed to the filesystem layer.
    #[serde(default)]
    pub hadoop_conf: HashMap<String, String>,
    /// Pending-commit threshold above which incremental falls back to a
    /// snapshot sync.
    #[serde(default = "default_incremental_max_commits")]
    pub incremental_max_commits: u32,
    /// `false` disables incremental sync globally.
    #[serde(default = "default_incremental_sync_enabled")]
    pub incremental_sync_enabled: bool,
    /// Hard ceiling on a single sync round.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl SyncConfig {
    /// Reject configurations a round cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        ensure!(
            !self.table_base_path.trim().is_empty(),
            ConfigSnafu {
                detail: "table_base_path must not be empty".to_string(),
            }
        );
        ensure!(
            !self.target_table_formats.is_empty(),
            ConfigSnafu {
                detail: "target_table_formats must name at least one format".to_string(),
            }
        );
        ensure!(
            self.incremental_max_commits >= 1,
            ConfigSnafu {
                detail: format!(
                    "incremental_max_commits must be at least 1, got {}",
                    self.incremental_max_commits
                ),
            }
        );
        Ok(())
    }

    /// The source format, configured or inferred from the table directory.
    pub async fn resolve_source_format(
        &self,
        location: &TableLocation,
    ) -> SyncResult<TableFormat> {
        if let Some(format) = self.source_format {
            return Ok(format);
        }
        infer_source_format(location).await
    }

    /// Reject target sets that would write over the source's own metadata.
    pub fn validate_against_source(&self, source_format: TableFormat) -> SyncResult<()> {
        ensure!(
            !self.target_table_formats.contains(&source_format),
            ConfigSnafu {
                detail: format!(
                    "target format {source_format} is the source format of this table"
                ),
            }
        );
        Ok(())
    }
}

/// A batch document: several tables synced by one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRunnerConfig {
    pub tables: Vec<SyncConfig>,
}

/// Infer the source format from the table directory's marker files.
///
/// Ambiguity (several formats present) and a bare directory are both
/// configuration errors; silent guessing would sync the wrong log.
pub async fn infer_source_format(location: &TableLocation) -> SyncResult<TableFormat> {
    let mut found = Vec::new();
    let checks: [(TableFormat, PathBuf); 3] = [
        (TableFormat::Delta, PathBuf::from(delta_log::LOG_DIR)),
        (TableFormat::Iceberg, iceberg_meta::version_hint_file()),
        (
            TableFormat::Hudi,
            PathBuf::from(hudi_timeline::HOODIE_DIR),
        ),
    ];
    for (format, marker) in checks {
        let present = storage::exists(location, &marker).await.map_err(|e| {
            ConfigSnafu {
                detail: format!("probing {}: {e}", location.base_path()),
            }
            .build()
        })?;
        if present {
            found.push(format);
        }
    }
    match found.as_slice() {
        [single] => Ok(*single),
        [] => ConfigSnafu {
            detail: format!(
                "no table format markers under {}; set source_format explicitly",
                location.base_path()
            ),
        }
        .fail(),
        several => ConfigSnafu {
            detail: format!(
                "ambiguous table formats {several:?} under {}; set source_format explicitly",
                location.base_path()
            ),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn config(targets: Vec<TableFormat>) -> SyncConfig {
        SyncConfig {
            table_name: "t".to_string(),
            table_base_path: "/data/t".to_string(),
            source_format: None,
            target_table_formats: targets,
            hadoop_conf: HashMap::new(),
            incremental_max_commits: default_incremental_max_commits(),
            incremental_sync_enabled: true,
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }

    #[test]
    fn empty_target_set_is_rejected() {
        let err = config(vec![]).validate().expect_err("no targets");
        assert!(matches!(err, crate::error::SyncError::Config { .. }));
        assert!(config(vec![TableFormat::Iceberg]).validate().is_ok());
    }

    #[test]
    fn source_format_cannot_be_a_target() {
        let cfg = config(vec![TableFormat::Iceberg, TableFormat::Hudi]);
        assert!(cfg.validate_against_source(TableFormat::Iceberg).is_err());
        assert!(cfg.validate_against_source(TableFormat::Delta).is_ok());
    }

    #[test]
    fn zero_max_commits_is_rejected() {
        let mut cfg = config(vec![TableFormat::Iceberg]);
        cfg.incremental_max_commits = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_apply_when_fields_are_omitted() {
        let yaml = r#"
            table_name: people
            table_base_path: /data/people
            target_table_formats: [ICEBERG, HUDI]
        "#;
        let cfg: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.incremental_max_commits, 20);
        assert!(cfg.incremental_sync_enabled);
        assert_eq!(cfg.sync_timeout_ms, 600_000);
        assert_eq!(
            cfg.target_table_formats,
            vec![TableFormat::Iceberg, TableFormat::Hudi]
        );
    }

    #[tokio::test]
    async fn inference_detects_a_delta_table() -> TestResult {
        let tmp = TempDir::new()?;
        tokio::fs::create_dir_all(tmp.path().join(delta_log::LOG_DIR)).await?;
        let location = TableLocation::local(tmp.path());
        assert_eq!(infer_source_format(&location).await?, TableFormat::Delta);
        Ok(())
    }

    #[tokio::test]
    async fn inference_rejects_ambiguous_directories() -> TestResult {
        let tmp = TempDir::new()?;
        tokio::fs::create_dir_all(tmp.path().join(delta_log::LOG_DIR)).await?;
        tokio::fs::create_dir_all(tmp.path().join(hudi_timeline::HOODIE_DIR)).await?;
        let location = TableLocation::local(tmp.path());
        assert!(infer_source_format(&location).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn inference_rejects_bare_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        assert!(infer_source_format(&location).await.is_err());
        Ok(())
    }
}
