//! Hudi source adapter.
//!
//! Folds the completed timeline instant by instant. Copy-on-write commits
//! replace whole file groups: a write stat for an existing `file_id` retires
//! the previous base file of that group and introduces the new one, which is
//! exactly the add/remove diff a target needs. Replace commits retire file
//! groups wholesale; clean instants touch no active files.
//!
//! Merge-on-read tables surface log-file write stats; those cannot be
//! represented without rewriting data and fail the round for this source.
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::warn;

use crate::error::{SourceReadSnafu, SyncResult, UnsupportedFeatureSnafu};
use crate::formats::hudi_timeline::{
    self, HudiCommitMetadata, HudiWriteStat, Instant, InstantAction,
};
use crate::model::{
    CanonicalSchema, Commit, CommitPlan, DataFile, DataFilesDiff, FileFormat, PartitionField,
    PartitionSpec, PartitionValue, PartitionedDataFiles, SchemaVersion, Snapshot, SyncAnchor,
    TableDescriptor, TableFormat, TransformType, VersionToken,
};
use crate::partition::deserialize_partition_value;
use crate::source::{ChangesCache, SourceAdapter, SourceTableHandle};
use crate::stats::parquet as parquet_stats;
use crate::storage::{self, StorageError};

/// Key of the Avro schema document inside commit extra metadata.
pub const SCHEMA_METADATA_KEY: &str = "schema";
/// Property naming the partition fields, comma separated.
pub const PARTITION_FIELDS_PROP: &str = "hoodie.table.partition.fields";
/// Property naming the table.
pub const TABLE_NAME_PROP: &str = "hoodie.table.name";

#[derive(Debug, Clone)]
struct ReplayState {
    instant: Option<String>,
    schema: CanonicalSchema,
    schema_version: SchemaVersion,
    schema_catalog: BTreeMap<SchemaVersion, CanonicalSchema>,
    schema_json: Option<String>,
    spec: PartitionSpec,
    /// Active base files keyed by (partition path, file group id).
    files: HashMap<(String, String), DataFile>,
    last_timestamp_ms: i64,
}

impl ReplayState {
    fn fresh() -> Self {
        ReplayState {
            instant: None,
            schema: CanonicalSchema::record(Vec::new()),
            schema_version: SchemaVersion(0),
            schema_catalog: BTreeMap::new(),
            schema_json: None,
            spec: PartitionSpec::unpartitioned(),
            files: HashMap::new(),
            last_timestamp_ms: 0,
        }
    }
}

pub struct HudiSourceAdapter {
    handle: SourceTableHandle,
    cache: ChangesCache<(Instant, HudiCommitMetadata)>,
    partition_fields: Option<Vec<String>>,
    state: Option<ReplayState>,
}

impl HudiSourceAdapter {
    pub fn new(handle: SourceTableHandle) -> Self {
        HudiSourceAdapter {
            handle,
            cache: ChangesCache::new(),
            partition_fields: None,
            state: None,
        }
    }

    async fn partition_fields(&mut self) -> SyncResult<Vec<String>> {
        if let Some(fields) = &self.partition_fields {
            return Ok(fields.clone());
        }
        let rel = PathBuf::from(hudi_timeline::HOODIE_DIR).join(hudi_timeline::PROPERTIES_FILE);
        let fields = match storage::read_to_string(&self.handle.location, &rel).await {
            Ok(contents) => parse_properties(&contents)
                .get(PARTITION_FIELDS_PROP)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            Err(StorageError::NotFound { .. }) => Vec::new(),
            Err(e) => {
                return SourceReadSnafu {
                    detail: format!("{}: {e}", hudi_timeline::PROPERTIES_FILE),
                }
                .fail();
            }
        };
        self.partition_fields = Some(fields.clone());
        Ok(fields)
    }

    fn descriptor(&self, state: &ReplayState) -> TableDescriptor {
        TableDescriptor {
            name: self.handle.name.clone(),
            format: TableFormat::Hudi,
            base_path: self.handle.location.base_path(),
            read_schema: state.schema.clone(),
            partition_spec: state.spec.clone(),
            layout: TableDescriptor::layout_for(&state.spec),
        }
    }

    fn apply_schema(&self, state: &mut ReplayState, metadata: &HudiCommitMetadata) -> SyncResult<()> {
        let Some(schema_json) = metadata.extra_metadata.get(SCHEMA_METADATA_KEY) else {
            return Ok(());
        };
        if state.schema_json.as_deref() == Some(schema_json.as_str()) {
            return Ok(());
        }
        let parsed: serde_json::Value = serde_json::from_str(schema_json).map_err(|e| {
            SourceReadSnafu {
                detail: format!("commit schema document: {e}"),
            }
            .build()
        })?;
        let schema = crate::schema::avro::to_canonical(&parsed)?;
        let spec = self.spec_for(&schema)?;
        state.schema_version = SchemaVersion(state.schema_version.0 + 1);
        state
            .schema_catalog
            .insert(state.schema_version, schema.clone());
        state.schema = schema;
        state.schema_json = Some(schema_json.clone());
        state.spec = spec;
        Ok(())
    }

    fn spec_for(&self, schema: &CanonicalSchema) -> SyncResult<PartitionSpec> {
        let names = self.partition_fields.clone().unwrap_or_default();
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let source = schema
                .field_at_path(&name)
                .context(SourceReadSnafu {
                    detail: format!("partition field '{name}' not in table schema"),
                })?;
            fields.push(PartitionField {
                source_path: name.clone(),
                source_field_id: source.field_id.context(SourceReadSnafu {
                    detail: format!("partition field '{name}' has no id"),
                })?,
                source_kind: source.schema.kind,
                source_metadata: source.schema.metadata.clone(),
                transform: TransformType::Value,
            });
        }
        Ok(PartitionSpec::new(fields))
    }

    async fn data_file_from_stat(
        &self,
        state: &ReplayState,
        partition: &str,
        stat: &HudiWriteStat,
        timestamp_ms: i64,
    ) -> SyncResult<DataFile> {
        ensure!(
            !stat.path.contains(".log."),
            UnsupportedFeatureSnafu {
                detail: format!(
                    "merge-on-read log file '{}' cannot be referenced without rewriting data",
                    stat.path
                ),
            }
        );

        let mut partition_values = Vec::with_capacity(state.spec.fields.len());
        if !state.spec.is_unpartitioned() {
            let segments: HashMap<&str, &str> = partition
                .split('/')
                .filter_map(|seg| seg.split_once('='))
                .collect();
            for field in &state.spec.fields {
                let range = match segments.get(field.source_name()) {
                    Some(raw) => deserialize_partition_value(field, raw)?,
                    None => None,
                };
                partition_values.push(PartitionValue {
                    field: field.clone(),
                    range,
                });
            }
        }

        let mut column_stats = HashMap::new();
        match parquet_stats::harvest_file_stats(
            &self.handle.location,
            &PathBuf::from(&stat.path),
            &state.schema,
        )
        .await
        {
            Ok(harvested) => column_stats = harvested,
            Err(e) => {
                warn!(path = %stat.path, error = %e, "no footer stats for base file");
            }
        }

        let physical_path = if stat.path.starts_with('/') || stat.path.contains("://") {
            stat.path.clone()
        } else {
            format!("{}/{}", self.handle.location.base_path(), stat.path)
        };
        Ok(DataFile {
            physical_path,
            file_format: FileFormat::ApacheParquet,
            schema_version: Some(state.schema_version),
            partition_values,
            partition_path: if partition.is_empty() {
                None
            } else {
                Some(partition.to_string())
            },
            file_size_bytes: stat.file_size_in_bytes.max(0) as u64,
            record_count: stat.num_writes.max(0) as u64,
            last_modified_ms: timestamp_ms,
            column_stats,
        })
    }

    async fn fold_instant(
        &mut self,
        state: &mut ReplayState,
        instant: &Instant,
        metadata: &HudiCommitMetadata,
    ) -> SyncResult<(Vec<DataFile>, Vec<DataFile>)> {
        let timestamp_ms = instant.epoch_ms()?;
        self.apply_schema(state, metadata)?;

        let mut added = Vec::new();
        let mut removed = Vec::new();

        if instant.action == InstantAction::ReplaceCommit {
            for (partition, file_ids) in &metadata.partition_to_replace_file_ids {
                for file_id in file_ids {
                    if let Some(file) =
                        state.files.remove(&(partition.clone(), file_id.clone()))
                    {
                        removed.push(file);
                    }
                }
            }
        }

        for (partition, stats) in &metadata.partition_to_write_stats {
            for stat in stats {
                let file = self
                    .data_file_from_stat(state, partition, stat, timestamp_ms)
                    .await?;
                let key = (partition.clone(), stat.file_id.clone());
                if let Some(previous) = state.files.insert(key, file.clone()) {
                    // A new file slice supersedes the group's previous base
                    // file.
                    if previous.physical_path != file.physical_path {
                        removed.push(previous);
                    }
                }
                added.push(file);
            }
        }

        state.instant = Some(instant.timestamp.clone());
        state.last_timestamp_ms = timestamp_ms;
        Ok((added, removed))
    }

    async fn replay_to(&mut self, target: &str) -> SyncResult<()> {
        self.partition_fields().await?;
        let keep = matches!(
            &self.state,
            Some(state) if state.instant.as_deref().map_or(true, |i| i <= target)
        );
        let mut state = if keep {
            self.state.take().expect("checked above")
        } else {
            ReplayState::fresh()
        };

        let timeline = hudi_timeline::list_completed_instants(&self.handle.location).await?;
        for instant in timeline {
            if instant.timestamp.as_str() > target {
                break;
            }
            if let Some(done) = &state.instant {
                if instant.timestamp.as_str() <= done.as_str() {
                    continue;
                }
            }
            let metadata = match self.cache.get(&VersionToken::Instant(instant.timestamp.clone()))
            {
                Some((_, metadata)) => metadata.clone(),
                None => hudi_timeline::read_commit_metadata(&self.handle.location, &instant)
                    .await?,
            };
            self.fold_instant(&mut state, &instant, &metadata).await?;
        }
        self.state = Some(state);
        Ok(())
    }
}

fn parse_properties(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[async_trait]
impl SourceAdapter for HudiSourceAdapter {
    fn format(&self) -> TableFormat {
        TableFormat::Hudi
    }

    async fn get_table(&mut self, at: &VersionToken) -> SyncResult<TableDescriptor> {
        let instant = require_instant(at)?;
        self.replay_to(instant).await?;
        Ok(self.descriptor(self.state.as_ref().expect("replayed state")))
    }

    async fn get_schema_catalog(
        &mut self,
        at: &VersionToken,
    ) -> SyncResult<BTreeMap<SchemaVersion, CanonicalSchema>> {
        let instant = require_instant(at)?;
        self.replay_to(instant).await?;
        Ok(self
            .state
            .as_ref()
            .expect("replayed state")
            .schema_catalog
            .clone())
    }

    async fn get_current_snapshot(&mut self) -> SyncResult<Snapshot> {
        let timeline = hudi_timeline::list_completed_instants(&self.handle.location).await?;
        let latest = timeline.last().context(SourceReadSnafu {
            detail: format!(
                "no completed instants under {}/{}",
                self.handle.location.base_path(),
                hudi_timeline::HOODIE_DIR
            ),
        })?;
        let latest_timestamp = latest.timestamp.clone();
        self.replay_to(&latest_timestamp).await?;
        let state = self.state.as_ref().expect("replayed state");
        let files: Vec<DataFile> = state.files.values().cloned().collect();
        Ok(Snapshot {
            table: self.descriptor(state),
            schema_catalog: state.schema_catalog.clone(),
            files: PartitionedDataFiles::from_files(files),
            source_version: VersionToken::Instant(latest_timestamp),
        })
    }

    async fn get_commit_state(&mut self, anchor: &SyncAnchor) -> SyncResult<CommitPlan> {
        let anchor_instant = match anchor.version.as_ref().and_then(VersionToken::as_instant) {
            Some(i) => i.to_string(),
            None => {
                return Ok(CommitPlan {
                    commits_to_process: Vec::new(),
                    must_do_full_sync: true,
                });
            }
        };
        let timeline = hudi_timeline::list_completed_instants(&self.handle.location).await?;
        let pending: Vec<Instant> = timeline
            .iter()
            .filter(|i| i.timestamp.as_str() > anchor_instant.as_str())
            .cloned()
            .collect();

        let anchor_known = timeline
            .iter()
            .any(|i| i.timestamp == anchor_instant);
        if !pending.is_empty() && !anchor_known {
            warn!(anchor = %anchor_instant, "anchor instant archived away");
            return Ok(CommitPlan {
                commits_to_process: Vec::new(),
                must_do_full_sync: true,
            });
        }

        self.cache.reset(VersionToken::Instant(anchor_instant));
        let mut tokens = Vec::with_capacity(pending.len());
        for instant in pending {
            match hudi_timeline::read_commit_metadata(&self.handle.location, &instant).await {
                Ok(metadata) => {
                    let token = VersionToken::Instant(instant.timestamp.clone());
                    self.cache.insert(token.clone(), (instant, metadata));
                    tokens.push(token);
                }
                Err(e) => {
                    warn!(instant = %instant.timestamp, error = %e, "pending instant unreadable");
                    return Ok(CommitPlan {
                        commits_to_process: Vec::new(),
                        must_do_full_sync: true,
                    });
                }
            }
        }
        Ok(CommitPlan {
            commits_to_process: tokens,
            must_do_full_sync: false,
        })
    }

    async fn get_commit(&mut self, version: &VersionToken) -> SyncResult<Commit> {
        let target = require_instant(version)?.to_string();
        let (instant, metadata) = match self.cache.get(version) {
            Some(cached) => cached.clone(),
            None => {
                let timeline =
                    hudi_timeline::list_completed_instants(&self.handle.location).await?;
                let instant = timeline
                    .into_iter()
                    .find(|i| i.timestamp == target)
                    .context(SourceReadSnafu {
                        detail: format!("instant {target} not on the timeline"),
                    })?;
                let metadata =
                    hudi_timeline::read_commit_metadata(&self.handle.location, &instant).await?;
                (instant, metadata)
            }
        };

        // State must sit just before this instant.
        if let Some(previous) = previous_instant(
            &hudi_timeline::list_completed_instants(&self.handle.location).await?,
            &target,
        ) {
            self.replay_to(&previous).await?;
        } else {
            self.partition_fields().await?;
            self.state = Some(ReplayState::fresh());
        }

        let mut state = self.state.take().expect("replayed state");
        let (added, removed) = self.fold_instant(&mut state, &instant, &metadata).await?;
        let table_after = self.descriptor(&state);
        let timestamp_ms = state.last_timestamp_ms;
        self.state = Some(state);
        Ok(Commit {
            version: version.clone(),
            timestamp_ms,
            files_diff: DataFilesDiff::new(added, removed)?,
            table_after,
        })
    }

    fn end_round(&mut self) {
        self.cache.clear();
        self.state = None;
        self.partition_fields = None;
    }
}

fn previous_instant(timeline: &[Instant], target: &str) -> Option<String> {
    timeline
        .iter()
        .map(|i| i.timestamp.as_str())
        .filter(|t| *t < target)
        .next_back()
        .map(str::to_string)
}

fn require_instant(token: &VersionToken) -> SyncResult<&str> {
    token.as_instant().context(SourceReadSnafu {
        detail: format!("hudi versions are timeline instants, got '{token}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn schema_json() -> String {
        json!({
            "type": "record",
            "name": "row",
            "fields": [
                {"name": "part_col", "type": ["null", "string"], "default": null},
                {"name": "value", "type": ["null", "long"], "default": null}
            ]
        })
        .to_string()
    }

    async fn write_instant(
        tmp: &TempDir,
        timestamp: &str,
        action: InstantAction,
        metadata: &HudiCommitMetadata,
    ) -> TestResult {
        let dir = tmp.path().join(hudi_timeline::HOODIE_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let name = format!("{timestamp}.{}", action.file_suffix());
        tokio::fs::write(dir.join(name), serde_json::to_vec(metadata)?).await?;
        Ok(())
    }

    fn commit_meta(partition: &str, files: &[(&str, &str, i64)]) -> HudiCommitMetadata {
        HudiCommitMetadata {
            partition_to_write_stats: HashMap::from([(
                partition.to_string(),
                files
                    .iter()
                    .map(|(path, file_id, rows)| HudiWriteStat {
                        path: path.to_string(),
                        file_id: file_id.to_string(),
                        num_writes: *rows,
                        num_deletes: 0,
                        file_size_in_bytes: 1024,
                    })
                    .collect(),
            )]),
            partition_to_replace_file_ids: HashMap::new(),
            extra_metadata: HashMap::from([(
                SCHEMA_METADATA_KEY.to_string(),
                schema_json(),
            )]),
            operation_type: "upsert".to_string(),
        }
    }

    fn adapter(tmp: &TempDir) -> HudiSourceAdapter {
        HudiSourceAdapter::new(SourceTableHandle {
            name: "orders".to_string(),
            location: crate::storage::TableLocation::local(tmp.path()),
        })
    }

    #[tokio::test]
    async fn snapshot_folds_completed_commits() -> TestResult {
        let tmp = TempDir::new()?;
        write_instant(
            &tmp,
            "20240101000000000",
            InstantAction::Commit,
            &commit_meta("", &[("f1_0.parquet", "f1", 50)]),
        )
        .await?;
        write_instant(
            &tmp,
            "20240102000000000",
            InstantAction::Commit,
            &commit_meta("", &[("f2_0.parquet", "f2", 25)]),
        )
        .await?;

        let mut adapter = adapter(&tmp);
        let snapshot = adapter.get_current_snapshot().await?;
        assert_eq!(snapshot.files.file_count(), 2);
        assert_eq!(
            snapshot.source_version,
            VersionToken::Instant("20240102000000000".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn upsert_supersedes_the_file_group() -> TestResult {
        let tmp = TempDir::new()?;
        write_instant(
            &tmp,
            "20240101000000000",
            InstantAction::Commit,
            &commit_meta("", &[("f1_0.parquet", "f1", 50)]),
        )
        .await?;
        write_instant(
            &tmp,
            "20240102000000000",
            InstantAction::Commit,
            &commit_meta("", &[("f1_1.parquet", "f1", 50)]),
        )
        .await?;

        let mut adapter = adapter(&tmp);
        let commit = adapter
            .get_commit(&VersionToken::Instant("20240102000000000".to_string()))
            .await?;
        assert_eq!(commit.files_diff.added().len(), 1);
        assert_eq!(commit.files_diff.removed().len(), 1);
        assert!(commit.files_diff.removed()[0]
            .physical_path
            .ends_with("f1_0.parquet"));

        let snapshot = adapter.get_current_snapshot().await?;
        assert_eq!(snapshot.files.file_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn merge_on_read_log_files_are_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        write_instant(
            &tmp,
            "20240101000000000",
            InstantAction::Commit,
            &commit_meta("", &[(".f1_0.log.1", "f1", 50)]),
        )
        .await?;

        let mut adapter = adapter(&tmp);
        let err = adapter
            .get_current_snapshot()
            .await
            .expect_err("log files are not representable");
        assert!(matches!(
            err,
            crate::error::SyncError::UnsupportedFeature { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn clean_instants_are_noop_diffs() -> TestResult {
        let tmp = TempDir::new()?;
        write_instant(
            &tmp,
            "20240101000000000",
            InstantAction::Commit,
            &commit_meta("", &[("f1_0.parquet", "f1", 50)]),
        )
        .await?;
        write_instant(
            &tmp,
            "20240102000000000",
            InstantAction::Clean,
            &HudiCommitMetadata::default(),
        )
        .await?;

        let mut adapter = adapter(&tmp);
        let commit = adapter
            .get_commit(&VersionToken::Instant("20240102000000000".to_string()))
            .await?;
        assert!(commit.files_diff.is_empty());
        Ok(())
    }
}
