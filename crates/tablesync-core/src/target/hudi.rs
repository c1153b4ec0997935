//! Hudi target adapter.
//!
//! Maintains a copy-on-write timeline under `.hoodie/`: one completed
//! `.commit` (or `.replacecommit`) instant per applied change, written with
//! create-new semantics. The checkpoint and the table's Avro schema ride in
//! the commit metadata's `extraMetadata` map, which makes "commit landed,
//! checkpoint lost" impossible. File groups are keyed by file-name stem, so
//! a superseded base file is retired by naming its group in
//! `partitionToReplaceFileIds`.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{SyncResult, TargetStorageSnafu, TargetWriteSnafu};
use crate::formats::hudi_timeline::{
    self, HudiCommitMetadata, HudiWriteStat, Instant, InstantAction,
};
use crate::model::{
    Commit, DataFile, Snapshot, SyncCheckpoint, TableDescriptor, TableFormat, VersionToken,
};
use crate::schema::avro as avro_schema;
use crate::source::hudi::{PARTITION_FIELDS_PROP, SCHEMA_METADATA_KEY, TABLE_NAME_PROP};
use crate::storage::{self, StorageError};
use crate::target::{
    decode_checkpoint, encode_checkpoint, guard_version, reference_path, TargetAdapter,
    TargetTableHandle, LAST_SYNC_VERSION_PROP,
};

pub struct HudiTargetAdapter {
    handle: TargetTableHandle,
}

impl HudiTargetAdapter {
    pub fn new(handle: TargetTableHandle) -> Self {
        HudiTargetAdapter { handle }
    }

    async fn ensure_properties(&self, table: &TableDescriptor) -> SyncResult<()> {
        let rel = std::path::PathBuf::from(hudi_timeline::HOODIE_DIR)
            .join(hudi_timeline::PROPERTIES_FILE);
        match storage::read_to_string(&self.handle.location, &rel).await {
            Ok(_) => return Ok(()),
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => {
                return TargetWriteSnafu {
                    detail: format!("{}: {e}", hudi_timeline::PROPERTIES_FILE),
                }
                .fail();
            }
        }
        let partition_fields: Vec<&str> = table
            .partition_spec
            .fields
            .iter()
            .map(|f| f.source_name())
            .collect();
        let mut contents = format!(
            "{TABLE_NAME_PROP}={}\nhoodie.table.type=COPY_ON_WRITE\nhoodie.table.version=6\n",
            table.name
        );
        if !partition_fields.is_empty() {
            contents.push_str(&format!(
                "{PARTITION_FIELDS_PROP}={}\n",
                partition_fields.join(",")
            ));
        }
        storage::write_atomic(&self.handle.location, &rel, contents.as_bytes())
            .await
            .context(TargetStorageSnafu {
                detail: hudi_timeline::PROPERTIES_FILE.to_string(),
            })
    }

    /// Active file groups `(partition, file id) -> referenced path`, folded
    /// from the timeline.
    async fn active_groups(&self) -> SyncResult<HashMap<(String, String), String>> {
        let mut groups = HashMap::new();
        for instant in hudi_timeline::list_completed_instants(&self.handle.location).await? {
            let metadata =
                hudi_timeline::read_commit_metadata(&self.handle.location, &instant).await?;
            if instant.action == InstantAction::ReplaceCommit {
                for (partition, file_ids) in &metadata.partition_to_replace_file_ids {
                    for file_id in file_ids {
                        groups.remove(&(partition.clone(), file_id.clone()));
                    }
                }
            }
            for (partition, stats) in &metadata.partition_to_write_stats {
                for stat in stats {
                    groups.insert(
                        (partition.clone(), stat.file_id.clone()),
                        stat.path.clone(),
                    );
                }
            }
        }
        Ok(groups)
    }

    async fn latest_checkpoint(&self) -> SyncResult<Option<SyncCheckpoint>> {
        let instants = hudi_timeline::list_completed_instants(&self.handle.location).await?;
        for instant in instants.iter().rev() {
            let metadata =
                hudi_timeline::read_commit_metadata(&self.handle.location, instant).await?;
            if let Some(raw) = metadata.extra_metadata.get(LAST_SYNC_VERSION_PROP) {
                return Ok(Some(decode_checkpoint(raw)?));
            }
        }
        Ok(None)
    }

    /// A fresh instant string strictly after every completed instant.
    async fn next_instant(&self, at_ms: i64) -> SyncResult<String> {
        let mut candidate_ms = at_ms.max(1);
        if let Some(latest) = hudi_timeline::list_completed_instants(&self.handle.location)
            .await?
            .last()
        {
            let latest_ms = latest.epoch_ms()?;
            if candidate_ms <= latest_ms {
                candidate_ms = latest_ms + 1;
            }
        }
        hudi_timeline::instant_string(candidate_ms)
    }

    fn write_stat(&self, file: &DataFile) -> HudiWriteStat {
        let path = reference_path(&file.physical_path, &self.handle.location.base_path());
        HudiWriteStat {
            file_id: file_group_id(&path),
            path,
            num_writes: file.record_count as i64,
            num_deletes: 0,
            file_size_in_bytes: file.file_size_bytes as i64,
        }
    }

    fn schema_document(table: &TableDescriptor) -> SyncResult<String> {
        let avro = avro_schema::from_canonical(&table.read_schema, &table.name)?;
        Ok(avro.to_string())
    }

    async fn write_instant(
        &self,
        instant: &Instant,
        metadata: &HudiCommitMetadata,
    ) -> SyncResult<()> {
        let payload = serde_json::to_vec_pretty(metadata).map_err(|e| {
            TargetWriteSnafu {
                detail: format!("encoding instant {}: {e}", instant.timestamp),
            }
            .build()
        })?;
        storage::write_new(&self.handle.location, &instant.rel_path(), &payload)
            .await
            .context(TargetStorageSnafu {
                detail: format!("instant {}", instant.timestamp),
            })
    }
}

fn file_group_id(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".parquet").unwrap_or(name).to_string()
}

/// A file's partition directory: the source's own layout when it has one,
/// otherwise derived from the partition values (manifest-format sources
/// carry no directory paths).
fn partition_of(file: &DataFile) -> String {
    if let Some(path) = &file.partition_path {
        return path.clone();
    }
    let names: Vec<String> = file
        .partition_values
        .iter()
        .map(|v| v.field.source_name().to_string())
        .collect();
    crate::partition::partition_path(&file.partition_values, &names)
        .ok()
        .flatten()
        .unwrap_or_default()
}

#[async_trait]
impl TargetAdapter for HudiTargetAdapter {
    fn format(&self) -> TableFormat {
        TableFormat::Hudi
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn read_last_checkpoint(&mut self) -> SyncResult<Option<SyncCheckpoint>> {
        self.latest_checkpoint().await
    }

    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> SyncResult<SyncCheckpoint> {
        let stored = self.latest_checkpoint().await?;
        if let Some(existing) = guard_version(stored.as_ref(), &snapshot.source_version)? {
            debug!(version = %existing.last_source_version, "snapshot already applied");
            return Ok(existing);
        }
        self.ensure_properties(&snapshot.table).await?;

        let now_ms = Utc::now().timestamp_millis();
        let timestamp = self.next_instant(now_ms).await?;
        let checkpoint = SyncCheckpoint {
            last_source_version: snapshot.source_version.clone(),
            last_source_instant_ms: now_ms,
            target_metadata_version: timestamp.clone(),
        };

        let mut write_stats: HashMap<String, Vec<HudiWriteStat>> = HashMap::new();
        let mut snapshot_groups: HashMap<(String, String), ()> = HashMap::new();
        for file in snapshot.files.all_files() {
            let stat = self.write_stat(file);
            let partition = partition_of(file);
            snapshot_groups.insert((partition.clone(), stat.file_id.clone()), ());
            write_stats.entry(partition).or_default().push(stat);
        }

        // Groups the snapshot no longer references are replaced away.
        let mut replaced: HashMap<String, Vec<String>> = HashMap::new();
        for ((partition, file_id), _path) in self.active_groups().await? {
            if !snapshot_groups.contains_key(&(partition.clone(), file_id.clone())) {
                replaced.entry(partition).or_default().push(file_id);
            }
        }

        let action = if replaced.is_empty() {
            InstantAction::Commit
        } else {
            InstantAction::ReplaceCommit
        };
        let instant = Instant {
            timestamp,
            action,
        };
        let metadata = HudiCommitMetadata {
            partition_to_write_stats: write_stats,
            partition_to_replace_file_ids: replaced,
            extra_metadata: HashMap::from([
                (
                    LAST_SYNC_VERSION_PROP.to_string(),
                    encode_checkpoint(&checkpoint)?,
                ),
                (
                    SCHEMA_METADATA_KEY.to_string(),
                    Self::schema_document(&snapshot.table)?,
                ),
            ]),
            operation_type: "insert_overwrite_table".to_string(),
        };
        self.write_instant(&instant, &metadata).await?;
        Ok(checkpoint)
    }

    async fn apply_commit(&mut self, commit: &Commit) -> SyncResult<SyncCheckpoint> {
        let stored = self.latest_checkpoint().await?;
        if let Some(existing) = guard_version(stored.as_ref(), &commit.version)? {
            debug!(version = %existing.last_source_version, "commit already applied");
            return Ok(existing);
        }
        self.ensure_properties(&commit.table_after).await?;

        let timestamp = self.next_instant(commit.timestamp_ms).await?;
        let checkpoint = SyncCheckpoint {
            last_source_version: commit.version.clone(),
            last_source_instant_ms: commit.timestamp_ms,
            target_metadata_version: timestamp.clone(),
        };

        let mut write_stats: HashMap<String, Vec<HudiWriteStat>> = HashMap::new();
        for file in commit.files_diff.added() {
            let stat = self.write_stat(file);
            write_stats.entry(partition_of(file)).or_default().push(stat);
        }
        let mut replaced: HashMap<String, Vec<String>> = HashMap::new();
        for file in commit.files_diff.removed() {
            let path = reference_path(&file.physical_path, &self.handle.location.base_path());
            replaced
                .entry(partition_of(file))
                .or_default()
                .push(file_group_id(&path));
        }

        let action = if replaced.is_empty() {
            InstantAction::Commit
        } else {
            InstantAction::ReplaceCommit
        };
        let instant = Instant {
            timestamp,
            action,
        };
        let metadata = HudiCommitMetadata {
            partition_to_write_stats: write_stats,
            partition_to_replace_file_ids: replaced,
            extra_metadata: HashMap::from([
                (
                    LAST_SYNC_VERSION_PROP.to_string(),
                    encode_checkpoint(&checkpoint)?,
                ),
                (
                    SCHEMA_METADATA_KEY.to_string(),
                    Self::schema_document(&commit.table_after)?,
                ),
            ]),
            operation_type: "upsert".to_string(),
        };
        self.write_instant(&instant, &metadata).await?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CanonicalField, CanonicalKind, CanonicalSchema, DataFilesDiff, FileFormat,
        LayoutStrategy, PartitionSpec, PartitionedDataFiles, SchemaVersion,
    };
    use crate::storage::TableLocation;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn descriptor(base: &str) -> TableDescriptor {
        TableDescriptor {
            name: "orders".to_string(),
            format: TableFormat::Hudi,
            base_path: base.to_string(),
            read_schema: crate::schema::annotate_field_ids(&CanonicalSchema::record(vec![
                CanonicalField::nullable("value", CanonicalKind::Long),
            ])),
            partition_spec: PartitionSpec::unpartitioned(),
            layout: LayoutStrategy::Flat,
        }
    }

    fn file(base: &str, name: &str) -> DataFile {
        DataFile {
            physical_path: format!("{base}/{name}"),
            file_format: FileFormat::ApacheParquet,
            schema_version: Some(SchemaVersion(1)),
            partition_values: Vec::new(),
            partition_path: None,
            file_size_bytes: 1024,
            record_count: 50,
            last_modified_ms: 1_700_000_000_000,
            column_stats: HashMap::new(),
        }
    }

    fn snapshot(base: &str, names: &[&str], version: u64) -> Snapshot {
        let table = descriptor(base);
        Snapshot {
            schema_catalog: BTreeMap::from([(SchemaVersion(1), table.read_schema.clone())]),
            files: PartitionedDataFiles::from_files(
                names.iter().map(|n| file(base, n)).collect(),
            ),
            source_version: VersionToken::Number(version),
            table,
        }
    }

    fn adapter(tmp: &TempDir) -> HudiTargetAdapter {
        HudiTargetAdapter::new(TargetTableHandle {
            name: "orders".to_string(),
            location: TableLocation::local(tmp.path()),
        })
    }

    #[tokio::test]
    async fn snapshot_creates_timeline_and_properties() -> TestResult {
        let tmp = TempDir::new()?;
        let base = tmp.path().display().to_string();
        let mut target = adapter(&tmp);
        let cp = target.apply_snapshot(&snapshot(&base, &["f1.parquet"], 2)).await?;

        let instants =
            hudi_timeline::list_completed_instants(&TableLocation::local(tmp.path())).await?;
        assert_eq!(instants.len(), 1);
        assert_eq!(cp.target_metadata_version, instants[0].timestamp);
        assert!(tmp
            .path()
            .join(hudi_timeline::HOODIE_DIR)
            .join(hudi_timeline::PROPERTIES_FILE)
            .exists());

        let read_back = target.read_last_checkpoint().await?;
        assert_eq!(read_back, Some(cp));
        Ok(())
    }

    #[tokio::test]
    async fn commit_with_removals_is_a_replacecommit() -> TestResult {
        let tmp = TempDir::new()?;
        let base = tmp.path().display().to_string();
        let mut target = adapter(&tmp);
        target.apply_snapshot(&snapshot(&base, &["f1.parquet"], 1)).await?;

        let commit = Commit {
            version: VersionToken::Number(2),
            timestamp_ms: 1_700_000_100_000,
            files_diff: DataFilesDiff::new(
                vec![file(&base, "f2.parquet")],
                vec![file(&base, "f1.parquet")],
            )?,
            table_after: descriptor(&base),
        };
        target.apply_commit(&commit).await?;

        let groups = target.active_groups().await?;
        assert_eq!(groups.len(), 1);
        assert!(groups.values().any(|p| p.ends_with("f2.parquet")));
        Ok(())
    }

    #[tokio::test]
    async fn instants_are_strictly_increasing() -> TestResult {
        let tmp = TempDir::new()?;
        let base = tmp.path().display().to_string();
        let mut target = adapter(&tmp);
        target.apply_snapshot(&snapshot(&base, &["f1.parquet"], 1)).await?;

        // A commit whose source timestamp is older than the snapshot instant
        // still lands strictly after it on the timeline.
        let commit = Commit {
            version: VersionToken::Number(2),
            timestamp_ms: 1,
            files_diff: DataFilesDiff::new(vec![file(&base, "f2.parquet")], vec![])?,
            table_after: descriptor(&base),
        };
        target.apply_commit(&commit).await?;

        let instants =
            hudi_timeline::list_completed_instants(&TableLocation::local(tmp.path())).await?;
        assert_eq!(instants.len(), 2);
        assert!(instants[0].timestamp < instants[1].timestamp);
        Ok(())
    }
}
