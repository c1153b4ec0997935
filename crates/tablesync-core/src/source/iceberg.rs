//! Iceberg source adapter.
//!
//! Reads the metadata document named by `metadata/version-hint.text`, then
//! walks the snapshot chain by sequence number. Each snapshot's manifest list
//! names the manifests it introduced; added and removed files are the entries
//! whose status matches the snapshot. Sequence numbers are the version
//! tokens.
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::warn;

use crate::error::{SourceReadSnafu, SourceVersionMissingSnafu, SyncResult};
use crate::formats::iceberg_meta::{
    self, IcebergSnapshot, ManifestDataFile, TableMetadata, STATUS_ADDED, STATUS_DELETED,
};
use crate::model::{
    CanonicalSchema, Commit, CommitPlan, DataFile, DataFilesDiff, FileFormat,
    PartitionSpec, PartitionValue, PartitionedDataFiles, Range, SchemaVersion, Snapshot,
    SyncAnchor, TableDescriptor, TableFormat, VersionToken,
};
use crate::partition::{self, deserialize_partition_value};
use crate::model::ColumnStat;
use crate::source::{ChangesCache, SourceAdapter, SourceTableHandle};
use crate::storage;

/// Parsed file-level diff of one snapshot, cached for the round.
#[derive(Debug, Clone)]
struct CachedDiff {
    added: Vec<DataFile>,
    removed: Vec<DataFile>,
    timestamp_ms: i64,
    schema_id: i32,
}

pub struct IcebergSourceAdapter {
    handle: SourceTableHandle,
    cache: ChangesCache<CachedDiff>,
    metadata: Option<TableMetadata>,
}

impl IcebergSourceAdapter {
    pub fn new(handle: SourceTableHandle) -> Self {
        IcebergSourceAdapter {
            handle,
            cache: ChangesCache::new(),
            metadata: None,
        }
    }

    async fn load_metadata(&mut self) -> SyncResult<&TableMetadata> {
        if self.metadata.is_none() {
            let hint = storage::read_to_string(
                &self.handle.location,
                &iceberg_meta::version_hint_file(),
            )
            .await
            .map_err(|e| {
                SourceReadSnafu {
                    detail: format!("version hint: {e}"),
                }
                .build()
            })?;
            let version = iceberg_meta::parse_version_hint(&hint)?;
            let contents = storage::read_to_string(
                &self.handle.location,
                &iceberg_meta::metadata_file(version),
            )
            .await
            .map_err(|e| {
                SourceReadSnafu {
                    detail: format!("metadata v{version}: {e}"),
                }
                .build()
            })?;
            let metadata: TableMetadata = serde_json::from_str(&contents).map_err(|e| {
                SourceReadSnafu {
                    detail: format!("metadata v{version}: {e}"),
                }
                .build()
            })?;
            self.metadata = Some(metadata);
        }
        Ok(self.metadata.as_ref().expect("metadata just loaded"))
    }

    fn canonical_schema(metadata: &TableMetadata, schema_id: i32) -> SyncResult<CanonicalSchema> {
        let schema_json = metadata.schema_by_id(schema_id).context(SourceReadSnafu {
            detail: format!("schema id {schema_id} not present in metadata"),
        })?;
        crate::schema::iceberg::to_canonical(schema_json)
    }

    fn canonical_spec(
        metadata: &TableMetadata,
        schema: &CanonicalSchema,
    ) -> SyncResult<PartitionSpec> {
        match metadata.default_spec() {
            Some(spec) if !spec.fields.is_empty() => {
                partition::iceberg::to_canonical(spec, schema)
            }
            _ => Ok(PartitionSpec::unpartitioned()),
        }
    }

    fn descriptor(&self, metadata: &TableMetadata, schema_id: i32) -> SyncResult<TableDescriptor> {
        let schema = Self::canonical_schema(metadata, schema_id)?;
        let spec = Self::canonical_spec(metadata, &schema)?;
        let layout = TableDescriptor::layout_for(&spec);
        Ok(TableDescriptor {
            name: self.handle.name.clone(),
            format: TableFormat::Iceberg,
            base_path: self.handle.location.base_path(),
            read_schema: schema,
            partition_spec: spec,
            layout,
        })
    }

    fn data_file_from_entry(
        entry: &ManifestDataFile,
        schema: &CanonicalSchema,
        spec: &PartitionSpec,
        spec_names: &[String],
        schema_id: i32,
        timestamp_ms: i64,
    ) -> SyncResult<DataFile> {
        let mut partition_values = Vec::with_capacity(spec.fields.len());
        for (field, name) in spec.fields.iter().zip(spec_names) {
            let range = match entry.partition.get(name) {
                Some(raw) => deserialize_partition_value(field, raw)?,
                None => None,
            };
            partition_values.push(PartitionValue {
                field: field.clone(),
                range,
            });
        }

        let index = schema.field_id_index();
        let mut column_stats: HashMap<i32, ColumnStat> = HashMap::new();
        for entry_count in &entry.value_counts {
            column_stats.entry(entry_count.key).or_default().num_values =
                entry_count.value.max(0) as u64;
        }
        for entry_count in &entry.null_value_counts {
            column_stats.entry(entry_count.key).or_default().num_nulls =
                entry_count.value.max(0) as u64;
        }
        for entry_size in &entry.column_sizes {
            column_stats
                .entry(entry_size.key)
                .or_default()
                .total_size_bytes = entry_size.value.max(0) as u64;
        }
        for (lower, upper) in entry.lower_bounds.iter().zip(&entry.upper_bounds) {
            let Some(path) = index.get(&lower.key) else { continue };
            let Some(field) = schema.field_at_path(path) else { continue };
            let min = crate::partition::deserialize_scalar(
                &lower.value,
                field.schema.kind,
                &field.schema.metadata,
            );
            let max = crate::partition::deserialize_scalar(
                &upper.value,
                field.schema.kind,
                &field.schema.metadata,
            );
            if let (Ok(min), Ok(max)) = (min, max) {
                column_stats.entry(lower.key).or_default().range = Range::try_new(min, max);
            }
        }

        Ok(DataFile {
            physical_path: entry.file_path.clone(),
            file_format: FileFormat::ApacheParquet,
            schema_version: Some(SchemaVersion(schema_id.max(0) as u32)),
            partition_values,
            partition_path: None,
            file_size_bytes: entry.file_size_in_bytes.max(0) as u64,
            record_count: entry.record_count.max(0) as u64,
            last_modified_ms: timestamp_ms,
            column_stats,
        })
    }

    async fn read_avro(&self, rel: &str) -> SyncResult<Vec<u8>> {
        storage::read_bytes(&self.handle.location, &PathBuf::from(rel))
            .await
            .map_err(|e| {
                SourceReadSnafu {
                    detail: format!("{rel}: {e}"),
                }
                .build()
            })
    }

    /// Collect the added/removed entries a snapshot introduced.
    async fn snapshot_diff(&self, snapshot: &IcebergSnapshot) -> SyncResult<CachedDiff> {
        let metadata = self.metadata.as_ref().expect("metadata loaded");
        let schema = Self::canonical_schema(metadata, snapshot.schema_id)?;
        let spec = Self::canonical_spec(metadata, &schema)?;
        let spec_names: Vec<String> = metadata
            .default_spec()
            .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();

        let list_bytes = self.read_avro(&snapshot.manifest_list).await?;
        let manifests = iceberg_meta::read_manifest_list(&list_bytes)?;

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for manifest in manifests {
            if manifest.added_snapshot_id != snapshot.snapshot_id {
                continue;
            }
            let bytes = self.read_avro(&manifest.manifest_path).await?;
            for entry in iceberg_meta::read_manifest(&bytes)? {
                if entry.snapshot_id != snapshot.snapshot_id {
                    continue;
                }
                let file = Self::data_file_from_entry(
                    &entry.data_file,
                    &schema,
                    &spec,
                    &spec_names,
                    snapshot.schema_id,
                    snapshot.timestamp_ms,
                )?;
                match entry.status {
                    STATUS_ADDED => added.push(file),
                    STATUS_DELETED => removed.push(file),
                    _ => {}
                }
            }
        }
        Ok(CachedDiff {
            added,
            removed,
            timestamp_ms: snapshot.timestamp_ms,
            schema_id: snapshot.schema_id,
        })
    }
}

#[async_trait]
impl SourceAdapter for IcebergSourceAdapter {
    fn format(&self) -> TableFormat {
        TableFormat::Iceberg
    }

    async fn get_table(&mut self, at: &VersionToken) -> SyncResult<TableDescriptor> {
        let sequence = require_number(at)?;
        self.load_metadata().await?;
        let metadata = self.metadata.as_ref().expect("metadata loaded");
        let snapshot = metadata
            .snapshots
            .iter()
            .find(|s| s.sequence_number == sequence as i64)
            .context(SourceVersionMissingSnafu {
                version: at.clone(),
            })?;
        self.descriptor(metadata, snapshot.schema_id)
    }

    async fn get_schema_catalog(
        &mut self,
        _at: &VersionToken,
    ) -> SyncResult<BTreeMap<SchemaVersion, CanonicalSchema>> {
        self.load_metadata().await?;
        let metadata = self.metadata.as_ref().expect("metadata loaded");
        let mut catalog = BTreeMap::new();
        for schema_json in &metadata.schemas {
            let id = schema_json
                .get("schema-id")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            catalog.insert(
                SchemaVersion(id.max(0) as u32),
                crate::schema::iceberg::to_canonical(schema_json)?,
            );
        }
        Ok(catalog)
    }

    async fn get_current_snapshot(&mut self) -> SyncResult<Snapshot> {
        self.load_metadata().await?;
        let metadata = self.metadata.as_ref().expect("metadata loaded").clone();
        let catalog = self.get_schema_catalog(&VersionToken::Number(0)).await?;

        let Some(current) = metadata.current_snapshot() else {
            // A table without snapshots is an empty table.
            let descriptor = self.descriptor(&metadata, metadata.current_schema_id)?;
            return Ok(Snapshot {
                table: descriptor,
                schema_catalog: catalog,
                files: PartitionedDataFiles::default(),
                source_version: VersionToken::Number(0),
            });
        };

        let schema = Self::canonical_schema(&metadata, current.schema_id)?;
        let spec = Self::canonical_spec(&metadata, &schema)?;
        let spec_names: Vec<String> = metadata
            .default_spec()
            .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();

        // Fold manifests in list order so a tombstone in a later manifest
        // retires an add from an earlier one.
        let list_bytes = self.read_avro(&current.manifest_list).await?;
        let manifests = iceberg_meta::read_manifest_list(&list_bytes)?;
        let mut live: BTreeMap<String, DataFile> = BTreeMap::new();
        for manifest in manifests {
            let bytes = self.read_avro(&manifest.manifest_path).await?;
            for entry in iceberg_meta::read_manifest(&bytes)? {
                if entry.status == STATUS_DELETED {
                    live.remove(&entry.data_file.file_path);
                    continue;
                }
                live.insert(
                    entry.data_file.file_path.clone(),
                    Self::data_file_from_entry(
                        &entry.data_file,
                        &schema,
                        &spec,
                        &spec_names,
                        current.schema_id,
                        current.timestamp_ms,
                    )?,
                );
            }
        }
        let files: Vec<DataFile> = live.into_values().collect();

        let descriptor = self.descriptor(&metadata, current.schema_id)?;
        Ok(Snapshot {
            table: descriptor,
            schema_catalog: catalog,
            files: PartitionedDataFiles::from_files(files),
            source_version: VersionToken::Number(current.sequence_number.max(0) as u64),
        })
    }

    async fn get_commit_state(&mut self, anchor: &SyncAnchor) -> SyncResult<CommitPlan> {
        let anchor_sequence = match anchor.version.as_ref().and_then(VersionToken::as_number) {
            Some(v) => v as i64,
            None => {
                return Ok(CommitPlan {
                    commits_to_process: Vec::new(),
                    must_do_full_sync: true,
                });
            }
        };
        self.load_metadata().await?;
        let metadata = self.metadata.as_ref().expect("metadata loaded").clone();

        let mut pending: Vec<&IcebergSnapshot> = metadata
            .snapshots
            .iter()
            .filter(|s| s.sequence_number > anchor_sequence)
            .collect();
        pending.sort_by_key(|s| s.sequence_number);

        // The anchor snapshot must still exist unless nothing is pending;
        // otherwise history was expired underneath the checkpoint.
        let anchor_known = anchor_sequence == 0
            || metadata
                .snapshots
                .iter()
                .any(|s| s.sequence_number == anchor_sequence);
        if !pending.is_empty() && !anchor_known {
            warn!(anchor = anchor_sequence, "anchor snapshot expired");
            return Ok(CommitPlan {
                commits_to_process: Vec::new(),
                must_do_full_sync: true,
            });
        }

        self.cache
            .reset(VersionToken::Number(anchor_sequence.max(0) as u64));
        let mut tokens = Vec::with_capacity(pending.len());
        for snapshot in pending {
            let token = VersionToken::Number(snapshot.sequence_number.max(0) as u64);
            match self.snapshot_diff(snapshot).await {
                Ok(diff) => {
                    self.cache.insert(token.clone(), diff);
                    tokens.push(token);
                }
                Err(e) => {
                    warn!(sequence = snapshot.sequence_number, error = %e,
                        "snapshot manifests unreadable");
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
        self.load_metadata().await?;
        let diff = match self.cache.get(version) {
            Some(diff) => diff.clone(),
            None => {
                let metadata = self.metadata.as_ref().expect("metadata loaded").clone();
                let sequence = require_number(version)? as i64;
                let snapshot = metadata
                    .snapshots
                    .iter()
                    .find(|s| s.sequence_number == sequence)
                    .context(SourceVersionMissingSnafu {
                        version: version.clone(),
                    })?;
                self.snapshot_diff(snapshot).await?
            }
        };
        let metadata = self.metadata.as_ref().expect("metadata loaded");
        let table_after = self.descriptor(metadata, diff.schema_id)?;
        Ok(Commit {
            version: version.clone(),
            timestamp_ms: diff.timestamp_ms,
            files_diff: DataFilesDiff::new(diff.added, diff.removed)?,
            table_after,
        })
    }

    fn end_round(&mut self) {
        self.cache.clear();
        self.metadata = None;
    }
}

fn require_number(token: &VersionToken) -> SyncResult<u64> {
    token.as_number().context(SourceReadSnafu {
        detail: format!("iceberg sequence numbers are numeric, got '{token}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::iceberg_meta::{
        I64Entry, IcebergPartitionField, IcebergPartitionSpec, ManifestEntry, ManifestFileEntry,
        StrEntry,
    };
    use crate::model::{Scalar, TransformType};
    use crate::storage::TableLocation;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn schema_doc() -> serde_json::Value {
        json!({
            "schema-id": 0,
            "type": "struct",
            "fields": [
                {"id": 1, "name": "id", "required": false, "type": "long"},
                {"id": 2, "name": "part_col", "required": false, "type": "string"}
            ]
        })
    }

    fn partition_spec_doc() -> IcebergPartitionSpec {
        IcebergPartitionSpec {
            spec_id: 0,
            fields: vec![IcebergPartitionField {
                name: "part_col".to_string(),
                transform: "identity".to_string(),
                source_id: 2,
                field_id: 1000,
            }],
        }
    }

    fn entry(status: i32, snapshot_id: i64, path: &str, part: &str, rows: i64) -> ManifestEntry {
        ManifestEntry {
            status,
            snapshot_id,
            data_file: ManifestDataFile {
                file_path: path.to_string(),
                file_format: "PARQUET".to_string(),
                partition: HashMap::from([("part_col".to_string(), part.to_string())]),
                record_count: rows,
                file_size_in_bytes: 1024,
                value_counts: vec![I64Entry { key: 1, value: rows }],
                null_value_counts: vec![I64Entry { key: 1, value: 0 }],
                column_sizes: vec![],
                lower_bounds: vec![StrEntry {
                    key: 1,
                    value: "1".to_string(),
                }],
                upper_bounds: vec![StrEntry {
                    key: 1,
                    value: rows.to_string(),
                }],
            },
        }
    }

    async fn write_manifest_file(
        location: &TableLocation,
        name: &str,
        added_snapshot_id: i64,
        entries: &[ManifestEntry],
    ) -> Result<ManifestFileEntry, Box<dyn std::error::Error>> {
        let rel = format!("{}/{name}", iceberg_meta::METADATA_DIR);
        let bytes = iceberg_meta::write_manifest(entries)?;
        storage::write_new(location, &PathBuf::from(&rel), &bytes).await?;
        let added = entries.iter().filter(|e| e.status == STATUS_ADDED).count() as i32;
        let deleted = entries.iter().filter(|e| e.status == STATUS_DELETED).count() as i32;
        Ok(ManifestFileEntry {
            manifest_path: rel,
            manifest_length: bytes.len() as i64,
            partition_spec_id: 0,
            added_snapshot_id,
            added_files_count: added,
            existing_files_count: entries.len() as i32 - added - deleted,
            deleted_files_count: deleted,
        })
    }

    async fn write_list(
        location: &TableLocation,
        name: &str,
        manifests: &[ManifestFileEntry],
    ) -> TestResult {
        let rel = format!("{}/{name}", iceberg_meta::METADATA_DIR);
        let bytes = iceberg_meta::write_manifest_list(manifests)?;
        storage::write_new(location, &PathBuf::from(&rel), &bytes).await?;
        Ok(())
    }

    fn snapshot_entry(snapshot_id: i64, sequence: i64, list: &str) -> IcebergSnapshot {
        IcebergSnapshot {
            snapshot_id,
            sequence_number: sequence,
            timestamp_ms: 1_000 * sequence,
            manifest_list: format!("{}/{list}", iceberg_meta::METADATA_DIR),
            summary: HashMap::new(),
            schema_id: 0,
        }
    }

    async fn write_table(
        location: &TableLocation,
        snapshots: Vec<IcebergSnapshot>,
    ) -> TestResult {
        let current = snapshots.last().map(|s| s.snapshot_id);
        let last_sequence = snapshots.last().map(|s| s.sequence_number).unwrap_or(0);
        let metadata = TableMetadata {
            format_version: 2,
            table_uuid: "c0ffee00-aaaa-bbbb-cccc-000000000001".to_string(),
            location: location.base_path(),
            last_sequence_number: last_sequence,
            last_updated_ms: 1_000 * last_sequence,
            last_column_id: 2,
            schemas: vec![schema_doc()],
            current_schema_id: 0,
            partition_specs: vec![partition_spec_doc()],
            default_spec_id: 0,
            last_partition_id: 1000,
            properties: HashMap::new(),
            current_snapshot_id: current,
            snapshots,
            sort_orders: vec![],
            default_sort_order_id: 0,
        };
        let doc = serde_json::to_vec(&metadata)?;
        storage::write_new(location, &iceberg_meta::metadata_file(1), &doc).await?;
        storage::write_atomic(location, &iceberg_meta::version_hint_file(), b"1").await?;
        Ok(())
    }

    fn adapter(tmp: &TempDir) -> IcebergSourceAdapter {
        IcebergSourceAdapter::new(SourceTableHandle {
            name: "people".to_string(),
            location: TableLocation::local(tmp.path()),
        })
    }

    #[tokio::test]
    async fn snapshot_reads_files_schema_and_partitions() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let m1 = write_manifest_file(
            &location,
            "m1.avro",
            1,
            &[
                entry(STATUS_ADDED, 1, "/data/people/f1.parquet", "a", 50),
                entry(STATUS_ADDED, 1, "/data/people/f2.parquet", "b", 25),
            ],
        )
        .await?;
        write_list(&location, "l1.avro", &[m1]).await?;
        write_table(&location, vec![snapshot_entry(1, 1, "l1.avro")]).await?;

        let mut source = adapter(&tmp);
        let snapshot = source.get_current_snapshot().await?;

        assert_eq!(snapshot.source_version, VersionToken::Number(1));
        assert_eq!(snapshot.files.file_count(), 2);
        // One group per distinct partition value.
        assert_eq!(snapshot.files.groups().len(), 2);

        let f1 = snapshot
            .files
            .all_files()
            .find(|f| f.physical_path.ends_with("f1.parquet"))
            .expect("f1 present");
        assert_eq!(f1.record_count, 50);
        assert_eq!(f1.partition_values.len(), 1);
        let range = f1.partition_values[0].range.as_ref().expect("non-null");
        assert_eq!(range.max(), &Scalar::String("a".to_string()));
        let id_stat = &f1.column_stats[&1];
        assert_eq!(id_stat.num_values, 50);
        assert_eq!(
            id_stat.range.as_ref().unwrap().max(),
            &Scalar::Long(50)
        );

        let spec = &snapshot.table.partition_spec;
        assert_eq!(spec.fields.len(), 1);
        assert_eq!(spec.fields[0].transform, TransformType::Value);
        assert_eq!(spec.fields[0].source_field_id, 2);
        assert_eq!(
            snapshot.table.read_schema.field_at_path("id").unwrap().field_id,
            Some(1)
        );
        Ok(())
    }

    #[tokio::test]
    async fn later_tombstones_supersede_earlier_manifests() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let m1 = write_manifest_file(
            &location,
            "m1.avro",
            1,
            &[entry(STATUS_ADDED, 1, "/data/people/f1.parquet", "a", 50)],
        )
        .await?;
        write_list(&location, "l1.avro", std::slice::from_ref(&m1)).await?;
        let m2 = write_manifest_file(
            &location,
            "m2.avro",
            2,
            &[
                entry(STATUS_ADDED, 2, "/data/people/f2.parquet", "a", 30),
                entry(STATUS_DELETED, 2, "/data/people/f1.parquet", "a", 50),
            ],
        )
        .await?;
        write_list(&location, "l2.avro", &[m1, m2]).await?;
        write_table(
            &location,
            vec![
                snapshot_entry(1, 1, "l1.avro"),
                snapshot_entry(2, 2, "l2.avro"),
            ],
        )
        .await?;

        let mut source = adapter(&tmp);
        let snapshot = source.get_current_snapshot().await?;
        assert_eq!(snapshot.files.file_count(), 1);
        let file = snapshot.files.all_files().next().unwrap();
        assert!(file.physical_path.ends_with("f2.parquet"));
        assert_eq!(snapshot.source_version, VersionToken::Number(2));
        Ok(())
    }

    #[tokio::test]
    async fn commit_state_and_commit_roundtrip() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let m1 = write_manifest_file(
            &location,
            "m1.avro",
            1,
            &[entry(STATUS_ADDED, 1, "/data/people/f1.parquet", "a", 50)],
        )
        .await?;
        write_list(&location, "l1.avro", std::slice::from_ref(&m1)).await?;
        let m2 = write_manifest_file(
            &location,
            "m2.avro",
            2,
            &[
                entry(STATUS_ADDED, 2, "/data/people/f2.parquet", "a", 30),
                entry(STATUS_DELETED, 2, "/data/people/f1.parquet", "a", 50),
            ],
        )
        .await?;
        write_list(&location, "l2.avro", &[m1, m2]).await?;
        write_table(
            &location,
            vec![
                snapshot_entry(1, 1, "l1.avro"),
                snapshot_entry(2, 2, "l2.avro"),
            ],
        )
        .await?;

        let mut source = adapter(&tmp);
        let anchor = SyncAnchor {
            instant_ms: 1_000,
            version: Some(VersionToken::Number(1)),
        };
        let plan = source.get_commit_state(&anchor).await?;
        assert!(!plan.must_do_full_sync);
        assert_eq!(plan.commits_to_process, vec![VersionToken::Number(2)]);

        // The diff comes from m2 alone: m1 belongs to the anchor snapshot
        // and is skipped by its added-snapshot id.
        let commit = source.get_commit(&VersionToken::Number(2)).await?;
        assert_eq!(commit.timestamp_ms, 2_000);
        assert_eq!(commit.files_diff.added().len(), 1);
        assert!(commit.files_diff.added()[0]
            .physical_path
            .ends_with("f2.parquet"));
        assert_eq!(commit.files_diff.removed().len(), 1);
        assert!(commit.files_diff.removed()[0]
            .physical_path
            .ends_with("f1.parquet"));
        assert_eq!(commit.table_after.partition_spec.fields.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn expired_anchor_forces_full_sync() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        // History before sequence 3 has been expired away.
        let m3 = write_manifest_file(
            &location,
            "m3.avro",
            3,
            &[entry(STATUS_ADDED, 3, "/data/people/f3.parquet", "a", 10)],
        )
        .await?;
        write_list(&location, "l3.avro", &[m3]).await?;
        write_table(&location, vec![snapshot_entry(3, 3, "l3.avro")]).await?;

        let mut source = adapter(&tmp);
        let anchor = SyncAnchor {
            instant_ms: 1_000,
            version: Some(VersionToken::Number(1)),
        };
        let plan = source.get_commit_state(&anchor).await?;
        assert!(plan.must_do_full_sync);
        assert!(plan.commits_to_process.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn table_without_snapshots_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        write_table(&location, Vec::new()).await?;

        let mut source = adapter(&tmp);
        let snapshot = source.get_current_snapshot().await?;
        assert_eq!(snapshot.files.file_count(), 0);
        assert_eq!(snapshot.source_version, VersionToken::Number(0));
        Ok(())
    }
}
