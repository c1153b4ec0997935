//! Iceberg target adapter.
//!
//! Every applied snapshot or commit becomes a new metadata document
//! (`metadata/v<N>.metadata.json` plus the version hint) referencing one
//! complete manifest: the full current file set with added, existing, and
//! deleted statuses. Rewriting the manifest per commit keeps idempotence and
//! the source-side diff walk simple; the observable file set is identical to
//! an incremental manifest chain. Schema evolution appends a new schema
//! document only when the incoming schema differs by field id from the
//! current one. The checkpoint lives in the table properties of the same
//! metadata document.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SyncResult, TargetStorageSnafu, TargetWriteSnafu};
use crate::formats::iceberg_meta::{
    self, I64Entry, IcebergSnapshot, ManifestDataFile, ManifestEntry, ManifestFileEntry,
    StrEntry, TableMetadata, STATUS_ADDED, STATUS_DELETED, STATUS_EXISTING,
};
use crate::model::{
    CanonicalSchema, Commit, DataFile, Snapshot, SyncCheckpoint, TableDescriptor, TableFormat,
};
use crate::partition::{self, serialize_partition_value};
use crate::schema::iceberg as iceberg_schema;
use crate::storage::{self, StorageError};
use crate::target::{
    decode_checkpoint, encode_checkpoint, guard_version, TargetAdapter, TargetTableHandle,
    LAST_SYNC_VERSION_PROP,
};

pub struct IcebergTargetAdapter {
    handle: TargetTableHandle,
    /// `(metadata version, document)` of the current table state.
    state: Option<Option<(u64, TableMetadata)>>,
}

impl IcebergTargetAdapter {
    pub fn new(handle: TargetTableHandle) -> Self {
        IcebergTargetAdapter {
            handle,
            state: None,
        }
    }

    async fn load_state(&mut self) -> SyncResult<Option<(u64, TableMetadata)>> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let hint = match storage::read_to_string(
            &self.handle.location,
            &iceberg_meta::version_hint_file(),
        )
        .await
        {
            Ok(hint) => hint,
            Err(StorageError::NotFound { .. }) => {
                self.state = Some(None);
                return Ok(None);
            }
            Err(e) => {
                return TargetWriteSnafu {
                    detail: format!("version hint: {e}"),
                }
                .fail();
            }
        };
        let version = iceberg_meta::parse_version_hint(&hint)?;
        let contents =
            storage::read_to_string(&self.handle.location, &iceberg_meta::metadata_file(version))
                .await
                .context(TargetStorageSnafu {
                    detail: format!("metadata v{version}"),
                })?;
        let metadata: TableMetadata = serde_json::from_str(&contents).map_err(|e| {
            TargetWriteSnafu {
                detail: format!("metadata v{version}: {e}"),
            }
            .build()
        })?;
        let state = Some((version, metadata));
        self.state = Some(state.clone());
        Ok(state)
    }

    fn stored_checkpoint(
        state: &Option<(u64, TableMetadata)>,
    ) -> SyncResult<Option<SyncCheckpoint>> {
        match state
            .as_ref()
            .and_then(|(_, m)| m.properties.get(LAST_SYNC_VERSION_PROP))
        {
            Some(raw) => Ok(Some(decode_checkpoint(raw)?)),
            None => Ok(None),
        }
    }

    /// Emit the schema document, reusing the current schema id when the
    /// incoming schema is id-identical to it.
    fn resolve_schema(
        current: Option<&TableMetadata>,
        table: &TableDescriptor,
    ) -> SyncResult<(serde_json::Value, CanonicalSchema, i32)> {
        let (mut schema_json, annotated) = iceberg_schema::from_canonical(&table.read_schema)?;
        let schema_id = match current {
            None => 0,
            Some(metadata) => {
                let current_json = metadata.schema_by_id(metadata.current_schema_id);
                match current_json {
                    Some(existing) => {
                        let mut stripped = existing.clone();
                        if let Some(obj) = stripped.as_object_mut() {
                            obj.remove("schema-id");
                        }
                        if stripped == schema_json {
                            metadata.current_schema_id
                        } else {
                            metadata.current_schema_id + 1
                        }
                    }
                    None => metadata.current_schema_id + 1,
                }
            }
        };
        schema_json["schema-id"] = serde_json::json!(schema_id);
        Ok((schema_json, annotated, schema_id))
    }

    fn manifest_data_file(
        file: &DataFile,
        schema: &CanonicalSchema,
        spec_names: &[String],
    ) -> SyncResult<ManifestDataFile> {
        let mut partition = HashMap::with_capacity(file.partition_values.len());
        for (value, name) in file.partition_values.iter().zip(spec_names) {
            partition.insert(name.clone(), serialize_partition_value(value)?);
        }

        let index = schema.field_id_index();
        let mut value_counts = Vec::new();
        let mut null_value_counts = Vec::new();
        let mut column_sizes = Vec::new();
        let mut lower_bounds = Vec::new();
        let mut upper_bounds = Vec::new();
        for (field_id, stat) in &file.column_stats {
            value_counts.push(I64Entry {
                key: *field_id,
                value: stat.num_values as i64,
            });
            null_value_counts.push(I64Entry {
                key: *field_id,
                value: stat.num_nulls as i64,
            });
            if stat.total_size_bytes > 0 {
                column_sizes.push(I64Entry {
                    key: *field_id,
                    value: stat.total_size_bytes as i64,
                });
            }
            let (Some(range), Some(path)) = (&stat.range, index.get(field_id)) else {
                continue;
            };
            let Some(field) = schema.field_at_path(path) else {
                continue;
            };
            let lower = partition::serialize_scalar(range.min(), &field.schema.metadata);
            let upper = partition::serialize_scalar(range.max(), &field.schema.metadata);
            if let (Ok(lower), Ok(upper)) = (lower, upper) {
                lower_bounds.push(StrEntry {
                    key: *field_id,
                    value: lower,
                });
                upper_bounds.push(StrEntry {
                    key: *field_id,
                    value: upper,
                });
            }
        }
        // Deterministic manifests regardless of hash order.
        value_counts.sort_by_key(|e| e.key);
        null_value_counts.sort_by_key(|e| e.key);
        column_sizes.sort_by_key(|e| e.key);
        lower_bounds.sort_by_key(|e| e.key);
        upper_bounds.sort_by_key(|e| e.key);

        Ok(ManifestDataFile {
            file_path: file.physical_path.clone(),
            file_format: "PARQUET".to_string(),
            partition,
            record_count: file.record_count as i64,
            file_size_in_bytes: file.file_size_bytes as i64,
            value_counts,
            null_value_counts,
            column_sizes,
            lower_bounds,
            upper_bounds,
        })
    }

    /// The file set referenced by the current snapshot, keyed by path.
    async fn current_files(
        &self,
        metadata: &TableMetadata,
    ) -> SyncResult<HashMap<String, ManifestDataFile>> {
        let mut files = HashMap::new();
        let Some(snapshot) = metadata.current_snapshot() else {
            return Ok(files);
        };
        let list_bytes = storage::read_bytes(
            &self.handle.location,
            &std::path::PathBuf::from(&snapshot.manifest_list),
        )
        .await
        .context(TargetStorageSnafu {
            detail: snapshot.manifest_list.clone(),
        })?;
        for manifest in iceberg_meta::read_manifest_list(&list_bytes)? {
            let bytes = storage::read_bytes(
                &self.handle.location,
                &std::path::PathBuf::from(&manifest.manifest_path),
            )
            .await
            .context(TargetStorageSnafu {
                detail: manifest.manifest_path.clone(),
            })?;
            for entry in iceberg_meta::read_manifest(&bytes)? {
                if entry.status == STATUS_DELETED {
                    files.remove(&entry.data_file.file_path);
                } else {
                    files.insert(entry.data_file.file_path.clone(), entry.data_file);
                }
            }
        }
        Ok(files)
    }

    /// Write a snapshot's manifest, manifest list, metadata document, and
    /// version hint; returns the new metadata version.
    #[allow(clippy::too_many_arguments)]
    async fn commit_metadata(
        &mut self,
        previous: Option<(u64, TableMetadata)>,
        table: &TableDescriptor,
        schema_json: serde_json::Value,
        annotated: &CanonicalSchema,
        schema_id: i32,
        entries: Vec<ManifestEntry>,
        added_count: i32,
        deleted_count: i32,
        checkpoint: &SyncCheckpoint,
        timestamp_ms: i64,
    ) -> SyncResult<u64> {
        let (previous_version, previous_metadata) = match previous {
            Some((v, m)) => (Some(v), Some(m)),
            None => (None, None),
        };
        let sequence_number = previous_metadata
            .as_ref()
            .map(|m| m.last_sequence_number + 1)
            .unwrap_or(1);
        let snapshot_id = sequence_number;
        let metadata_version = previous_version.map(|v| v + 1).unwrap_or(1);

        let manifest_rel = format!(
            "{}/{}-m0.avro",
            iceberg_meta::METADATA_DIR,
            Uuid::new_v4()
        );
        let manifest_bytes = iceberg_meta::write_manifest(&entries)?;
        storage::write_new(
            &self.handle.location,
            &std::path::PathBuf::from(&manifest_rel),
            &manifest_bytes,
        )
        .await
        .context(TargetStorageSnafu {
            detail: manifest_rel.clone(),
        })?;

        let list_rel = format!(
            "{}/snap-{snapshot_id}-{}.avro",
            iceberg_meta::METADATA_DIR,
            Uuid::new_v4()
        );
        let existing_count = entries.len() as i32 - added_count - deleted_count;
        let list_bytes = iceberg_meta::write_manifest_list(&[ManifestFileEntry {
            manifest_path: manifest_rel,
            manifest_length: manifest_bytes.len() as i64,
            partition_spec_id: 0,
            added_snapshot_id: snapshot_id,
            added_files_count: added_count,
            existing_files_count: existing_count.max(0),
            deleted_files_count: deleted_count,
        }])?;
        storage::write_new(
            &self.handle.location,
            &std::path::PathBuf::from(&list_rel),
            &list_bytes,
        )
        .await
        .context(TargetStorageSnafu {
            detail: list_rel.clone(),
        })?;

        let spec = partition::iceberg::from_canonical(&table.partition_spec, annotated, 0)?;
        let last_partition_id = spec
            .fields
            .iter()
            .map(|f| f.field_id)
            .max()
            .unwrap_or(999);

        let mut schemas = previous_metadata
            .as_ref()
            .map(|m| m.schemas.clone())
            .unwrap_or_default();
        if previous_metadata
            .as_ref()
            .map(|m| m.schema_by_id(schema_id).is_none())
            .unwrap_or(true)
        {
            schemas.push(schema_json);
        }

        let mut properties = previous_metadata
            .as_ref()
            .map(|m| m.properties.clone())
            .unwrap_or_default();
        properties.insert(
            LAST_SYNC_VERSION_PROP.to_string(),
            encode_checkpoint(checkpoint)?,
        );

        let mut snapshots = previous_metadata
            .as_ref()
            .map(|m| m.snapshots.clone())
            .unwrap_or_default();
        snapshots.push(IcebergSnapshot {
            snapshot_id,
            sequence_number,
            timestamp_ms,
            manifest_list: list_rel,
            summary: HashMap::from([(
                "operation".to_string(),
                if deleted_count > 0 { "overwrite" } else { "append" }.to_string(),
            )]),
            schema_id,
        });

        let metadata = TableMetadata {
            format_version: 2,
            table_uuid: previous_metadata
                .as_ref()
                .map(|m| m.table_uuid.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            location: self.handle.location.base_path(),
            last_sequence_number: sequence_number,
            last_updated_ms: timestamp_ms,
            last_column_id: annotated.max_field_id().unwrap_or(0),
            schemas,
            current_schema_id: schema_id,
            partition_specs: vec![spec],
            default_spec_id: 0,
            last_partition_id,
            properties,
            current_snapshot_id: Some(snapshot_id),
            snapshots,
            sort_orders: vec![serde_json::json!({"order-id": 0, "fields": []})],
            default_sort_order_id: 0,
        };

        let document = serde_json::to_vec_pretty(&metadata).map_err(|e| {
            TargetWriteSnafu {
                detail: format!("encoding metadata: {e}"),
            }
            .build()
        })?;
        storage::write_new(
            &self.handle.location,
            &iceberg_meta::metadata_file(metadata_version),
            &document,
        )
        .await
        .context(TargetStorageSnafu {
            detail: format!("metadata v{metadata_version}"),
        })?;
        storage::write_atomic(
            &self.handle.location,
            &iceberg_meta::version_hint_file(),
            metadata_version.to_string().as_bytes(),
        )
        .await
        .context(TargetStorageSnafu {
            detail: "version hint".to_string(),
        })?;

        self.state = Some(Some((metadata_version, metadata)));
        Ok(metadata_version)
    }

    fn spec_names(table: &TableDescriptor, annotated: &CanonicalSchema) -> SyncResult<Vec<String>> {
        Ok(
            partition::iceberg::from_canonical(&table.partition_spec, annotated, 0)?
                .fields
                .into_iter()
                .map(|f| f.name)
                .collect(),
        )
    }
}

#[async_trait]
impl TargetAdapter for IcebergTargetAdapter {
    fn format(&self) -> TableFormat {
        TableFormat::Iceberg
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn read_last_checkpoint(&mut self) -> SyncResult<Option<SyncCheckpoint>> {
        let state = self.load_state().await?;
        Self::stored_checkpoint(&state)
    }

    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> SyncResult<SyncCheckpoint> {
        let state = self.load_state().await?;
        let stored = Self::stored_checkpoint(&state)?;
        if let Some(existing) = guard_version(stored.as_ref(), &snapshot.source_version)? {
            debug!(version = %existing.last_source_version, "snapshot already applied");
            return Ok(existing);
        }

        let (schema_json, annotated, schema_id) =
            Self::resolve_schema(state.as_ref().map(|(_, m)| m), &snapshot.table)?;
        let spec_names = Self::spec_names(&snapshot.table, &annotated)?;

        let previous_files = match &state {
            Some((_, metadata)) => self.current_files(metadata).await?,
            None => HashMap::new(),
        };
        let timestamp_ms = Utc::now().timestamp_millis();
        let snapshot_id_placeholder = state
            .as_ref()
            .map(|(_, m)| m.last_sequence_number + 1)
            .unwrap_or(1);

        let mut entries = Vec::new();
        let mut added = 0;
        let mut deleted = 0;
        for file in snapshot.files.all_files() {
            let status = if previous_files.contains_key(&file.physical_path) {
                STATUS_EXISTING
            } else {
                added += 1;
                STATUS_ADDED
            };
            entries.push(ManifestEntry {
                status,
                snapshot_id: snapshot_id_placeholder,
                data_file: Self::manifest_data_file(file, &annotated, &spec_names)?,
            });
        }
        let snapshot_paths: std::collections::HashSet<&str> = snapshot
            .files
            .all_files()
            .map(|f| f.physical_path.as_str())
            .collect();
        for (path, data_file) in &previous_files {
            if !snapshot_paths.contains(path.as_str()) {
                deleted += 1;
                entries.push(ManifestEntry {
                    status: STATUS_DELETED,
                    snapshot_id: snapshot_id_placeholder,
                    data_file: data_file.clone(),
                });
            }
        }

        let metadata_version = state.as_ref().map(|(v, _)| v + 1).unwrap_or(1);
        let checkpoint = SyncCheckpoint {
            last_source_version: snapshot.source_version.clone(),
            last_source_instant_ms: timestamp_ms,
            target_metadata_version: metadata_version.to_string(),
        };
        self.commit_metadata(
            state,
            &snapshot.table,
            schema_json,
            &annotated,
            schema_id,
            entries,
            added,
            deleted,
            &checkpoint,
            timestamp_ms,
        )
        .await?;
        Ok(checkpoint)
    }

    async fn apply_commit(&mut self, commit: &Commit) -> SyncResult<SyncCheckpoint> {
        let state = self.load_state().await?;
        let stored = Self::stored_checkpoint(&state)?;
        if let Some(existing) = guard_version(stored.as_ref(), &commit.version)? {
            debug!(version = %existing.last_source_version, "commit already applied");
            return Ok(existing);
        }

        let (schema_json, annotated, schema_id) =
            Self::resolve_schema(state.as_ref().map(|(_, m)| m), &commit.table_after)?;
        let spec_names = Self::spec_names(&commit.table_after, &annotated)?;

        let mut files = match &state {
            Some((_, metadata)) => self.current_files(metadata).await?,
            None => HashMap::new(),
        };
        let snapshot_id = state
            .as_ref()
            .map(|(_, m)| m.last_sequence_number + 1)
            .unwrap_or(1);

        let mut entries = Vec::new();
        let mut deleted = 0;
        for file in commit.files_diff.removed() {
            if let Some(data_file) = files.remove(&file.physical_path) {
                deleted += 1;
                entries.push(ManifestEntry {
                    status: STATUS_DELETED,
                    snapshot_id,
                    data_file,
                });
            }
        }
        let mut added = 0;
        for file in commit.files_diff.added() {
            let data_file = Self::manifest_data_file(file, &annotated, &spec_names)?;
            files.insert(file.physical_path.clone(), data_file.clone());
            added += 1;
            entries.push(ManifestEntry {
                status: STATUS_ADDED,
                snapshot_id,
                data_file,
            });
        }
        // Carry the untouched remainder forward.
        let touched: std::collections::HashSet<&str> = entries
            .iter()
            .map(|e| e.data_file.file_path.as_str())
            .collect();
        let carried: Vec<ManifestEntry> = files
            .iter()
            .filter(|(path, _)| !touched.contains(path.as_str()))
            .map(|(_, data_file)| ManifestEntry {
                status: STATUS_EXISTING,
                snapshot_id,
                data_file: data_file.clone(),
            })
            .collect();
        entries.extend(carried);

        let metadata_version = state.as_ref().map(|(v, _)| v + 1).unwrap_or(1);
        let checkpoint = SyncCheckpoint {
            last_source_version: commit.version.clone(),
            last_source_instant_ms: commit.timestamp_ms,
            target_metadata_version: metadata_version.to_string(),
        };
        self.commit_metadata(
            state,
            &commit.table_after,
            schema_json,
            &annotated,
            schema_id,
            entries,
            added,
            deleted,
            &checkpoint,
            commit.timestamp_ms,
        )
        .await?;
        Ok(checkpoint)
    }
}
