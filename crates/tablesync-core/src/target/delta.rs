//! Delta target adapter.
//!
//! Appends newline-delimited action commits to `_delta_log/`, one zero-padded
//! file per version with create-new semantics as the atomic guard. Every sync
//! commit carries a `metaData` action so the checkpoint, stored under the
//! `onetable.lastSyncVersion` configuration key, advances in the same file
//! as the data actions. Time-granularity partition dimensions are emitted as
//! generated columns appended to the schema.
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SyncResult, TargetStorageSnafu, TargetWriteSnafu};
use crate::formats::delta_log::{
    self, ActionLine, AddAction, CommitInfoAction, FormatSpec, MetaDataAction, ProtocolAction,
    RemoveAction,
};
use crate::model::{
    Commit, DataFile, Snapshot, SyncCheckpoint, TableDescriptor, TableFormat, VersionToken,
};
use crate::partition::delta as delta_partition;
use crate::schema::delta as delta_schema;
use crate::stats;
use crate::storage;
use crate::target::{
    decode_checkpoint, encode_checkpoint, guard_version, reference_path, TargetAdapter,
    TargetTableHandle, LAST_SYNC_VERSION_PROP,
};

/// Replayed view of the target's own log.
#[derive(Debug, Clone, Default)]
struct TargetState {
    /// Last committed version; `None` for a fresh table.
    version: Option<u64>,
    metadata: Option<MetaDataAction>,
    /// Log-relative (or absolute) paths currently referenced.
    files: HashSet<String>,
}

pub struct DeltaTargetAdapter {
    handle: TargetTableHandle,
    state: Option<TargetState>,
}

impl DeltaTargetAdapter {
    pub fn new(handle: TargetTableHandle) -> Self {
        DeltaTargetAdapter {
            handle,
            state: None,
        }
    }

    async fn load_state(&mut self) -> SyncResult<&TargetState> {
        if self.state.is_none() {
            let mut state = TargetState::default();
            let versions = delta_log::list_versions(&self.handle.location).await?;
            for version in versions {
                let actions = delta_log::read_commit(&self.handle.location, version).await?;
                for action in actions {
                    if let Some(meta) = action.meta_data {
                        state.metadata = Some(meta);
                    }
                    if let Some(add) = action.add {
                        state.files.insert(add.path);
                    }
                    if let Some(remove) = action.remove {
                        state.files.remove(&remove.path);
                    }
                }
                state.version = Some(version);
            }
            self.state = Some(state);
        }
        Ok(self.state.as_ref().expect("state just loaded"))
    }

    fn stored_checkpoint(state: &TargetState) -> SyncResult<Option<SyncCheckpoint>> {
        match state
            .metadata
            .as_ref()
            .and_then(|m| m.configuration.get(LAST_SYNC_VERSION_PROP))
        {
            Some(raw) => Ok(Some(decode_checkpoint(raw)?)),
            None => Ok(None),
        }
    }

    /// Build the `metaData` action for a table descriptor plus checkpoint.
    fn metadata_action(
        &self,
        state: &TargetState,
        table: &TableDescriptor,
        checkpoint: &SyncCheckpoint,
    ) -> SyncResult<(MetaDataAction, Vec<String>)> {
        let mut schema_json = delta_schema::from_canonical(&table.read_schema)?;
        let (partition_columns, generated) =
            delta_partition::from_canonical(&table.partition_spec)?;
        if let Some(fields) = schema_json
            .get_mut("fields")
            .and_then(serde_json::Value::as_array_mut)
        {
            for column in &generated {
                fields.push(serde_json::json!({
                    "name": column.column_name,
                    "type": column.delta_type,
                    "nullable": true,
                    "metadata": {
                        delta_schema::GENERATION_EXPRESSION_KEY: column.expression,
                    },
                }));
            }
        }

        let mut configuration = state
            .metadata
            .as_ref()
            .map(|m| m.configuration.clone())
            .unwrap_or_default();
        configuration.insert(
            LAST_SYNC_VERSION_PROP.to_string(),
            encode_checkpoint(checkpoint)?,
        );

        let action = MetaDataAction {
            id: state
                .metadata
                .as_ref()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: Some(table.name.clone()),
            format: FormatSpec::default(),
            schema_string: serde_json::to_string(&schema_json).map_err(|e| {
                TargetWriteSnafu {
                    detail: format!("encoding schema string: {e}"),
                }
                .build()
            })?,
            partition_columns: partition_columns.clone(),
            configuration,
            created_time: state.metadata.as_ref().and_then(|m| m.created_time),
        };
        Ok((action, partition_columns))
    }

    fn add_action(&self, file: &DataFile, table: &TableDescriptor) -> SyncResult<AddAction> {
        let serialized = delta_partition::serialize_partition_values(file)?;
        let partition_values = serialized
            .into_iter()
            .map(|(column, value)| (column, Some(value)))
            .collect();
        Ok(AddAction {
            path: reference_path(&file.physical_path, &self.handle.location.base_path()),
            partition_values,
            size: file.file_size_bytes as i64,
            modification_time: file.last_modified_ms,
            data_change: true,
            stats: Some(stats::canonical_stats_to_delta(file, &table.read_schema)?),
        })
    }

    /// Write one commit file, advancing the tracked state.
    async fn write_commit(
        &mut self,
        actions: Vec<ActionLine>,
        metadata: MetaDataAction,
    ) -> SyncResult<u64> {
        let state = self.state.as_mut().expect("state loaded");
        let version = state.version.map(|v| v + 1).unwrap_or(0);
        let payload = delta_log::encode_commit(&actions)?;
        storage::write_new(
            &self.handle.location,
            &delta_log::commit_rel_path(version),
            &payload,
        )
        .await
        .context(TargetStorageSnafu {
            detail: format!("commit {version}"),
        })?;

        for action in &actions {
            if let Some(add) = &action.add {
                state.files.insert(add.path.clone());
            }
            if let Some(remove) = &action.remove {
                state.files.remove(&remove.path);
            }
        }
        state.metadata = Some(metadata);
        state.version = Some(version);
        Ok(version)
    }
}

#[async_trait]
impl TargetAdapter for DeltaTargetAdapter {
    fn format(&self) -> TableFormat {
        TableFormat::Delta
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    async fn read_last_checkpoint(&mut self) -> SyncResult<Option<SyncCheckpoint>> {
        let state = self.load_state().await?;
        Self::stored_checkpoint(state)
    }

    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> SyncResult<SyncCheckpoint> {
        self.load_state().await?;
        let state = self.state.as_ref().expect("state loaded");
        let stored = Self::stored_checkpoint(state)?;
        if let Some(existing) = guard_version(stored.as_ref(), &snapshot.source_version)? {
            debug!(version = %existing.last_source_version, "snapshot already applied");
            return Ok(existing);
        }

        let next_version = state.version.map(|v| v + 1).unwrap_or(0);
        let checkpoint = SyncCheckpoint {
            last_source_version: snapshot.source_version.clone(),
            last_source_instant_ms: Utc::now().timestamp_millis(),
            target_metadata_version: next_version.to_string(),
        };
        let (metadata, _) = self.metadata_action(state, &snapshot.table, &checkpoint)?;

        let base = self.handle.location.base_path();
        let snapshot_paths: HashSet<String> = snapshot
            .files
            .all_files()
            .map(|f| reference_path(&f.physical_path, &base))
            .collect();

        let mut actions = vec![
            ActionLine::commit_info(CommitInfoAction {
                timestamp: Utc::now().timestamp_millis(),
                operation: Some("REPLACE TABLE".to_string()),
            }),
            ActionLine::meta_data(metadata.clone()),
        ];
        if state.version.is_none() {
            actions.push(ActionLine::protocol(ProtocolAction {
                min_reader_version: 1,
                min_writer_version: 2,
            }));
        }
        // Retire files the snapshot no longer references, then add the new
        // ones; files already tracked are left alone.
        for stale in state.files.difference(&snapshot_paths) {
            actions.push(ActionLine::remove(RemoveAction {
                path: stale.clone(),
                deletion_timestamp: Some(Utc::now().timestamp_millis()),
                data_change: true,
                partition_values: None,
            }));
        }
        for file in snapshot.files.all_files() {
            let rel = reference_path(&file.physical_path, &base);
            if !state.files.contains(&rel) {
                actions.push(ActionLine::add(self.add_action(file, &snapshot.table)?));
            }
        }

        self.write_commit(actions, metadata).await?;
        Ok(checkpoint)
    }

    async fn apply_commit(&mut self, commit: &Commit) -> SyncResult<SyncCheckpoint> {
        self.load_state().await?;
        let state = self.state.as_ref().expect("state loaded");
        let stored = Self::stored_checkpoint(state)?;
        if let Some(existing) = guard_version(stored.as_ref(), &commit.version)? {
            debug!(version = %existing.last_source_version, "commit already applied");
            return Ok(existing);
        }

        let next_version = state.version.map(|v| v + 1).unwrap_or(0);
        let checkpoint = SyncCheckpoint {
            last_source_version: commit.version.clone(),
            last_source_instant_ms: commit.timestamp_ms,
            target_metadata_version: next_version.to_string(),
        };
        let (metadata, _) = self.metadata_action(state, &commit.table_after, &checkpoint)?;

        let base = self.handle.location.base_path();
        let mut actions = vec![
            ActionLine::commit_info(CommitInfoAction {
                timestamp: commit.timestamp_ms,
                operation: Some("WRITE".to_string()),
            }),
            ActionLine::meta_data(metadata.clone()),
        ];
        if state.version.is_none() {
            actions.push(ActionLine::protocol(ProtocolAction {
                min_reader_version: 1,
                min_writer_version: 2,
            }));
        }
        for file in commit.files_diff.removed() {
            actions.push(ActionLine::remove(RemoveAction {
                path: reference_path(&file.physical_path, &base),
                deletion_timestamp: Some(commit.timestamp_ms),
                data_change: true,
                partition_values: None,
            }));
        }
        for file in commit.files_diff.added() {
            actions.push(ActionLine::add(self.add_action(file, &commit.table_after)?));
        }

        self.write_commit(actions, metadata).await?;
        Ok(checkpoint)
    }
}
