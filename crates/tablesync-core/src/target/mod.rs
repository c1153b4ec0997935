//! Target adapters: per-format writers of table metadata.
//!
//! A [`TargetAdapter`] applies either a full snapshot or a stream of
//! incremental commits, idempotently per source version. Writers reference
//! the physical paths of data files verbatim (copying or renaming data is
//! prohibited) and persist the [`SyncCheckpoint`] inside the same atomic
//! metadata unit as the commit, so "data committed, checkpoint lost" cannot
//! happen by construction.
pub mod delta;
pub mod hudi;
pub mod iceberg;

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use snafu::prelude::*;

use crate::error::{
    CheckpointConflictSnafu, ConfigSnafu, SyncResult, TargetWriteSnafu,
};
use crate::model::{Commit, Snapshot, SyncCheckpoint, TableFormat, VersionToken};
use crate::storage::TableLocation;

/// Property (or metadata key) under which targets persist the checkpoint.
pub const LAST_SYNC_VERSION_PROP: &str = "onetable.lastSyncVersion";

/// Identity of the target table handed to adapter factories.
#[derive(Debug, Clone)]
pub struct TargetTableHandle {
    pub name: String,
    pub location: TableLocation,
}

/// Writer contract every target format implements.
#[async_trait]
pub trait TargetAdapter: Send {
    /// The format this adapter writes.
    fn format(&self) -> TableFormat;

    /// The checkpoint recorded by the last sync into this target, if any.
    async fn read_last_checkpoint(&mut self) -> SyncResult<Option<SyncCheckpoint>>;

    /// Replace the target's view with a full snapshot. Idempotent: applying
    /// a snapshot the checkpoint already covers returns without writing.
    async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> SyncResult<SyncCheckpoint>;

    /// Apply one incremental commit. Idempotent per source version.
    async fn apply_commit(&mut self, commit: &Commit) -> SyncResult<SyncCheckpoint>;

    /// Whether this target can consume incremental commits at all.
    fn supports_incremental(&self) -> bool;
}

/// Factory constructing an adapter for one table; construction does no I/O.
pub type TargetFactory = fn(TargetTableHandle) -> Box<dyn TargetAdapter>;

fn registry() -> &'static HashMap<TableFormat, TargetFactory> {
    static REGISTRY: OnceLock<HashMap<TableFormat, TargetFactory>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<TableFormat, TargetFactory> = HashMap::new();
        map.insert(TableFormat::Delta, |handle| {
            Box::new(delta::DeltaTargetAdapter::new(handle))
        });
        map.insert(TableFormat::Iceberg, |handle| {
            Box::new(iceberg::IcebergTargetAdapter::new(handle))
        });
        map.insert(TableFormat::Hudi, |handle| {
            Box::new(hudi::HudiTargetAdapter::new(handle))
        });
        map
    })
}

/// Construct the target adapter for a format.
pub fn create_target_adapter(
    format: TableFormat,
    handle: TargetTableHandle,
) -> SyncResult<Box<dyn TargetAdapter>> {
    let factory = registry().get(&format).context(ConfigSnafu {
        detail: format!("no target adapter registered for {format}"),
    })?;
    Ok(factory(handle))
}

/// JSON-encode a checkpoint for storage in target metadata.
pub fn encode_checkpoint(checkpoint: &SyncCheckpoint) -> SyncResult<String> {
    serde_json::to_string(checkpoint).map_err(|e| {
        TargetWriteSnafu {
            detail: format!("encoding checkpoint: {e}"),
        }
        .build()
    })
}

/// Decode a checkpoint read back from target metadata.
pub fn decode_checkpoint(raw: &str) -> SyncResult<SyncCheckpoint> {
    serde_json::from_str(raw).map_err(|e| {
        TargetWriteSnafu {
            detail: format!("stored checkpoint is unreadable: {e}"),
        }
        .build()
    })
}

/// Idempotence guard shared by the writers.
///
/// Returns the stored checkpoint when it already covers `incoming` (the
/// caller returns it without writing), an error when the stored checkpoint
/// is strictly newer, and `None` when the write should proceed.
pub(crate) fn guard_version(
    stored: Option<&SyncCheckpoint>,
    incoming: &VersionToken,
) -> SyncResult<Option<SyncCheckpoint>> {
    let Some(stored) = stored else {
        return Ok(None);
    };
    if stored.last_source_version == *incoming {
        return Ok(Some(stored.clone()));
    }
    ensure!(
        stored.last_source_version < *incoming,
        CheckpointConflictSnafu {
            stored: stored.last_source_version.clone(),
            incoming: incoming.clone(),
        }
    );
    Ok(None)
}

/// Reference a physical path from metadata rooted at `base`: files under the
/// table root are referenced relatively, anything else keeps its absolute
/// form verbatim.
pub(crate) fn reference_path(physical: &str, base: &str) -> String {
    match physical.strip_prefix(base) {
        Some(rest) => rest.trim_start_matches('/').to_string(),
        None => physical.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn checkpoint(version: u64) -> SyncCheckpoint {
        SyncCheckpoint {
            last_source_version: VersionToken::Number(version),
            last_source_instant_ms: 1000,
            target_metadata_version: "3".to_string(),
        }
    }

    #[test]
    fn registry_covers_every_format() {
        for format in [TableFormat::Delta, TableFormat::Iceberg, TableFormat::Hudi] {
            let handle = TargetTableHandle {
                name: "t".to_string(),
                location: TableLocation::local("/tmp/t"),
            };
            let adapter = create_target_adapter(format, handle).unwrap();
            assert_eq!(adapter.format(), format);
            assert!(adapter.supports_incremental());
        }
    }

    #[test]
    fn checkpoint_roundtrips_through_json() {
        let cp = checkpoint(9);
        let encoded = encode_checkpoint(&cp).unwrap();
        assert_eq!(decode_checkpoint(&encoded).unwrap(), cp);
    }

    #[test]
    fn guard_passes_fresh_targets() {
        assert_eq!(guard_version(None, &VersionToken::Number(1)).unwrap(), None);
    }

    #[test]
    fn guard_returns_stored_checkpoint_on_replay() {
        let cp = checkpoint(4);
        let out = guard_version(Some(&cp), &VersionToken::Number(4)).unwrap();
        assert_eq!(out, Some(cp));
    }

    #[test]
    fn guard_rejects_rewinds() {
        let cp = checkpoint(7);
        let err = guard_version(Some(&cp), &VersionToken::Number(5))
            .expect_err("rewind must conflict");
        assert!(matches!(err, SyncError::CheckpointConflict { .. }));
    }

    #[test]
    fn reference_path_relativizes_under_the_root() {
        assert_eq!(reference_path("/data/t/f.parquet", "/data/t"), "f.parquet");
        assert_eq!(
            reference_path("/elsewhere/f.parquet", "/data/t"),
            "/elsewhere/f.parquet"
        );
    }
}
