//! Source adapters: per-format readers of table metadata.
//!
//! A [`SourceAdapter`] exposes both full snapshots and incremental commit
//! diffs. Adapter instances are owned by the orchestrator for one sync round,
//! are not reentrant, and must not be shared across concurrent rounds: the
//! incremental changes cache inside each adapter has a single writer.
//!
//! Per-format constructors are looked up in a process-wide registry keyed by
//! [`TableFormat`], populated once at startup and never mutated.
pub mod delta;
pub mod hudi;
pub mod iceberg;

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use async_trait::async_trait;
use snafu::prelude::*;

use crate::error::{ConfigSnafu, SyncResult};
use crate::model::{
    CanonicalSchema, Commit, CommitPlan, SchemaVersion, Snapshot, SyncAnchor, TableDescriptor,
    TableFormat, VersionToken,
};
use crate::storage::TableLocation;

/// Identity of the source table handed to adapter factories.
#[derive(Debug, Clone)]
pub struct SourceTableHandle {
    pub name: String,
    pub location: TableLocation,
}

/// Reader contract every source format implements.
#[async_trait]
pub trait SourceAdapter: Send {
    /// The format this adapter reads.
    fn format(&self) -> TableFormat;

    /// The table descriptor at a version.
    async fn get_table(&mut self, at: &VersionToken) -> SyncResult<TableDescriptor>;

    /// Every schema version observed up to a version.
    async fn get_schema_catalog(
        &mut self,
        at: &VersionToken,
    ) -> SyncResult<BTreeMap<SchemaVersion, CanonicalSchema>>;

    /// The full current snapshot.
    async fn get_current_snapshot(&mut self) -> SyncResult<Snapshot>;

    /// Commits strictly after the anchor, or a full-sync directive when the
    /// log cannot serve them. Populates the incremental changes cache.
    async fn get_commit_state(&mut self, anchor: &SyncAnchor) -> SyncResult<CommitPlan>;

    /// One commit as a canonical diff. Commits must be requested in the
    /// ascending order of the plan.
    async fn get_commit(&mut self, version: &VersionToken) -> SyncResult<Commit>;

    /// Drop cached state at the end of a round.
    fn end_round(&mut self);
}

/// Factory constructing an adapter for one table. Construction is cheap;
/// all I/O happens lazily on first use.
pub type SourceFactory = fn(SourceTableHandle) -> Box<dyn SourceAdapter>;

fn registry() -> &'static HashMap<TableFormat, SourceFactory> {
    static REGISTRY: OnceLock<HashMap<TableFormat, SourceFactory>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<TableFormat, SourceFactory> = HashMap::new();
        map.insert(TableFormat::Delta, |handle| {
            Box::new(delta::DeltaSourceAdapter::new(handle))
        });
        map.insert(TableFormat::Iceberg, |handle| {
            Box::new(iceberg::IcebergSourceAdapter::new(handle))
        });
        map.insert(TableFormat::Hudi, |handle| {
            Box::new(hudi::HudiSourceAdapter::new(handle))
        });
        map
    })
}

/// Construct the source adapter for a format.
pub fn create_source_adapter(
    format: TableFormat,
    handle: SourceTableHandle,
) -> SyncResult<Box<dyn SourceAdapter>> {
    let factory = registry().get(&format).context(ConfigSnafu {
        detail: format!("no source adapter registered for {format}"),
    })?;
    Ok(factory(handle))
}

/// Bounded per-round cache of parsed commit payloads, keyed by the version
/// they belong to. Filled by `get_commit_state`, drained by `get_commit`,
/// cleared at round end.
#[derive(Debug)]
pub(crate) struct ChangesCache<T> {
    start: Option<VersionToken>,
    by_version: BTreeMap<VersionToken, T>,
}

impl<T> ChangesCache<T> {
    /// Upper bound on cached commits; one sync round never legitimately
    /// exceeds this.
    const MAX_ENTRIES: usize = 256;

    pub fn new() -> Self {
        ChangesCache {
            start: None,
            by_version: BTreeMap::new(),
        }
    }

    /// Begin caching a new range, discarding any previous one.
    pub fn reset(&mut self, start: VersionToken) {
        self.start = Some(start);
        self.by_version.clear();
    }

    pub fn insert(&mut self, version: VersionToken, payload: T) {
        if self.by_version.len() >= Self::MAX_ENTRIES {
            self.by_version.pop_first();
        }
        self.by_version.insert(version, payload);
    }

    pub fn get(&self, version: &VersionToken) -> Option<&T> {
        self.by_version.get(version)
    }

    pub fn clear(&mut self) {
        self.start = None;
        self.by_version.clear();
    }
}
