//! Format-independent synchronization engine for columnar table metadata.
//!
//! A table written in one format (an append-only JSON commit log, a
//! manifest tree, a timeline of instants) is made readable in another by
//! translating its *metadata* while referencing the same physical Parquet
//! files. No data is rewritten, copied, or renamed.
//!
//! The moving parts, leaves first:
//! - [`model`]: the canonical intermediate model: schemas with stable field
//!   identity, partition specs with value-transform semantics, per-file
//!   statistics, commits and snapshots.
//! - [`schema`], [`partition`], [`stats`]: bidirectional translation between
//!   the canonical model and each format's conventions.
//! - [`formats`]: the wire shapes (Delta action log, Iceberg metadata and
//!   Avro manifests, Hudi timeline) shared by readers and writers.
//! - [`source`]: per-format readers exposing snapshots and incremental
//!   commit diffs, with a per-round changes cache.
//! - [`target`]: per-format writers applying snapshots and diffs
//!   idempotently, persisting the sync checkpoint inside their own metadata.
//! - [`sync`]: the orchestrator that picks snapshot or incremental mode per
//!   target and isolates failures.
//!
//! Adapters do blocking metadata I/O through [`storage`]; one orchestrator
//! invocation is a *sync round* that owns its adapters and shares nothing
//! with concurrent rounds.
pub mod config;
pub mod error;
pub mod formats;
pub mod model;
pub mod partition;
pub mod schema;
pub mod source;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod target;

pub use config::{SyncConfig, SyncRunnerConfig};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use model::{
    CanonicalSchema, Commit, DataFile, DataFilesDiff, Snapshot, SyncCheckpoint, TableDescriptor,
    TableFormat, VersionToken,
};
pub use source::{create_source_adapter, SourceAdapter, SourceTableHandle};
pub use storage::TableLocation;
pub use sync::{RoundSummary, SyncOrchestrator, SyncStatus, TargetSyncResult};
pub use target::{create_target_adapter, TargetAdapter, TargetTableHandle};
