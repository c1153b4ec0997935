//! The canonical intermediate model.
//!
//! Pure value types shared by every translator and adapter: schemas with
//! field identity across evolution, partition specs with value-transform
//! semantics, per-file representations with column statistics, and the
//! commit/snapshot/checkpoint envelope the orchestrator moves around.
//!
//! Everything here is immutable once constructed; mutation is by building a
//! new value. No canonical value outlives a single sync round.
pub mod commit;
pub mod file;
pub mod partition;
pub mod schema;
pub mod stat;
pub mod table;

pub use commit::{
    Commit, CommitPlan, SchemaVersion, Snapshot, SyncAnchor, SyncCheckpoint, VersionToken,
};
pub use file::{DataFile, DataFilesDiff, FileFormat, PartitionedDataFiles};
pub use partition::{PartitionField, PartitionSpec, PartitionValue, TransformType};
pub use schema::{
    CanonicalField, CanonicalKind, CanonicalSchema, TimestampPrecision, TypeMetadata,
};
pub use stat::{ColumnStat, Range, Scalar};
pub use table::{LayoutStrategy, TableDescriptor, TableFormat};
