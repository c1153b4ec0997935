//! The error taxonomy shared by translators, adapters, and the orchestrator.
//!
//! Every failure in the engine is a [`SyncError`] value with a kind tag, a
//! human-readable message, and a captured backtrace. Nothing in this crate
//! panics on bad metadata; adapters return errors and the orchestrator decides
//! how far the damage spreads (one target, or the whole round).
use snafu::{Backtrace, Snafu};

use crate::model::VersionToken;
use crate::storage::StorageError;

/// Result alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Stable tag identifying the class of a [`SyncError`].
///
/// Per-target results report this tag so callers can react without string
/// matching on display output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedType,
    UnsupportedPartitionTransform,
    UnsupportedFeature,
    InvalidSchema,
    InvalidPartitionSpec,
    InvalidDiff,
    SchemaMismatch,
    SourceReadError,
    SourceVersionMissing,
    TargetWriteError,
    CheckpointConflict,
    ConfigError,
}

/// Errors produced while translating metadata or driving a sync round.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    /// The source schema contains a type with no canonical analog.
    #[snafu(display("Unsupported type {type_name} at {path}"))]
    UnsupportedType {
        /// The offending type, as spelled by the source format.
        type_name: String,
        /// Dotted path of the field carrying the type.
        path: String,
        backtrace: Backtrace,
    },

    /// A partition transform that cannot be expressed in the target format,
    /// or a generated-column expression we refuse to guess at.
    #[snafu(display("Unsupported partition transform: {detail}"))]
    UnsupportedPartitionTransform { detail: String, backtrace: Backtrace },

    /// A source feature with no equivalent in the requested target
    /// (for example merge-on-read log files when writing copy-on-write).
    #[snafu(display("Unsupported feature: {detail}"))]
    UnsupportedFeature { detail: String, backtrace: Backtrace },

    /// Structurally invalid schema (map without key/value, array without
    /// element, malformed type JSON).
    #[snafu(display("Invalid schema: {detail}"))]
    InvalidSchema { detail: String, backtrace: Backtrace },

    /// Partition spec violates its invariants (duplicate granularities,
    /// time transform over a non-temporal column).
    #[snafu(display("Invalid partition spec: {detail}"))]
    InvalidPartitionSpec { detail: String, backtrace: Backtrace },

    /// A files diff lists the same physical path as both added and removed.
    #[snafu(display("Invalid files diff: {path} is both added and removed"))]
    InvalidDiff { path: String, backtrace: Backtrace },

    /// A record-key path could not be resolved against the emitted schema.
    #[snafu(display("Schema mismatch: {detail}"))]
    SchemaMismatch { detail: String, backtrace: Backtrace },

    /// Failed to read or interpret source metadata.
    #[snafu(display("Source read failed: {detail}"))]
    SourceRead { detail: String, backtrace: Backtrace },

    /// Failed to read source metadata from storage.
    #[snafu(display("Source read failed at {detail}"))]
    SourceStorage {
        detail: String,
        source: StorageError,
        backtrace: Backtrace,
    },

    /// The requested source version is not (or no longer) present in the log.
    #[snafu(display("Source version {version} is missing"))]
    SourceVersionMissing {
        version: VersionToken,
        backtrace: Backtrace,
    },

    /// Failed to write or commit target metadata.
    #[snafu(display("Target write failed: {detail}"))]
    TargetWrite { detail: String, backtrace: Backtrace },

    /// Failed to write target metadata to storage.
    #[snafu(display("Target write failed at {detail}"))]
    TargetStorage {
        detail: String,
        source: StorageError,
        backtrace: Backtrace,
    },

    /// The target already carries a checkpoint newer than the commit being
    /// applied. The target is skipped; its checkpoint is never rolled back.
    #[snafu(display(
        "Checkpoint conflict: target is at {stored}, refusing to rewind to {incoming}"
    ))]
    CheckpointConflict {
        stored: VersionToken,
        incoming: VersionToken,
        backtrace: Backtrace,
    },

    /// Invalid or incomplete configuration.
    #[snafu(display("Configuration error: {detail}"))]
    Config { detail: String, backtrace: Backtrace },
}

impl SyncError {
    /// The class tag for this error, used in per-target sync results.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            SyncError::UnsupportedPartitionTransform { .. } => {
                ErrorKind::UnsupportedPartitionTransform
            }
            SyncError::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            SyncError::InvalidSchema { .. } => ErrorKind::InvalidSchema,
            SyncError::InvalidPartitionSpec { .. } => ErrorKind::InvalidPartitionSpec,
            SyncError::InvalidDiff { .. } => ErrorKind::InvalidDiff,
            SyncError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            SyncError::SourceRead { .. } | SyncError::SourceStorage { .. } => {
                ErrorKind::SourceReadError
            }
            SyncError::SourceVersionMissing { .. } => ErrorKind::SourceVersionMissing,
            SyncError::TargetWrite { .. } | SyncError::TargetStorage { .. } => {
                ErrorKind::TargetWriteError
            }
            SyncError::CheckpointConflict { .. } => ErrorKind::CheckpointConflict,
            SyncError::Config { .. } => ErrorKind::ConfigError,
        }
    }
}
