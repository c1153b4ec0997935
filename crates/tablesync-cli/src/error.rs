use std::path::PathBuf;

use snafu::Snafu;
use tablesync_core::SyncError;

pub type CliResult<T> = std::result::Result<T, CliError>;

/// Process exit codes promised to callers.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1;
pub const EXIT_TARGET_FAILED: i32 = 2;
pub const EXIT_SOURCE_FATAL: i32 = 3;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to read config {}: {source}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse config {}: {source}", path.display()))]
    ParseConfig {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display(
        "No table to sync: pass --config, or --table-path with at least one --target"
    ))]
    NoTables,

    #[snafu(display("Unknown table format '{value}': expected DELTA, ICEBERG, or HUDI"))]
    InvalidFormat { value: String },

    #[snafu(display("Invalid table location: {source}"))]
    Location {
        source: tablesync_core::storage::StorageError,
    },

    #[snafu(display("{source}"))]
    Config { source: SyncError },
}

impl CliError {
    /// All setup-stage errors are configuration errors to the caller.
    pub fn exit_code(&self) -> i32 {
        EXIT_CONFIG_ERROR
    }
}
