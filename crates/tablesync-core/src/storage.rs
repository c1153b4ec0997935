//! Filesystem layout and path utilities.
//!
//! This module centralizes all storage interactions for `tablesync-core`.
//! Source adapters only read; target adapters additionally rely on two write
//! primitives with distinct semantics:
//!
//! - [`write_new`] creates a file with create-only-if-absent semantics, the
//!   atomic guard behind per-version commit files.
//! - [`write_atomic`] replaces a file via a staged sibling plus rename, used
//!   for version pointers and property files that are legitimately
//!   overwritten. Staged files are dot-prefixed so log listings never
//!   mistake one for a commit.
//!
//! Backend dispatch happens once, in [`resolve`]; everything below it works
//! on absolute paths. Only the local filesystem backend exists today; the
//! `TableLocation` enum leaves room for object-store backends (which would
//! consume the configuration's credential map) without rewriting adapter
//! code.

use snafu::{Backtrace, IntoError, prelude::*};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// Result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root location of a table's data and metadata.
#[derive(Clone, Debug)]
pub enum TableLocation {
    /// A table on the local filesystem.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

impl TableLocation {
    /// Creates a `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Parse a user-facing base path string.
    ///
    /// Only local filesystem paths are supported; `file://` prefixes are
    /// stripped.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.strip_prefix("file://").unwrap_or(spec);
        ensure!(
            !trimmed.is_empty(),
            InvalidLocationSnafu { spec: spec.to_string() }
        );
        Ok(TableLocation::Local(PathBuf::from(trimmed)))
    }

    /// The base path as a display string, without a scheme.
    pub fn base_path(&self) -> String {
        match self {
            TableLocation::Local(root) => root.display().to_string(),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists { path: String, backtrace: Backtrace },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    LocalIo {
        /// The path where the I/O error occurred.
        path: String,
        /// The underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The base path string could not be interpreted.
    #[snafu(display("Invalid table location: {spec}"))]
    InvalidLocation { spec: String, backtrace: Backtrace },
}

/// Resolve a table-relative path against the location's backend. The single
/// point where backend dispatch happens.
fn resolve(location: &TableLocation, rel: &Path) -> PathBuf {
    match location {
        TableLocation::Local(root) => root.join(rel),
    }
}

/// Context selector for an I/O failure at `path`, shared by every primitive.
fn io_at(path: &Path) -> LocalIoSnafu<String> {
    LocalIoSnafu {
        path: path.display().to_string(),
    }
}

/// Map a read failure: a missing file becomes `NotFound`, everything else
/// keeps its I/O detail.
fn read_failure(path: &Path, source: io::Error) -> StorageError {
    if source.kind() == io::ErrorKind::NotFound {
        NotFoundSnafu {
            path: path.display().to_string(),
        }
        .build()
    } else {
        io_at(path).into_error(source)
    }
}

async fn ensure_parent(abs: &Path) -> StorageResult<()> {
    let Some(parent) = abs.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).await.context(io_at(parent))
}

/// Dot-prefixed sibling used to stage atomic replacements.
fn staging_sibling(abs: &Path) -> PathBuf {
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "staged".to_string());
    abs.with_file_name(format!(".{name}.staged"))
}

/// Create `path` and persist `contents` to disk, syncing before return.
async fn persist(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(path).await.context(io_at(path))?;
    file.write_all(contents).await.context(io_at(path))?;
    file.sync_all().await.context(io_at(path))
}

/// Write `contents` to `rel_path` inside `location` using an atomic replace.
///
/// The payload is staged next to the target and renamed into place, so
/// readers never observe a partial file. Missing parent directories are
/// created.
pub async fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = resolve(location, rel_path);
    ensure_parent(&abs).await?;

    let staged = staging_sibling(&abs);
    persist(&staged, contents).await?;
    fs::rename(&staged, &abs).await.context(io_at(&abs))
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file exists.
///
/// This is the uniqueness guard for per-version commit files: two writers
/// racing on the same version cannot both succeed.
pub async fn write_new(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = resolve(location, rel_path);
    ensure_parent(&abs).await?;

    let opened = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await;
    let mut file = match opened {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return AlreadyExistsSnafu {
                path: abs.display().to_string(),
            }
            .fail();
        }
        Err(e) => return Err(e).context(io_at(&abs)),
    };
    file.write_all(contents).await.context(io_at(&abs))?;
    file.sync_all().await.context(io_at(&abs))
}

/// Read the file at `rel_path` within `location` as a `String`.
pub async fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = resolve(location, rel_path);
    fs::read_to_string(&abs)
        .await
        .map_err(|e| read_failure(&abs, e))
}

/// Read the file at `rel_path` within `location` as raw bytes.
///
/// Used for Avro manifests and Parquet footers.
pub async fn read_bytes(location: &TableLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = resolve(location, rel_path);
    fs::read(&abs).await.map_err(|e| read_failure(&abs, e))
}

/// List the file names (not paths) directly under `rel_dir`, sorted.
///
/// A missing directory returns `NotFound`; callers decide whether that means
/// "fresh table" or corruption. Staged files are never listed.
pub async fn list_dir(location: &TableLocation, rel_dir: &Path) -> StorageResult<Vec<String>> {
    let abs = resolve(location, rel_dir);

    let mut entries = fs::read_dir(&abs).await.map_err(|e| read_failure(&abs, e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.context(io_at(&abs))? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.ends_with(".staged") {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Whether `rel_path` exists under `location` (file or directory).
pub async fn exists(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = resolve(location, rel_path);
    match fs::metadata(&abs).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(io_at(&abs)),
    }
}
