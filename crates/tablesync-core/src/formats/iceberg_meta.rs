//! Iceberg metadata file shapes shared by the source and target adapters.
//!
//! The table metadata document is kebab-case JSON (`v<N>.metadata.json`,
//! discovered through `metadata/version-hint.text`); manifests and manifest
//! lists are Avro files whose entries are (de)serialized through serde.
//! Partition values inside manifests are carried as serialized strings keyed
//! by partition field name, with nulls encoded by the Hive default token.
use std::collections::HashMap;
use std::path::PathBuf;

use apache_avro::{from_value, Reader as AvroReader, Schema as AvroSchema, Writer as AvroWriter};
use serde::{Deserialize, Serialize};

use crate::error::{SourceReadSnafu, SyncResult, TargetWriteSnafu};

/// Directory of metadata documents under the table root.
pub const METADATA_DIR: &str = "metadata";
/// Pointer file holding the latest metadata version number.
pub const VERSION_HINT_FILE: &str = "version-hint.text";

/// Manifest entry status: carried over from an earlier snapshot.
pub const STATUS_EXISTING: i32 = 0;
/// Manifest entry status: added by this snapshot.
pub const STATUS_ADDED: i32 = 1;
/// Manifest entry status: removed by this snapshot.
pub const STATUS_DELETED: i32 = 2;

/// Relative path of `v<N>.metadata.json`.
pub fn metadata_file(version: u64) -> PathBuf {
    PathBuf::from(METADATA_DIR).join(format!("v{version}.metadata.json"))
}

/// Relative path of the version hint.
pub fn version_hint_file() -> PathBuf {
    PathBuf::from(METADATA_DIR).join(VERSION_HINT_FILE)
}

/// The table metadata document, format version 2.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    pub format_version: u8,
    pub table_uuid: String,
    pub location: String,
    pub last_sequence_number: i64,
    pub last_updated_ms: i64,
    pub last_column_id: i32,
    /// Schema documents with their embedded `schema-id`.
    pub schemas: Vec<serde_json::Value>,
    pub current_schema_id: i32,
    pub partition_specs: Vec<IcebergPartitionSpec>,
    pub default_spec_id: i32,
    pub last_partition_id: i32,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub snapshots: Vec<IcebergSnapshot>,
    #[serde(default)]
    pub sort_orders: Vec<serde_json::Value>,
    #[serde(default)]
    pub default_sort_order_id: i32,
}

impl TableMetadata {
    /// The schema document with the given id.
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&serde_json::Value> {
        self.schemas.iter().find(|s| {
            s.get("schema-id").and_then(serde_json::Value::as_i64) == Some(schema_id as i64)
        })
    }

    /// The current snapshot, if the table has one.
    pub fn current_snapshot(&self) -> Option<&IcebergSnapshot> {
        let id = self.current_snapshot_id?;
        self.snapshots.iter().find(|s| s.snapshot_id == id)
    }

    /// The default partition spec.
    pub fn default_spec(&self) -> Option<&IcebergPartitionSpec> {
        self.partition_specs
            .iter()
            .find(|s| s.spec_id == self.default_spec_id)
    }
}

/// One snapshot entry in the metadata document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct IcebergSnapshot {
    pub snapshot_id: i64,
    pub sequence_number: i64,
    pub timestamp_ms: i64,
    /// Path of the snapshot's manifest list, relative to the table root.
    pub manifest_list: String,
    #[serde(default)]
    pub summary: HashMap<String, String>,
    pub schema_id: i32,
}

/// A partition spec document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct IcebergPartitionSpec {
    pub spec_id: i32,
    pub fields: Vec<IcebergPartitionField>,
}

/// One partition dimension inside a spec document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct IcebergPartitionField {
    pub name: String,
    pub transform: String,
    pub source_id: i32,
    pub field_id: i32,
}

/// An integer-keyed count, the manifest encoding of per-field statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct I64Entry {
    pub key: i32,
    pub value: i64,
}

/// An integer-keyed serialized bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrEntry {
    pub key: i32,
    pub value: String,
}

/// The data-file record inside a manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestDataFile {
    pub file_path: String,
    pub file_format: String,
    /// Serialized partition values keyed by spec field name.
    pub partition: HashMap<String, String>,
    pub record_count: i64,
    pub file_size_in_bytes: i64,
    pub value_counts: Vec<I64Entry>,
    pub null_value_counts: Vec<I64Entry>,
    pub column_sizes: Vec<I64Entry>,
    pub lower_bounds: Vec<StrEntry>,
    pub upper_bounds: Vec<StrEntry>,
}

/// One entry of a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub status: i32,
    pub snapshot_id: i64,
    pub data_file: ManifestDataFile,
}

/// One entry of a manifest list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestFileEntry {
    pub manifest_path: String,
    pub manifest_length: i64,
    pub partition_spec_id: i32,
    pub added_snapshot_id: i64,
    pub added_files_count: i32,
    pub existing_files_count: i32,
    pub deleted_files_count: i32,
}

const MANIFEST_ENTRY_SCHEMA: &str = r#"{
    "type": "record",
    "name": "manifest_entry",
    "fields": [
        {"name": "status", "type": "int"},
        {"name": "snapshot_id", "type": "long"},
        {"name": "data_file", "type": {
            "type": "record",
            "name": "data_file",
            "fields": [
                {"name": "file_path", "type": "string"},
                {"name": "file_format", "type": "string"},
                {"name": "partition", "type": {"type": "map", "values": "string"}},
                {"name": "record_count", "type": "long"},
                {"name": "file_size_in_bytes", "type": "long"},
                {"name": "value_counts", "type": {"type": "array", "items": {
                    "type": "record",
                    "name": "i64_entry",
                    "fields": [
                        {"name": "key", "type": "int"},
                        {"name": "value", "type": "long"}
                    ]
                }}},
                {"name": "null_value_counts", "type": {"type": "array", "items": "i64_entry"}},
                {"name": "column_sizes", "type": {"type": "array", "items": "i64_entry"}},
                {"name": "lower_bounds", "type": {"type": "array", "items": {
                    "type": "record",
                    "name": "str_entry",
                    "fields": [
                        {"name": "key", "type": "int"},
                        {"name": "value", "type": "string"}
                    ]
                }}},
                {"name": "upper_bounds", "type": {"type": "array", "items": "str_entry"}}
            ]
        }}
    ]
}"#;

const MANIFEST_FILE_SCHEMA: &str = r#"{
    "type": "record",
    "name": "manifest_file",
    "fields": [
        {"name": "manifest_path", "type": "string"},
        {"name": "manifest_length", "type": "long"},
        {"name": "partition_spec_id", "type": "int"},
        {"name": "added_snapshot_id", "type": "long"},
        {"name": "added_files_count", "type": "int"},
        {"name": "existing_files_count", "type": "int"},
        {"name": "deleted_files_count", "type": "int"}
    ]
}"#;

fn manifest_entry_schema() -> SyncResult<AvroSchema> {
    AvroSchema::parse_str(MANIFEST_ENTRY_SCHEMA).map_err(|e| {
        TargetWriteSnafu {
            detail: format!("manifest schema definition: {e}"),
        }
        .build()
    })
}

fn manifest_file_schema() -> SyncResult<AvroSchema> {
    AvroSchema::parse_str(MANIFEST_FILE_SCHEMA).map_err(|e| {
        TargetWriteSnafu {
            detail: format!("manifest list schema definition: {e}"),
        }
        .build()
    })
}

/// Serialize manifest entries to Avro bytes.
pub fn write_manifest(entries: &[ManifestEntry]) -> SyncResult<Vec<u8>> {
    let schema = manifest_entry_schema()?;
    let mut writer = AvroWriter::new(&schema, Vec::new());
    for entry in entries {
        writer.append_ser(entry).map_err(|e| {
            TargetWriteSnafu {
                detail: format!("manifest entry for {}: {e}", entry.data_file.file_path),
            }
            .build()
        })?;
    }
    writer.into_inner().map_err(|e| {
        TargetWriteSnafu {
            detail: format!("finalizing manifest: {e}"),
        }
        .build()
    })
}

/// Parse manifest entries from Avro bytes.
pub fn read_manifest(bytes: &[u8]) -> SyncResult<Vec<ManifestEntry>> {
    let reader = AvroReader::new(bytes).map_err(|e| {
        SourceReadSnafu {
            detail: format!("opening manifest: {e}"),
        }
        .build()
    })?;
    let mut entries = Vec::new();
    for value in reader {
        let value = value.map_err(|e| {
            SourceReadSnafu {
                detail: format!("reading manifest block: {e}"),
            }
            .build()
        })?;
        entries.push(from_value::<ManifestEntry>(&value).map_err(|e| {
            SourceReadSnafu {
                detail: format!("decoding manifest entry: {e}"),
            }
            .build()
        })?);
    }
    Ok(entries)
}

/// Serialize a manifest list to Avro bytes.
pub fn write_manifest_list(manifests: &[ManifestFileEntry]) -> SyncResult<Vec<u8>> {
    let schema = manifest_file_schema()?;
    let mut writer = AvroWriter::new(&schema, Vec::new());
    for manifest in manifests {
        writer.append_ser(manifest).map_err(|e| {
            TargetWriteSnafu {
                detail: format!("manifest list entry {}: {e}", manifest.manifest_path),
            }
            .build()
        })?;
    }
    writer.into_inner().map_err(|e| {
        TargetWriteSnafu {
            detail: format!("finalizing manifest list: {e}"),
        }
        .build()
    })
}

/// Parse a manifest list from Avro bytes.
pub fn read_manifest_list(bytes: &[u8]) -> SyncResult<Vec<ManifestFileEntry>> {
    let reader = AvroReader::new(bytes).map_err(|e| {
        SourceReadSnafu {
            detail: format!("opening manifest list: {e}"),
        }
        .build()
    })?;
    let mut manifests = Vec::new();
    for value in reader {
        let value = value.map_err(|e| {
            SourceReadSnafu {
                detail: format!("reading manifest list block: {e}"),
            }
            .build()
        })?;
        manifests.push(from_value::<ManifestFileEntry>(&value).map_err(|e| {
            SourceReadSnafu {
                detail: format!("decoding manifest list entry: {e}"),
            }
            .build()
        })?);
    }
    Ok(manifests)
}

/// Interpret the contents of `version-hint.text`.
pub fn parse_version_hint(contents: &str) -> SyncResult<u64> {
    contents.trim().parse().map_err(|_| {
        SourceReadSnafu {
            detail: format!("invalid version hint '{}'", contents.trim()),
        }
        .build()
    })
}
