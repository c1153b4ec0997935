//! Helpers for building Delta transaction logs in temp dirs.
#![allow(dead_code)]
use std::collections::HashMap;

use serde_json::json;
use tablesync_core::formats::delta_log::{
    self, ActionLine, AddAction, CommitInfoAction, FormatSpec, MetaDataAction, ProtocolAction,
    RemoveAction,
};
use tablesync_core::storage::{self, TableLocation};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Schema with two nullable int columns.
pub fn two_int_schema() -> String {
    json!({
        "type": "struct",
        "fields": [
            {"name": "col1", "type": "integer", "nullable": true, "metadata": {}},
            {"name": "col2", "type": "integer", "nullable": true, "metadata": {}}
        ]
    })
    .to_string()
}

/// Schema with a string partition column and two int columns.
pub fn partitioned_schema() -> String {
    json!({
        "type": "struct",
        "fields": [
            {"name": "part_col", "type": "string", "nullable": true, "metadata": {}},
            {"name": "col1", "type": "integer", "nullable": true, "metadata": {}},
            {"name": "col2", "type": "integer", "nullable": true, "metadata": {}}
        ]
    })
    .to_string()
}

/// Two int columns plus an appended third column.
pub fn evolved_schema() -> String {
    json!({
        "type": "struct",
        "fields": [
            {"name": "col1", "type": "integer", "nullable": true, "metadata": {}},
            {"name": "col2", "type": "integer", "nullable": true, "metadata": {}},
            {"name": "col3", "type": "long", "nullable": true, "metadata": {}}
        ]
    })
    .to_string()
}

pub fn protocol() -> ActionLine {
    ActionLine::protocol(ProtocolAction {
        min_reader_version: 1,
        min_writer_version: 2,
    })
}

pub fn meta(schema: &str, partition_columns: &[&str]) -> ActionLine {
    ActionLine::meta_data(MetaDataAction {
        id: "3fa85f64-5717-4562-b3fc-2c963f66afa6".to_string(),
        name: Some("people".to_string()),
        format: FormatSpec::default(),
        schema_string: schema.to_string(),
        partition_columns: partition_columns.iter().map(|s| s.to_string()).collect(),
        configuration: HashMap::new(),
        created_time: Some(1_000),
    })
}

pub fn commit_info(timestamp: i64) -> ActionLine {
    ActionLine::commit_info(CommitInfoAction {
        timestamp,
        operation: Some("WRITE".to_string()),
    })
}

pub fn add(path: &str, partitions: &[(&str, &str)], records: u64) -> ActionLine {
    let partition_values: HashMap<String, Option<String>> = partitions
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect();
    let null_count: serde_json::Value = json!({});
    ActionLine::add(AddAction {
        path: path.to_string(),
        partition_values,
        size: 1_024,
        modification_time: 2_000,
        data_change: true,
        stats: Some(
            json!({
                "numRecords": records,
                "minValues": {},
                "maxValues": {},
                "nullCount": null_count,
            })
            .to_string(),
        ),
    })
}

pub fn remove(path: &str) -> ActionLine {
    ActionLine::remove(RemoveAction {
        path: path.to_string(),
        deletion_timestamp: Some(3_000),
        data_change: true,
        partition_values: None,
    })
}

pub async fn write_commit(
    location: &TableLocation,
    version: u64,
    actions: Vec<ActionLine>,
) -> TestResult {
    let payload = delta_log::encode_commit(&actions)?;
    storage::write_new(location, &delta_log::commit_rel_path(version), &payload).await?;
    Ok(())
}

/// File names (path with the base stripped) of a set of physical paths.
pub fn file_names<'a>(paths: impl Iterator<Item = &'a str>) -> std::collections::BTreeSet<String> {
    paths
        .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
        .collect()
}
