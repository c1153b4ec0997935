//! End-to-end tests driving the `tablesync` binary.
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_delta_table(root: &std::path::Path) -> TestResult {
    let log_dir = root.join("_delta_log");
    std::fs::create_dir_all(&log_dir)?;
    let schema = json!({
        "type": "struct",
        "fields": [
            {"name": "col1", "type": "integer", "nullable": true, "metadata": {}},
            {"name": "col2", "type": "integer", "nullable": true, "metadata": {}}
        ]
    });
    let lines = [
        json!({"protocol": {"minReaderVersion": 1, "minWriterVersion": 2}}),
        json!({"metaData": {
            "id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "name": "people",
            "format": {"provider": "parquet", "options": {}},
            "schemaString": schema.to_string(),
            "partitionColumns": [],
            "configuration": {},
            "createdTime": 1000
        }}),
        json!({"add": {
            "path": "part-00000.parquet",
            "partitionValues": {},
            "size": 1024,
            "modificationTime": 1000,
            "dataChange": true,
            "stats": "{\"numRecords\":1,\"minValues\":{\"col1\":1,\"col2\":2},\"maxValues\":{\"col1\":1,\"col2\":2},\"nullCount\":{\"col1\":0,\"col2\":0}}"
        }}),
    ];
    let payload: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(log_dir.join("00000000000000000000.json"), payload)?;
    Ok(())
}

#[test]
fn no_arguments_prints_usage() {
    Command::cargo_bin("tablesync")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn sync_without_tables_is_a_config_error() {
    Command::cargo_bin("tablesync")
        .unwrap()
        .arg("sync")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--table-path"));
}

#[test]
fn unknown_target_format_is_a_config_error() -> TestResult {
    let tmp = TempDir::new()?;
    write_delta_table(tmp.path())?;
    Command::cargo_bin("tablesync")
        .unwrap()
        .args([
            "sync",
            "--table-path",
            tmp.path().to_str().unwrap(),
            "--target",
            "CSV",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown table format"));
    Ok(())
}

#[test]
fn delta_to_iceberg_sync_succeeds() -> TestResult {
    let tmp = TempDir::new()?;
    write_delta_table(tmp.path())?;

    Command::cargo_bin("tablesync")
        .unwrap()
        .args([
            "sync",
            "--table-path",
            tmp.path().to_str().unwrap(),
            "--table-name",
            "people",
            "--target",
            "ICEBERG",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("ICEBERG"))
        .stdout(predicate::str::contains("OK"));

    assert!(tmp.path().join("metadata/version-hint.text").exists());
    Ok(())
}

#[test]
fn check_reports_the_inferred_format() -> TestResult {
    let tmp = TempDir::new()?;
    write_delta_table(tmp.path())?;
    let config = tmp.path().join("sync.yaml");
    std::fs::write(
        &config,
        format!(
            "table_name: people\ntable_base_path: {}\ntarget_table_formats: [ICEBERG]\n",
            tmp.path().display()
        ),
    )?;

    Command::cargo_bin("tablesync")
        .unwrap()
        .args(["check", "--config", config.to_str().unwrap()])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("DELTA"));
    Ok(())
}
