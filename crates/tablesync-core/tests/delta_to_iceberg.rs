//! Snapshot sync of Delta tables into Iceberg metadata.
mod common;

use common::*;
use tablesync_core::model::{LayoutStrategy, Scalar, TransformType};
use tablesync_core::source::{create_source_adapter, SourceAdapter as _, SourceTableHandle};
use tablesync_core::storage::TableLocation;
use tablesync_core::sync::SyncOrchestrator;
use tablesync_core::target::{create_target_adapter, TargetTableHandle};
use tablesync_core::{SyncConfig, TableFormat};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config(base: &str, targets: Vec<TableFormat>) -> SyncConfig {
    SyncConfig {
        table_name: "people".to_string(),
        table_base_path: base.to_string(),
        source_format: Some(TableFormat::Delta),
        target_table_formats: targets,
        hadoop_conf: Default::default(),
        incremental_max_commits: 20,
        incremental_sync_enabled: true,
        sync_timeout_ms: 600_000,
    }
}

async fn run_round(tmp: &TempDir, targets: Vec<TableFormat>) -> TestResult {
    let base = tmp.path().display().to_string();
    let cfg = config(&base, targets.clone());
    let location = TableLocation::local(tmp.path());

    let mut source = create_source_adapter(
        TableFormat::Delta,
        SourceTableHandle {
            name: "people".to_string(),
            location: location.clone(),
        },
    )?;
    let mut target_adapters = Vec::new();
    for format in targets {
        target_adapters.push(create_target_adapter(
            format,
            TargetTableHandle {
                name: "people".to_string(),
                location: location.clone(),
            },
        )?);
    }

    let summary = SyncOrchestrator::new(&cfg)
        .sync_round(
            source.as_mut(),
            &mut target_adapters,
            &CancellationToken::new(),
        )
        .await;
    assert!(summary.all_ok(), "round failed: {:?}", summary.results);
    Ok(())
}

async fn iceberg_snapshot(tmp: &TempDir) -> Result<tablesync_core::Snapshot, Box<dyn std::error::Error>> {
    let mut reader = create_source_adapter(
        TableFormat::Iceberg,
        SourceTableHandle {
            name: "people".to_string(),
            location: TableLocation::local(tmp.path()),
        },
    )?;
    Ok(reader.get_current_snapshot().await?)
}

#[tokio::test]
async fn non_partitioned_table_with_empty_checkpoint() -> TestResult {
    let tmp = TempDir::new()?;
    let location = TableLocation::local(tmp.path());
    write_commit(
        &location,
        0,
        vec![
            protocol(),
            meta(&two_int_schema(), &[]),
            add("part-00000.parquet", &[], 1),
        ],
    )
    .await?;

    run_round(&tmp, vec![TableFormat::Iceberg]).await?;

    // Read the emitted Iceberg table back through its own reader.
    let snapshot = iceberg_snapshot(&tmp).await?;
    assert_eq!(snapshot.files.file_count(), 1);
    let file = snapshot.files.all_files().next().unwrap();
    assert_eq!(
        file.physical_path,
        format!("{}/part-00000.parquet", tmp.path().display())
    );

    let schema = &snapshot.table.read_schema;
    assert_eq!(schema.fields.len(), 2);
    assert_eq!(schema.fields[0].field_id, Some(1));
    assert_eq!(schema.fields[1].field_id, Some(2));
    assert!(schema.fields[0].nullable);
    assert!(schema.fields[1].nullable);
    assert_eq!(snapshot.table.layout, LayoutStrategy::Flat);
    assert!(snapshot.table.partition_spec.is_unpartitioned());
    Ok(())
}

#[tokio::test]
async fn partitioned_table_keeps_partition_identity() -> TestResult {
    let tmp = TempDir::new()?;
    let location = TableLocation::local(tmp.path());
    write_commit(
        &location,
        0,
        vec![
            protocol(),
            meta(&partitioned_schema(), &["part_col"]),
            add(
                "part_col=SingleValue/part-00000.parquet",
                &[("part_col", "SingleValue")],
                1,
            ),
        ],
    )
    .await?;

    // The source view uses the directory-hierarchy layout.
    let mut source = create_source_adapter(
        TableFormat::Delta,
        SourceTableHandle {
            name: "people".to_string(),
            location: location.clone(),
        },
    )?;
    let source_snapshot = source.get_current_snapshot().await?;
    assert_eq!(
        source_snapshot.table.layout,
        LayoutStrategy::DirHierarchyPartitionValues
    );

    run_round(&tmp, vec![TableFormat::Iceberg]).await?;

    let snapshot = iceberg_snapshot(&tmp).await?;
    assert_eq!(
        snapshot.table.layout,
        LayoutStrategy::DirHierarchyPartitionValues
    );
    let spec = &snapshot.table.partition_spec;
    assert_eq!(spec.fields.len(), 1);
    assert_eq!(spec.fields[0].transform, TransformType::Value);
    assert_eq!(spec.fields[0].source_name(), "part_col");

    let file = snapshot.files.all_files().next().unwrap();
    assert_eq!(file.partition_values.len(), 1);
    let range = file.partition_values[0].range.as_ref().expect("non-null");
    assert_eq!(range.min(), &Scalar::String("SingleValue".to_string()));
    assert_eq!(range.max(), &Scalar::String("SingleValue".to_string()));
    Ok(())
}

#[tokio::test]
async fn added_column_gets_a_fresh_id_and_old_files_survive() -> TestResult {
    let tmp = TempDir::new()?;
    let location = TableLocation::local(tmp.path());
    write_commit(
        &location,
        0,
        vec![
            protocol(),
            meta(&two_int_schema(), &[]),
            add("f1.parquet", &[], 50),
        ],
    )
    .await?;
    write_commit(&location, 1, vec![add("f2.parquet", &[], 50)]).await?;
    write_commit(
        &location,
        2,
        vec![meta(&evolved_schema(), &[]), add("f3.parquet", &[], 50)],
    )
    .await?;

    run_round(&tmp, vec![TableFormat::Iceberg]).await?;

    let snapshot = iceberg_snapshot(&tmp).await?;
    let schema = &snapshot.table.read_schema;
    assert_eq!(schema.fields.len(), 3);
    let col3 = schema.field_at_path("col3").expect("new column");
    assert!(col3.nullable);
    assert_eq!(col3.field_id, Some(3));

    let names = file_names(snapshot.files.all_files().map(|f| f.physical_path.as_str()));
    assert!(names.contains("f1.parquet"));
    assert!(names.contains("f2.parquet"));
    assert!(names.contains("f3.parquet"));
    Ok(())
}

#[tokio::test]
async fn second_round_without_new_commits_is_a_noop() -> TestResult {
    let tmp = TempDir::new()?;
    let location = TableLocation::local(tmp.path());
    write_commit(
        &location,
        0,
        vec![
            protocol(),
            meta(&two_int_schema(), &[]),
            add("f1.parquet", &[], 50),
        ],
    )
    .await?;

    run_round(&tmp, vec![TableFormat::Iceberg]).await?;
    let hint_before = tokio::fs::read_to_string(tmp.path().join("metadata/version-hint.text"))
        .await?;

    run_round(&tmp, vec![TableFormat::Iceberg]).await?;
    let hint_after = tokio::fs::read_to_string(tmp.path().join("metadata/version-hint.text"))
        .await?;

    // No new target commit was written.
    assert_eq!(hint_before, hint_after);
    Ok(())
}

#[tokio::test]
async fn one_round_can_fan_out_to_several_targets() -> TestResult {
    let tmp = TempDir::new()?;
    let location = TableLocation::local(tmp.path());
    write_commit(
        &location,
        0,
        vec![
            protocol(),
            meta(&two_int_schema(), &[]),
            add("f1.parquet", &[], 50),
        ],
    )
    .await?;

    run_round(&tmp, vec![TableFormat::Iceberg, TableFormat::Hudi]).await?;

    let iceberg = iceberg_snapshot(&tmp).await?;
    assert_eq!(iceberg.files.file_count(), 1);

    let mut hudi = create_source_adapter(
        TableFormat::Hudi,
        SourceTableHandle {
            name: "people".to_string(),
            location: TableLocation::local(tmp.path()),
        },
    )?;
    let hudi_snapshot = hudi.get_current_snapshot().await?;
    assert_eq!(
        file_names(hudi_snapshot.files.all_files().map(|f| f.physical_path.as_str())),
        file_names(iceberg.files.all_files().map(|f| f.physical_path.as_str()))
    );
    Ok(())
}
