//! Thin command-line runner around `tablesync-core`.
//!
//! One invocation runs one sync round per configured table; tables run
//! concurrently, targets within a table sequentially. Exit codes: 0 full
//! success, 1 configuration error, 2 at least one target failed, 3 a
//! source-side fatal error cut a round short.

mod error;

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tablesync_core::{
    config::infer_source_format, create_source_adapter, create_target_adapter, RoundSummary,
    SourceTableHandle, SyncConfig, SyncOrchestrator, SyncRunnerConfig, SyncStatus, TableFormat,
    TableLocation, TargetTableHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{
    CliResult, ConfigSnafu, InvalidFormatSnafu, LocationSnafu, NoTablesSnafu, ParseConfigSnafu,
    ReadConfigSnafu, EXIT_CONFIG_ERROR, EXIT_OK, EXIT_SOURCE_FATAL, EXIT_TARGET_FAILED,
};

#[derive(Debug, Parser)]
#[command(name = "tablesync", version, about = "Sync table metadata across formats")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync round for each configured table
    Sync {
        /// YAML config: a single table document or `tables:` batch
        #[arg(long)]
        config: Option<PathBuf>,

        /// Source table root (instead of --config)
        #[arg(long = "table-path")]
        table_path: Option<String>,

        /// Table name; defaults to the directory name
        #[arg(long = "table-name")]
        table_name: Option<String>,

        /// Source format; inferred from the directory when omitted
        #[arg(long = "source-format")]
        source_format: Option<String>,

        /// Target format, repeatable (DELTA, ICEBERG, HUDI)
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Validate a config document and report the resolved source formats
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> CliResult<i32> {
    match cli.command {
        Command::Sync {
            config,
            table_path,
            table_name,
            source_format,
            targets,
        } => {
            let tables =
                gather_tables(config, table_path, table_name, source_format, targets).await?;
            run_sync(tables).await
        }
        Command::Check { config } => {
            let tables = load_config(&config).await?;
            for table in &tables {
                table.validate().context(ConfigSnafu)?;
                let location =
                    TableLocation::parse(&table.table_base_path).context(LocationSnafu)?;
                let format = table
                    .resolve_source_format(&location)
                    .await
                    .context(ConfigSnafu)?;
                println!("{}: {} -> {:?}", table.table_name, format, table.target_table_formats);
            }
            Ok(EXIT_OK)
        }
    }
}

async fn gather_tables(
    config: Option<PathBuf>,
    table_path: Option<String>,
    table_name: Option<String>,
    source_format: Option<String>,
    targets: Vec<String>,
) -> CliResult<Vec<SyncConfig>> {
    if let Some(path) = config {
        return load_config(&path).await;
    }
    let Some(table_base_path) = table_path else {
        return NoTablesSnafu.fail();
    };
    if targets.is_empty() {
        return NoTablesSnafu.fail();
    }
    let table_name = table_name.unwrap_or_else(|| {
        PathBuf::from(&table_base_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string())
    });
    Ok(vec![SyncConfig {
        table_name,
        table_base_path,
        source_format: source_format.map(|s| parse_format(&s)).transpose()?,
        target_table_formats: targets
            .iter()
            .map(|t| parse_format(t))
            .collect::<CliResult<Vec<_>>>()?,
        hadoop_conf: Default::default(),
        incremental_max_commits: 20,
        incremental_sync_enabled: true,
        sync_timeout_ms: 600_000,
    }])
}

fn parse_format(raw: &str) -> CliResult<TableFormat> {
    TableFormat::from_str(raw).map_err(|_| {
        InvalidFormatSnafu {
            value: raw.to_string(),
        }
        .build()
    })
}

async fn load_config(path: &PathBuf) -> CliResult<Vec<SyncConfig>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(ReadConfigSnafu { path: path.clone() })?;
    // A batch document or a single-table document.
    if let Ok(batch) = serde_yaml::from_str::<SyncRunnerConfig>(&contents) {
        return Ok(batch.tables);
    }
    let single: SyncConfig =
        serde_yaml::from_str(&contents).context(ParseConfigSnafu { path: path.clone() })?;
    Ok(vec![single])
}

async fn run_sync(tables: Vec<SyncConfig>) -> CliResult<i32> {
    for table in &tables {
        table.validate().context(ConfigSnafu)?;
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    // Coarse parallelism across source tables; each round is sequential
    // inside.
    let mut join_set = tokio::task::JoinSet::new();
    for table in tables {
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let name = table.table_name.clone();
            let summary = sync_one_table(table, cancel).await;
            (name, summary)
        });
    }

    let mut exit = EXIT_OK;
    while let Some(joined) = join_set.join_next().await {
        let Ok((name, summary)) = joined else {
            eprintln!("sync task panicked");
            exit = exit.max(EXIT_SOURCE_FATAL);
            continue;
        };
        match summary {
            Err(e) => {
                eprintln!("{name}: {e}");
                exit = exit.max(EXIT_CONFIG_ERROR);
            }
            Ok(summary) => {
                print_summary(&name, &summary);
                if summary.source_fatal {
                    exit = exit.max(EXIT_SOURCE_FATAL);
                } else if summary
                    .results
                    .iter()
                    .any(|r| r.status == SyncStatus::Failed)
                {
                    exit = exit.max(EXIT_TARGET_FAILED);
                }
            }
        }
    }
    Ok(exit)
}

async fn sync_one_table(
    config: SyncConfig,
    cancel: CancellationToken,
) -> CliResult<RoundSummary> {
    let location = TableLocation::parse(&config.table_base_path).context(LocationSnafu)?;
    let source_format = match config.source_format {
        Some(format) => format,
        None => infer_source_format(&location)
            .await
            .context(ConfigSnafu)?,
    };
    config
        .validate_against_source(source_format)
        .context(ConfigSnafu)?;
    info!(table = %config.table_name, source = %source_format, "starting sync round");

    let mut source = create_source_adapter(
        source_format,
        SourceTableHandle {
            name: config.table_name.clone(),
            location: location.clone(),
        },
    )
    .context(ConfigSnafu)?;

    let mut targets = Vec::with_capacity(config.target_table_formats.len());
    for format in &config.target_table_formats {
        targets.push(
            create_target_adapter(
                *format,
                TargetTableHandle {
                    name: config.table_name.clone(),
                    location: location.clone(),
                },
            )
            .context(ConfigSnafu)?,
        );
    }

    let orchestrator = SyncOrchestrator::new(&config);
    Ok(orchestrator
        .sync_round(source.as_mut(), &mut targets, &cancel)
        .await)
}

fn print_summary(table: &str, summary: &RoundSummary) {
    println!("table {table}");
    for result in &summary.results {
        match (&result.status, &result.error) {
            (SyncStatus::Ok, _) => println!("  {:<8} OK", result.format.to_string()),
            (SyncStatus::Skipped, Some(e)) => {
                println!("  {:<8} SKIPPED  {e}", result.format.to_string());
            }
            (SyncStatus::Skipped, None) => {
                println!("  {:<8} SKIPPED", result.format.to_string());
            }
            (SyncStatus::Failed, Some(e)) => {
                println!("  {:<8} FAILED   {e}", result.format.to_string());
            }
            (SyncStatus::Failed, None) => {
                println!("  {:<8} FAILED", result.format.to_string());
            }
        }
    }
}
