//! The synchronization orchestrator.
//!
//! One round syncs a single source table into a set of targets. Per target
//! the orchestrator decides between snapshot sync and incremental sync,
//! memoizes the source snapshot across targets, and isolates failures: a
//! target error stops that target only, while a source error is fatal for
//! every target that has not yet completed. The orchestrator never
//! propagates errors through its boundary; the round returns a structured
//! per-target result list.
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{
    ErrorKind, SourceReadSnafu, SyncError, SyncResult, TargetWriteSnafu,
};
use crate::model::{Snapshot, SyncAnchor, TableFormat};
use crate::source::SourceAdapter;
use crate::target::TargetAdapter;

/// How one target fared in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Ok,
    Skipped,
    Failed,
}

/// Per-target outcome of a round.
#[derive(Debug)]
pub struct TargetSyncResult {
    pub format: TableFormat,
    pub status: SyncStatus,
    pub error: Option<SyncError>,
}

/// Aggregated outcome of a round.
#[derive(Debug)]
pub struct RoundSummary {
    pub results: Vec<TargetSyncResult>,
    /// Whether a source-side error cut the round short.
    pub source_fatal: bool,
}

impl RoundSummary {
    pub fn all_ok(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.status == SyncStatus::Ok)
    }
}

/// Which sync mode a target gets this round.
enum SyncMode {
    Snapshot,
    Incremental(Vec<crate::model::VersionToken>),
}

enum RoundError {
    Source(SyncError),
    Target(SyncError),
    Cancelled,
}

/// Drives sync rounds according to one table's configuration.
pub struct SyncOrchestrator {
    incremental_max_commits: usize,
    incremental_sync_enabled: bool,
    read_timeout: Duration,
    write_timeout: Duration,
    round_timeout: Duration,
}

/// Default ceiling on a single metadata read.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Default ceiling on a single target commit.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(120);

impl SyncOrchestrator {
    pub fn new(config: &SyncConfig) -> Self {
        SyncOrchestrator {
            incremental_max_commits: config.incremental_max_commits as usize,
            incremental_sync_enabled: config.incremental_sync_enabled,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            round_timeout: Duration::from_millis(config.sync_timeout_ms),
        }
    }

    /// Run one sync round. Commits are applied to each target strictly in
    /// source-version order; no ordering holds across targets.
    pub async fn sync_round(
        &self,
        source: &mut dyn SourceAdapter,
        targets: &mut [Box<dyn TargetAdapter>],
        cancel: &CancellationToken,
    ) -> RoundSummary {
        let started = tokio::time::Instant::now();
        let mut results = Vec::with_capacity(targets.len());
        let mut snapshot_memo: Option<Snapshot> = None;
        let mut source_fatal = false;

        for target in targets.iter_mut() {
            let format = target.format();

            if source_fatal {
                results.push(TargetSyncResult {
                    format,
                    status: SyncStatus::Failed,
                    error: Some(
                        SourceReadSnafu {
                            detail: "source failed earlier in this round".to_string(),
                        }
                        .build(),
                    ),
                });
                continue;
            }
            if cancel.is_cancelled() {
                results.push(TargetSyncResult {
                    format,
                    status: SyncStatus::Skipped,
                    error: None,
                });
                continue;
            }
            if started.elapsed() > self.round_timeout {
                results.push(TargetSyncResult {
                    format,
                    status: SyncStatus::Failed,
                    error: Some(
                        TargetWriteSnafu {
                            detail: "sync round exceeded its time ceiling".to_string(),
                        }
                        .build(),
                    ),
                });
                continue;
            }

            let outcome = self
                .sync_target(source, target.as_mut(), &mut snapshot_memo, cancel)
                .await;
            match outcome {
                Ok(()) => {
                    info!(target = %format, "target in sync");
                    results.push(TargetSyncResult {
                        format,
                        status: SyncStatus::Ok,
                        error: None,
                    });
                }
                Err(RoundError::Cancelled) => {
                    results.push(TargetSyncResult {
                        format,
                        status: SyncStatus::Skipped,
                        error: None,
                    });
                }
                Err(RoundError::Target(error)) => {
                    if error.kind() == ErrorKind::CheckpointConflict {
                        // The target is ahead of us; leave it alone.
                        warn!(target = %format, %error, "skipping target");
                        results.push(TargetSyncResult {
                            format,
                            status: SyncStatus::Skipped,
                            error: Some(error),
                        });
                    } else {
                        warn!(target = %format, %error, "target failed");
                        results.push(TargetSyncResult {
                            format,
                            status: SyncStatus::Failed,
                            error: Some(error),
                        });
                    }
                }
                Err(RoundError::Source(error)) => {
                    warn!(target = %format, %error, "source failed; aborting round");
                    source_fatal = true;
                    results.push(TargetSyncResult {
                        format,
                        status: SyncStatus::Failed,
                        error: Some(error),
                    });
                }
            }
        }

        source.end_round();
        RoundSummary {
            results,
            source_fatal,
        }
    }

    async fn sync_target(
        &self,
        source: &mut dyn SourceAdapter,
        target: &mut dyn TargetAdapter,
        snapshot_memo: &mut Option<Snapshot>,
        cancel: &CancellationToken,
    ) -> Result<(), RoundError> {
        let checkpoint = self
            .target_call(target.read_last_checkpoint())
            .await
            .map_err(RoundError::Target)?;

        let mode = match &checkpoint {
            None => SyncMode::Snapshot,
            Some(_) if !target.supports_incremental() => SyncMode::Snapshot,
            Some(_) if !self.incremental_sync_enabled => SyncMode::Snapshot,
            Some(cp) => {
                let anchor: SyncAnchor = cp.anchor();
                let plan = self
                    .source_call(source.get_commit_state(&anchor))
                    .await
                    .map_err(RoundError::Source)?;
                if plan.must_do_full_sync {
                    debug!("source cannot serve incremental from the checkpoint");
                    SyncMode::Snapshot
                } else if plan.commits_to_process.len() > self.incremental_max_commits {
                    debug!(
                        pending = plan.commits_to_process.len(),
                        limit = self.incremental_max_commits,
                        "too many pending commits; falling back to snapshot"
                    );
                    SyncMode::Snapshot
                } else {
                    SyncMode::Incremental(plan.commits_to_process)
                }
            }
        };

        match mode {
            SyncMode::Snapshot => {
                let snapshot = match snapshot_memo {
                    Some(snapshot) => snapshot.clone(),
                    None => {
                        let snapshot = self
                            .source_call(source.get_current_snapshot())
                            .await
                            .map_err(RoundError::Source)?;
                        *snapshot_memo = Some(snapshot.clone());
                        snapshot
                    }
                };
                self.target_call(target.apply_snapshot(&snapshot))
                    .await
                    .map_err(RoundError::Target)?;
            }
            SyncMode::Incremental(versions) => {
                for version in versions {
                    if cancel.is_cancelled() {
                        return Err(RoundError::Cancelled);
                    }
                    let commit = self
                        .source_call(source.get_commit(&version))
                        .await
                        .map_err(RoundError::Source)?;
                    // A failed apply leaves the checkpoint at the last
                    // successful version; the next round resumes there.
                    self.target_call(target.apply_commit(&commit))
                        .await
                        .map_err(RoundError::Target)?;
                }
            }
        }
        Ok(())
    }

    async fn source_call<T>(
        &self,
        fut: impl std::future::Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        match timeout(self.read_timeout, fut).await {
            Ok(result) => result,
            Err(_) => SourceReadSnafu {
                detail: format!("source call exceeded {:?}", self.read_timeout),
            }
            .fail(),
        }
    }

    async fn target_call<T>(
        &self,
        fut: impl std::future::Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        match timeout(self.write_timeout, fut).await {
            Ok(result) => result,
            Err(_) => TargetWriteSnafu {
                detail: format!("target call exceeded {:?}", self.write_timeout),
            }
            .fail(),
        }
    }
}
