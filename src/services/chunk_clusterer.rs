//! Chunk Clusterer
//!
//! Runs the clustering engine once per chunk, concurrently within the
//! capacity pool, and collects the partial cluster tables. The first chunk
//! failure cancels every chunk still waiting for capacity; chunks already
//! running are left to finish so their checkpoints survive for a re-run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use strain_cascade_core::{
    select_profile, Chunk, CoreError, CoreResult, PartialClusterTable, ResourceProfile,
};
use tokio_util::sync::CancellationToken;

use crate::models::report::{ChunkReport, ChunkStatus};
use crate::services::executor::{UnitExecutor, UnitOutcome};
use crate::services::jobs::JobFactory;

/// Everything the clustering phase produced.
#[derive(Debug, Default)]
pub struct ChunkClusteringResult {
    /// Partial tables of the chunks that completed, ordered by chunk id
    pub partials: Vec<PartialClusterTable>,
    /// One report per chunk, ordered by chunk id
    pub reports: Vec<ChunkReport>,
    /// Lowest-id chunk failure, if any chunk failed
    pub failure: Option<CoreError>,
}

impl ChunkClusteringResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

struct ChunkAttempt {
    report: ChunkReport,
    partial: Option<PartialClusterTable>,
    error: Option<CoreError>,
}

pub struct ChunkClusterer {
    executor: Arc<UnitExecutor>,
    jobs: JobFactory,
}

impl ChunkClusterer {
    pub fn new(executor: Arc<UnitExecutor>, jobs: JobFactory) -> Self {
        Self { executor, jobs }
    }

    /// Cluster every chunk.
    pub async fn cluster(&self, chunks: &[Chunk]) -> ChunkClusteringResult {
        let cancel = CancellationToken::new();
        tracing::info!(chunks = chunks.len(), "Starting chunk clustering");

        let handles: Vec<_> = chunks
            .iter()
            .cloned()
            .map(|chunk| {
                let executor = self.executor.clone();
                let jobs = self.jobs.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { cluster_chunk(&executor, &jobs, chunk, &cancel).await })
            })
            .collect();

        let mut attempts: Vec<ChunkAttempt> = join_all(handles)
            .await
            .into_iter()
            .zip(chunks)
            .map(|(joined, chunk)| match joined {
                Ok(attempt) => attempt,
                Err(e) => {
                    cancel.cancel();
                    let error = CoreError::internal(format!(
                        "clustering task for chunk {} aborted: {}",
                        chunk.id, e
                    ));
                    let profile = select_profile(chunk.len());
                    let mut report = base_report(chunk, &profile, 0);
                    mark_failed(&mut report, &error);
                    ChunkAttempt {
                        report,
                        partial: None,
                        error: Some(error),
                    }
                }
            })
            .collect();
        attempts.sort_by_key(|a| a.report.chunk_id);

        let mut result = ChunkClusteringResult::default();
        for attempt in attempts {
            if let Some(partial) = attempt.partial {
                result.partials.push(partial);
            }
            if result.failure.is_none() {
                result.failure = attempt.error;
            }
            result.reports.push(attempt.report);
        }

        match &result.failure {
            Some(e) => tracing::error!(error = %e, "Chunk clustering failed"),
            None => tracing::info!(tables = result.partials.len(), "Chunk clustering complete"),
        }
        result
    }
}

async fn cluster_chunk(
    executor: &UnitExecutor,
    jobs: &JobFactory,
    chunk: Chunk,
    cancel: &CancellationToken,
) -> ChunkAttempt {
    let started = Instant::now();
    let profile = select_profile(chunk.len());
    let memory_mb = jobs
        .config()
        .clustering_ceiling(profile.ceiling_class)
        .memory_mb;
    let mut report = base_report(&chunk, &profile, memory_mb);

    match run_chunk(executor, jobs, &chunk, &profile, cancel).await {
        Ok(Some((status, partial, table))) => {
            report.status = status;
            report.clusters = partial.cluster_count();
            report.table = Some(table);
            report.duration_ms = started.elapsed().as_millis() as u64;
            ChunkAttempt {
                report,
                partial: Some(partial),
                error: None,
            }
        }
        Ok(None) => {
            report.status = ChunkStatus::Cancelled;
            report.message = Some("cancelled after another chunk failed".to_string());
            ChunkAttempt {
                report,
                partial: None,
                error: None,
            }
        }
        Err(e) => {
            cancel.cancel();
            tracing::error!(chunk = chunk.id, error = %e, "Chunk failed; cancelling pending chunks");
            report.duration_ms = started.elapsed().as_millis() as u64;
            mark_failed(&mut report, &e);
            ChunkAttempt {
                report,
                partial: None,
                error: Some(e),
            }
        }
    }
}

async fn run_chunk(
    executor: &UnitExecutor,
    jobs: &JobFactory,
    chunk: &Chunk,
    profile: &ResourceProfile,
    cancel: &CancellationToken,
) -> CoreResult<Option<(ChunkStatus, PartialClusterTable, PathBuf)>> {
    let spec = jobs.clustering_job(chunk, profile)?;
    write_manifest(&jobs.layout().chunk_manifest(chunk.id), chunk).await?;

    tracing::info!(
        chunk = chunk.id,
        samples = chunk.len(),
        tier = %profile.tier,
        ceiling_class = %profile.ceiling_class,
        memory_mb = spec.ceiling.memory_mb,
        "Clustering chunk"
    );

    let (status, artifact) = match executor.execute(&spec, Some(cancel)).await? {
        UnitOutcome::Executed(artifact) => (ChunkStatus::Succeeded, artifact),
        UnitOutcome::Restored(artifact) => (ChunkStatus::Restored, artifact),
        UnitOutcome::Cancelled => return Ok(None),
    };

    let partial = PartialClusterTable::from_file(chunk.id, &artifact.path)?;
    if partial.len() < chunk.len() {
        tracing::warn!(
            chunk = chunk.id,
            assigned = partial.len(),
            samples = chunk.len(),
            "Clustering engine left some samples unassigned"
        );
    }
    Ok(Some((status, partial, artifact.path)))
}

/// `sample<TAB>path` per member, no header.
async fn write_manifest(path: &Path, chunk: &Chunk) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content: String = chunk
        .records
        .iter()
        .map(|r| format!("{}\t{}\n", r.sample_id, r.path.display()))
        .collect();
    tokio::fs::write(path, content).await?;
    Ok(())
}

fn base_report(chunk: &Chunk, profile: &ResourceProfile, memory_mb: u64) -> ChunkReport {
    ChunkReport {
        chunk_id: chunk.id,
        unit: chunk.unit_key(),
        samples: chunk.len(),
        tier: profile.tier,
        ceiling_class: profile.ceiling_class,
        memory_mb,
        status: ChunkStatus::Failed,
        table: None,
        clusters: 0,
        duration_ms: 0,
        failure_tag: None,
        message: None,
    }
}

fn mark_failed(report: &mut ChunkReport, error: &CoreError) {
    report.status = ChunkStatus::Failed;
    report.failure_tag = Some(error.failure_tag().to_string());
    report.message = Some(error.to_string());
}
