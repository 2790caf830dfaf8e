//! Workflow Driver
//!
//! Runs one complete workflow:
//! 1. validate configuration, load the catalog, partition it
//! 2. cluster every chunk (any chunk failure aborts the run)
//! 3. merge the partial tables into the global table
//! 4. resolve and prune groups
//! 5. drive every admissible group through its stage pipeline
//! 6. write `run_report.json`
//!
//! Re-running with the same configuration resumes: units with a valid
//! checkpoint are skipped.

use std::fmt::Write as _;
use std::fs;
use std::sync::Arc;

use serde::Serialize;
use strain_cascade_core::{
    merge_partials, partition_configured, resolve_groups, select_profile, Catalog, CeilingClass,
    Chunk, MergeStrategy, ProfileTier, ResolvedGroups,
};
use strain_cascade_runner::{JobRunner, ProcessJobRunner};

use crate::models::report::RunReport;
use crate::models::settings::WorkflowConfig;
use crate::services::capacity::CapacityPool;
use crate::services::chunk_clusterer::ChunkClusterer;
use crate::services::executor::UnitExecutor;
use crate::services::jobs::JobFactory;
use crate::services::scheduler::PipelineScheduler;
use crate::storage::checkpoint::{CheckpointStore, FsCheckpointStore};
use crate::storage::layout::RunLayout;
use crate::utils::error::AppResult;

/// One chunk as it would be clustered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedChunk {
    pub chunk_id: u32,
    pub unit: String,
    pub samples: usize,
    pub tier: ProfileTier,
    pub ceiling_class: CeilingClass,
    pub memory_mb: u64,
}

/// What a run would do, without running anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    pub catalog_size: usize,
    pub chunks: Vec<PlannedChunk>,
    /// Clustering units that can run at once under the largest class present
    pub max_concurrent_chunks: usize,
}

pub struct Workflow {
    config: Arc<WorkflowConfig>,
    layout: RunLayout,
    runner: Arc<dyn JobRunner>,
    store: Arc<dyn CheckpointStore>,
}

impl Workflow {
    /// Workflow backed by real processes and filesystem checkpoints.
    pub fn new(config: WorkflowConfig) -> Self {
        let layout = RunLayout::new(&config.run.output_dir);
        let store = Arc::new(FsCheckpointStore::new(layout.checkpoints_dir()));
        Self {
            config: Arc::new(config),
            layout,
            runner: Arc::new(ProcessJobRunner::new()),
            store,
        }
    }

    /// Replace the job runner.
    pub fn with_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    fn load_chunks(&self) -> AppResult<(Catalog, Vec<Chunk>)> {
        self.config.validate()?;
        let catalog = Catalog::load(&self.config.input.catalog, &self.config.input.extensions)?;
        let chunks = partition_configured(catalog.records(), self.config.run.max_chunk_size)?;
        Ok((catalog, chunks))
    }

    /// Partition and profile the catalog without executing anything.
    pub fn plan(&self) -> AppResult<RunPlan> {
        let (catalog, chunks) = self.load_chunks()?;
        let planned: Vec<PlannedChunk> = chunks
            .iter()
            .map(|chunk| {
                let profile = select_profile(chunk.len());
                PlannedChunk {
                    chunk_id: chunk.id,
                    unit: chunk.unit_key(),
                    samples: chunk.len(),
                    tier: profile.tier,
                    ceiling_class: profile.ceiling_class,
                    memory_mb: self
                        .config
                        .clustering_ceiling(profile.ceiling_class)
                        .memory_mb,
                }
            })
            .collect();

        let pool = self.capacity();
        let largest = planned.iter().map(|c| c.memory_mb).max().unwrap_or(1);
        Ok(RunPlan {
            catalog_size: catalog.len(),
            max_concurrent_chunks: pool.max_concurrent(largest).min(planned.len().max(1)),
            chunks: planned,
        })
    }

    fn capacity(&self) -> CapacityPool {
        CapacityPool::new(
            self.config.resources.max_workers,
            self.config.resources.total_memory_mb,
        )
    }

    /// Execute the workflow.
    ///
    /// # Errors
    ///
    /// Configuration problems, caught before any unit runs, and failures to
    /// write run-level files. A chunk-level failure is not an error here: it
    /// yields an aborted report.
    pub async fn run(&self) -> AppResult<RunReport> {
        let (catalog, chunks) = self.load_chunks()?;
        self.layout.prepare()?;
        tracing::info!(
            samples = catalog.len(),
            chunks = chunks.len(),
            output_dir = %self.layout.root().display(),
            "Workflow started"
        );

        let mut report = RunReport::begin(catalog.len(), chunks.len());
        let executor = Arc::new(UnitExecutor::new(
            self.runner.clone(),
            self.store.clone(),
            self.capacity(),
        ));
        let jobs = JobFactory::new(self.config.clone(), self.layout.clone());

        // Phase 1: clustering
        let clustering = ChunkClusterer::new(executor.clone(), jobs.clone())
            .cluster(&chunks)
            .await;
        report.chunks = clustering.reports;
        if let Some(failure) = clustering.failure {
            tracing::error!(error = %failure, "Run aborted during clustering");
            report.abort(failure.to_string());
            self.write_report(&report)?;
            return Ok(report);
        }

        // Phase 2: merge
        let global = match merge_partials(&clustering.partials, MergeStrategy::default()) {
            Ok(global) => global,
            Err(e) => {
                tracing::error!(error = %e, "Run aborted while merging cluster tables");
                report.abort(e.to_string());
                self.write_report(&report)?;
                return Ok(report);
            }
        };
        fs::write(self.layout.global_table(), global.to_tsv())?;
        report.global_table = Some(self.layout.global_table());
        tracing::info!(
            samples = global.len(),
            clusters = global.labels().len(),
            "Global cluster table written"
        );

        // Phase 3: resolve
        let resolved = resolve_groups(&global, &catalog);
        fs::write(self.layout.groups_table(), groups_tsv(&resolved))?;
        tracing::info!(
            admitted = resolved.groups.len(),
            pruned = resolved.pruned.len(),
            unresolved = resolved.unresolved.len(),
            conflicts = resolved.conflicts.len(),
            "Groups resolved"
        );
        report.unresolved = resolved.unresolved.clone();
        report.pruned = resolved.pruned.clone();
        report.conflicts = resolved.conflicts.clone();
        if resolved.groups.is_empty() {
            tracing::warn!("No group has enough members for the downstream stages");
        }

        // Phase 4: per-group pipelines
        let scheduler = PipelineScheduler::new(executor, jobs);
        report.groups = scheduler.run(resolved.groups).await;

        report.finish();
        self.write_report(&report)?;
        tracing::info!(
            status = %report.status,
            done = report.counts.done,
            done_with_warning = report.counts.done_with_warning,
            failed = report.counts.failed,
            "Workflow finished"
        );
        Ok(report)
    }

    fn write_report(&self, report: &RunReport) -> AppResult<()> {
        fs::write(
            self.layout.report_path(),
            serde_json::to_string_pretty(report)?,
        )?;
        Ok(())
    }
}

/// `label<TAB>members<TAB>admitted|pruned`, ordered by label.
fn groups_tsv(resolved: &ResolvedGroups) -> String {
    let mut rows: Vec<(&str, usize, &str)> = resolved
        .groups
        .iter()
        .map(|g| (g.label.as_str(), g.len(), "admitted"))
        .chain(
            resolved
                .pruned
                .iter()
                .map(|p| (p.label.as_str(), p.resolved_members, "pruned")),
        )
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = String::from("label\tmembers\tstatus\n");
    for (label, members, status) in rows {
        let _ = writeln!(out, "{}\t{}\t{}", label, members, status);
    }
    out
}
