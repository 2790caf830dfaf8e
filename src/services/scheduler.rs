//! Pipeline Scheduler
//!
//! Drives every admissible group through alignment, filtering, and tree
//! building. Groups run concurrently and independently; within a group the
//! stages are strictly sequential. A group's failure is recorded on that
//! group and never touches another.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::future::join_all;
use strain_cascade_core::{ClusterGroup, CoreError, CoreResult};
use strain_cascade_runner::{
    GroupState, JobArtifact, JobSpec, Stage, StageExecutor, StageOutcome, StagePipeline,
    StagePipelineResult, StageRecord,
};

use crate::models::report::PipelineRun;
use crate::services::executor::{UnitExecutor, UnitOutcome};
use crate::services::jobs::JobFactory;
use crate::storage::layout::assign_group_slugs;

/// The tree builder needs at least this many sequences.
pub const MIN_TREE_SEQUENCES: usize = 3;

type StateMap = Arc<RwLock<BTreeMap<String, GroupState>>>;

pub struct PipelineScheduler {
    executor: Arc<UnitExecutor>,
    jobs: JobFactory,
    states: StateMap,
}

impl PipelineScheduler {
    pub fn new(executor: Arc<UnitExecutor>, jobs: JobFactory) -> Self {
        Self {
            executor,
            jobs,
            states: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Current state of every scheduled group, keyed by label.
    pub fn snapshot(&self) -> BTreeMap<String, GroupState> {
        let states = self.states.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Group state map poisoned by a panicked writer; reading it anyway");
            poisoned.into_inner()
        });
        states.clone()
    }

    /// Run every group to a terminal state. Results follow the input order.
    pub async fn run(&self, groups: Vec<ClusterGroup>) -> Vec<PipelineRun> {
        let slugs = assign_group_slugs(groups.iter().map(|g| g.label.as_str()));
        tracing::info!(groups = groups.len(), "Scheduling group pipelines");

        let meta: Vec<(String, String, Vec<String>)> = groups
            .iter()
            .zip(&slugs)
            .map(|(g, slug)| {
                (
                    g.label.clone(),
                    slug.clone(),
                    g.members.iter().map(|m| m.sample_id.clone()).collect(),
                )
            })
            .collect();

        let handles: Vec<_> = groups
            .into_iter()
            .zip(slugs)
            .map(|(group, slug)| {
                let label = group.label.clone();
                let states = self.states.clone();
                let observer_label = label.clone();
                let pipeline = StagePipeline::new(label).with_observer(Box::new(move |state| {
                    store_state(&states, &observer_label, state)
                }));
                let stages = GroupStageExecutor {
                    executor: self.executor.clone(),
                    jobs: self.jobs.clone(),
                    group,
                    slug,
                };
                tokio::spawn(async move { pipeline.execute(&stages).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(meta)
            .map(|(joined, (label, slug, members))| {
                let result = joined.unwrap_or_else(|e| {
                    let stage = failed_stage(self.snapshot().get(&label).copied());
                    store_state(&self.states, &label, GroupState::Failed(stage));
                    aborted_result(stage, &CoreError::internal(format!("group task aborted: {}", e)))
                });
                log_terminal(&label, &result);
                PipelineRun::from_result(label, slug, members, result)
            })
            .collect()
    }
}

fn store_state(states: &RwLock<BTreeMap<String, GroupState>>, label: &str, state: GroupState) {
    let mut states = states.write().unwrap_or_else(|poisoned| {
        tracing::warn!(group = label, "Group state map poisoned by a panicked writer; recovering");
        poisoned.into_inner()
    });
    states.insert(label.to_string(), state);
}

fn log_terminal(label: &str, result: &StagePipelineResult) {
    match result.state {
        GroupState::Failed(stage) => {
            let message = result
                .failure()
                .and_then(|r| r.message.clone())
                .unwrap_or_default();
            tracing::warn!(group = label, stage = %stage, error = %message, "Group failed");
        }
        GroupState::DoneWithWarning => {
            tracing::warn!(group = label, "Group finished without a tree: insufficient data")
        }
        state => tracing::info!(group = label, state = %state, "Group finished"),
    }
}

/// Stage a crashed group task was in.
fn failed_stage(state: Option<GroupState>) -> Stage {
    match state {
        Some(GroupState::Filtering) => Stage::Filtering,
        Some(GroupState::TreeBuilding) => Stage::TreeBuilding,
        _ => Stage::Alignment,
    }
}

fn aborted_result(stage: Stage, error: &CoreError) -> StagePipelineResult {
    let stages = Stage::ALL
        .iter()
        .copied()
        .filter(|s| *s >= stage)
        .map(|s| {
            if s == stage {
                StageRecord::failed(s, error, 0)
            } else {
                StageRecord::skipped(s, "group task aborted")
            }
        })
        .collect();
    StagePipelineResult::new(GroupState::Failed(stage), stages)
}

// ============================================================================
// Group Stage Executor
// ============================================================================

/// Executes the three stages for one group through the shared unit executor.
struct GroupStageExecutor {
    executor: Arc<UnitExecutor>,
    jobs: JobFactory,
    group: ClusterGroup,
    slug: String,
}

#[async_trait]
impl StageExecutor for GroupStageExecutor {
    async fn execute_stage(
        &self,
        stage: Stage,
        previous: Option<&JobArtifact>,
    ) -> CoreResult<StageOutcome> {
        match stage {
            Stage::Alignment => {
                let spec = self.jobs.alignment_job(&self.group, &self.slug)?;
                self.link_inputs()?;
                self.produce(&spec).await
            }
            Stage::Filtering => {
                let alignment = require_previous(stage, previous)?;
                let spec = self.jobs.filtering_job(&self.slug, &alignment.path)?;
                self.produce(&spec).await
            }
            Stage::TreeBuilding => {
                let filtered = require_previous(stage, previous)?;
                self.build_tree(filtered).await
            }
        }
    }
}

impl GroupStageExecutor {
    async fn produce(&self, spec: &JobSpec) -> CoreResult<StageOutcome> {
        match self.executor.execute(spec, None).await? {
            UnitOutcome::Executed(artifact) | UnitOutcome::Restored(artifact) => {
                Ok(StageOutcome::Produced(artifact))
            }
            UnitOutcome::Cancelled => Err(CoreError::internal(format!(
                "{} cancelled without a cancellation source",
                spec.unit
            ))),
        }
    }

    async fn build_tree(&self, filtered: &JobArtifact) -> CoreResult<StageOutcome> {
        let spec = self.jobs.tree_job(&self.slug, &filtered.path)?;
        let marker = self.jobs.insufficient_marker(&self.slug);
        let sequences = count_sequences(&filtered.path, MIN_TREE_SEQUENCES)?;

        // Either the pre-check or the tree builder itself ended this unit
        // with insufficient data on an earlier run.
        if self.executor.insufficient_recorded(&spec) {
            tracing::info!(
                unit = %spec.unit,
                marker = %marker.display(),
                "Checkpoint valid; tree building previously ended with insufficient data"
            );
            return Ok(StageOutcome::InsufficientData { marker, sequences });
        }

        if sequences < MIN_TREE_SEQUENCES {
            write_marker(&marker, sequences)?;
            self.executor.record_insufficient(&spec, &marker);
            tracing::warn!(
                group = %self.group.label,
                sequences,
                "Too few sequences after filtering; skipping tree building"
            );
            return Ok(StageOutcome::InsufficientData { marker, sequences });
        }

        match self.produce(&spec).await {
            // The tree builder may itself decide there is too little signal
            // and leave only the marker behind.
            Err(CoreError::MissingArtifact { .. }) if marker.is_file() => {
                tracing::warn!(
                    group = %self.group.label,
                    "Tree builder left only the insufficient-data marker"
                );
                self.executor.record_insufficient(&spec, &marker);
                Ok(StageOutcome::InsufficientData { marker, sequences })
            }
            other => other,
        }
    }

    /// Link every member file into the group's input directory.
    fn link_inputs(&self) -> CoreResult<()> {
        let dir = self.jobs.layout().group_input_dir(&self.slug);
        std::fs::create_dir_all(&dir)?;
        for member in &self.group.members {
            let name = member
                .path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| member.sample_id.clone().into());
            let link = dir.join(name);
            if link.symlink_metadata().is_ok() {
                std::fs::remove_file(&link)?;
            }
            std::os::unix::fs::symlink(&member.path, &link)?;
        }
        Ok(())
    }
}

fn require_previous(stage: Stage, previous: Option<&JobArtifact>) -> CoreResult<&JobArtifact> {
    previous.ok_or_else(|| {
        CoreError::internal(format!("{} started without the previous stage's artifact", stage))
    })
}

/// Count FASTA records (`>` header lines), stopping once `limit` is reached.
fn count_sequences(path: &Path, limit: usize) -> CoreResult<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if line?.starts_with('>') {
            count += 1;
            if count >= limit {
                break;
            }
        }
    }
    Ok(count)
}

fn write_marker(marker: &Path, sequences: usize) -> CoreResult<()> {
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        marker,
        format!(
            "{} sequence(s) after filtering; at least {} required\n",
            sequences, MIN_TREE_SEQUENCES
        ),
    )?;
    Ok(())
}
