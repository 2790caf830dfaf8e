//! Three-Stage Group Pipeline
//!
//! Drives one cluster group through its fixed, strictly sequential stages:
//! 1. ALIGNMENT - core alignment of the group's members
//! 2. FILTERING - recombination filtering of the alignment
//! 3. TREE_BUILDING - phylogeny from the filtered sites
//!
//! Each stage consumes the previous stage's artifact. The pipeline
//! short-circuits on the first failure; later stages are recorded as skipped
//! and never invoked.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strain_cascade_core::{CoreError, CoreResult};

use crate::models::JobArtifact;

// ============================================================================
// Enums
// ============================================================================

/// Downstream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Alignment,
    Filtering,
    TreeBuilding,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Alignment, Stage::Filtering, Stage::TreeBuilding];

    /// 1-based position in the pipeline.
    pub fn number(self) -> u8 {
        match self {
            Stage::Alignment => 1,
            Stage::Filtering => 2,
            Stage::TreeBuilding => 3,
        }
    }

    /// Name of the stage's output directory within a group's area.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Alignment => "01_alignment",
            Stage::Filtering => "02_filtering",
            Stage::TreeBuilding => "03_tree",
        }
    }

    /// State a group is in while this stage runs.
    pub fn running_state(self) -> GroupState {
        match self {
            Stage::Alignment => GroupState::Aligning,
            Stage::Filtering => GroupState::Filtering,
            Stage::TreeBuilding => GroupState::TreeBuilding,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Alignment => write!(f, "alignment"),
            Stage::Filtering => write!(f, "filtering"),
            Stage::TreeBuilding => write!(f, "tree_building"),
        }
    }
}

/// Per-group state machine:
/// `PENDING -> ALIGNING -> FILTERING -> TREE_BUILDING -> {DONE | DONE_WITH_WARNING | FAILED(stage)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum GroupState {
    Pending,
    Aligning,
    Filtering,
    TreeBuilding,
    Done,
    /// Tree building saw too few sequences and wrote the insufficient-data marker
    DoneWithWarning,
    Failed(Stage),
}

impl GroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupState::Done | GroupState::DoneWithWarning | GroupState::Failed(_)
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GroupState::Failed(_))
    }
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupState::Pending => write!(f, "pending"),
            GroupState::Aligning => write!(f, "aligning"),
            GroupState::Filtering => write!(f, "filtering"),
            GroupState::TreeBuilding => write!(f, "tree_building"),
            GroupState::Done => write!(f, "done"),
            GroupState::DoneWithWarning => write!(f, "done_with_warning"),
            GroupState::Failed(stage) => write!(f, "failed_at_{}", stage),
        }
    }
}

/// Status of one stage within a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Completed with the insufficient-data outcome
    Warned,
    Failed,
    Skipped,
}

// ============================================================================
// Stage Results
// ============================================================================

/// Successful outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Produced(JobArtifact),
    /// Fewer sequences than the tree builder needs; `marker` records it
    InsufficientData { marker: PathBuf, sequences: usize },
}

/// Record of one stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// Artifact, or the insufficient-data marker
    pub artifact: Option<PathBuf>,
    pub duration_ms: u64,
    pub failure_tag: Option<String>,
    pub message: Option<String>,
}

impl StageRecord {
    /// Create a succeeded record.
    pub fn succeeded(stage: Stage, artifact: &JobArtifact) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            artifact: Some(artifact.path.clone()),
            duration_ms: artifact.duration_ms,
            failure_tag: None,
            message: None,
        }
    }

    /// Create a warned (insufficient data) record.
    pub fn warned(stage: Stage, marker: PathBuf, sequences: usize, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Warned,
            artifact: Some(marker),
            duration_ms,
            failure_tag: Some("insufficient-data".to_string()),
            message: Some(format!(
                "{} sequence(s) after filtering; tree not built",
                sequences
            )),
        }
    }

    /// Create a failed record.
    pub fn failed(stage: Stage, error: &CoreError, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            artifact: None,
            duration_ms,
            failure_tag: Some(error.failure_tag().to_string()),
            message: Some(error.to_string()),
        }
    }

    /// Create a skipped record.
    pub fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            artifact: None,
            duration_ms: 0,
            failure_tag: None,
            message: Some(reason.to_string()),
        }
    }
}

/// Result of driving one group through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePipelineResult {
    /// Terminal state
    pub state: GroupState,
    /// One record per stage, in order
    pub stages: Vec<StageRecord>,
    pub total_duration_ms: u64,
}

impl StagePipelineResult {
    pub fn new(state: GroupState, stages: Vec<StageRecord>) -> Self {
        let total_duration_ms = stages.iter().map(|s| s.duration_ms).sum();
        Self {
            state,
            stages,
            total_duration_ms,
        }
    }

    /// Artifact of a stage, if it produced one.
    pub fn artifact(&self, stage: Stage) -> Option<&PathBuf> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .and_then(|r| r.artifact.as_ref())
    }

    pub fn failure(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.status == StageStatus::Failed)
    }
}

// ============================================================================
// Stage Executor Trait
// ============================================================================

/// Executes individual stages for one group.
///
/// `previous` is the artifact of the preceding stage, `None` for alignment.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute_stage(
        &self,
        stage: Stage,
        previous: Option<&JobArtifact>,
    ) -> CoreResult<StageOutcome>;
}

// ============================================================================
// Stage Pipeline
// ============================================================================

/// Observer for state transitions.
pub type TransitionObserver = Box<dyn Fn(GroupState) + Send + Sync>;

/// Sequential three-stage pipeline for one group.
pub struct StagePipeline {
    /// Group label, for logs
    label: String,
    observer: Option<TransitionObserver>,
}

impl StagePipeline {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            observer: None,
        }
    }

    /// Set a transition observer via builder pattern.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn transition(&self, state: GroupState) {
        tracing::debug!(group = %self.label, state = %state, "Group state transition");
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    /// Run all stages until one fails or tree building finishes.
    pub async fn execute(&self, executor: &dyn StageExecutor) -> StagePipelineResult {
        let mut records = Vec::with_capacity(Stage::ALL.len());
        let mut previous: Option<JobArtifact> = None;
        let mut state = GroupState::Pending;
        self.transition(state);

        for (index, stage) in Stage::ALL.iter().copied().enumerate() {
            state = stage.running_state();
            self.transition(state);

            let started = Instant::now();
            let outcome = executor.execute_stage(stage, previous.as_ref()).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(StageOutcome::Produced(artifact)) => {
                    records.push(StageRecord::succeeded(stage, &artifact));
                    previous = Some(artifact);
                }
                Ok(StageOutcome::InsufficientData { marker, sequences }) => {
                    tracing::warn!(
                        group = %self.label,
                        stage = %stage,
                        sequences,
                        "Insufficient data; finishing group with warning"
                    );
                    records.push(StageRecord::warned(stage, marker, sequences, elapsed_ms));
                    for rest in &Stage::ALL[index + 1..] {
                        records.push(StageRecord::skipped(*rest, "insufficient data upstream"));
                    }
                    state = GroupState::DoneWithWarning;
                    break;
                }
                Err(error) => {
                    tracing::warn!(
                        group = %self.label,
                        stage = %stage,
                        failure = error.failure_tag(),
                        error = %error,
                        "Stage failed; group stops here"
                    );
                    records.push(StageRecord::failed(stage, &error, elapsed_ms));
                    for rest in &Stage::ALL[index + 1..] {
                        records.push(StageRecord::skipped(
                            *rest,
                            &format!("{} did not succeed", stage),
                        ));
                    }
                    state = GroupState::Failed(stage);
                    break;
                }
            }
        }

        if !state.is_terminal() {
            state = GroupState::Done;
        }
        self.transition(state);
        StagePipelineResult::new(state, records)
    }
}
