//! Run Report Models
//!
//! Per-chunk and per-group outcomes of one workflow run, persisted as
//! `run_report.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strain_cascade_core::{
    CeilingClass, ConflictingSample, ProfileTier, PrunedGroup, UnresolvedSample,
};
use strain_cascade_runner::{GroupState, StagePipelineResult, StageRecord};

/// Status of one clustering chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Succeeded,
    /// Skipped execution through a valid checkpoint
    Restored,
    Failed,
    /// Never started because another chunk failed first
    Cancelled,
}

/// Outcome of one clustering chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    pub chunk_id: u32,
    pub unit: String,
    pub samples: usize,
    pub tier: ProfileTier,
    pub ceiling_class: CeilingClass,
    pub memory_mb: u64,
    pub status: ChunkStatus,
    /// Partial cluster table, when the chunk succeeded
    pub table: Option<PathBuf>,
    pub clusters: usize,
    pub duration_ms: u64,
    pub failure_tag: Option<String>,
    pub message: Option<String>,
}

/// One admissible group's run through the three-stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub label: String,
    /// Directory name of the group's output area
    pub slug: String,
    pub members: Vec<String>,
    pub state: GroupState,
    pub stages: Vec<StageRecord>,
    pub total_duration_ms: u64,
}

impl PipelineRun {
    pub fn from_result(
        label: String,
        slug: String,
        members: Vec<String>,
        result: StagePipelineResult,
    ) -> Self {
        Self {
            label,
            slug,
            members,
            state: result.state,
            stages: result.stages,
            total_duration_ms: result.total_duration_ms,
        }
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No group failed (warnings allowed)
    Succeeded,
    /// Some groups failed, others completed
    Partial,
    /// Run aborted, or every group failed
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Group tallies by terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCounts {
    pub done: usize,
    pub done_with_warning: usize,
    pub failed: usize,
}

/// Persisted summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub catalog_size: usize,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkReport>,
    pub global_table: Option<PathBuf>,
    pub unresolved: Vec<UnresolvedSample>,
    pub pruned: Vec<PrunedGroup>,
    pub conflicts: Vec<ConflictingSample>,
    pub groups: Vec<PipelineRun>,
    pub counts: GroupCounts,
    /// Set when the run stopped before the group phase
    pub abort_reason: Option<String>,
}

impl RunReport {
    /// Start an empty report.
    pub fn begin(catalog_size: usize, chunk_count: usize) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            status: RunStatus::Succeeded,
            catalog_size,
            chunk_count,
            chunks: Vec::new(),
            global_table: None,
            unresolved: Vec::new(),
            pruned: Vec::new(),
            conflicts: Vec::new(),
            groups: Vec::new(),
            counts: GroupCounts::default(),
            abort_reason: None,
        }
    }

    /// Mark the run aborted.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
        self.finish();
    }

    /// Stamp the end time and derive counts and status.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        let mut counts = GroupCounts::default();
        for group in &self.groups {
            match group.state {
                GroupState::Done => counts.done += 1,
                GroupState::DoneWithWarning => counts.done_with_warning += 1,
                GroupState::Failed(_) => counts.failed += 1,
                _ => {}
            }
        }
        self.counts = counts;
        self.status = if self.abort_reason.is_some() {
            RunStatus::Failed
        } else if counts.failed == 0 {
            RunStatus::Succeeded
        } else if counts.failed == self.groups.len() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };
    }

    /// Process exit code: 0 no group failed, 1 a group failed, 2 aborted.
    pub fn exit_code(&self) -> i32 {
        if self.abort_reason.is_some() {
            2
        } else if self.counts.failed > 0 {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strain_cascade_runner::Stage;

    fn run(label: &str, state: GroupState) -> PipelineRun {
        PipelineRun {
            label: label.to_string(),
            slug: label.to_string(),
            members: vec!["a".into(), "b".into(), "c".into()],
            state,
            stages: Vec::new(),
            total_duration_ms: 0,
        }
    }

    #[test]
    fn test_partial_success_is_distinguishable() {
        let mut report = RunReport::begin(9, 1);
        report.groups = vec![
            run("1", GroupState::Done),
            run("2", GroupState::Failed(Stage::Filtering)),
            run("3", GroupState::DoneWithWarning),
        ];
        report.finish();
        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            report.counts,
            GroupCounts {
                done: 1,
                done_with_warning: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_all_failed_is_failed() {
        let mut report = RunReport::begin(6, 1);
        report.groups = vec![
            run("1", GroupState::Failed(Stage::Alignment)),
            run("2", GroupState::Failed(Stage::TreeBuilding)),
        ];
        report.finish();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_warnings_do_not_fail_the_run() {
        let mut report = RunReport::begin(3, 1);
        report.groups = vec![run("1", GroupState::DoneWithWarning)];
        report.finish();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_abort() {
        let mut report = RunReport::begin(620, 5);
        report.abort("Timeout: chunk-0003 exceeded 60s");
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 2);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let mut report = RunReport::begin(3, 1);
        report.groups = vec![run("1", GroupState::Done)];
        report.finish();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["catalogSize"], 3);
        assert_eq!(value["groups"][0]["state"]["state"], "done");
    }
}
