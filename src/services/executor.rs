//! Unit Executor
//!
//! Runs one unit the way every unit runs: check the checkpoint, wait for
//! capacity, invoke the bounded job runner, record the receipt.

use std::path::Path;
use std::sync::Arc;

use strain_cascade_core::CoreResult;
use strain_cascade_runner::{JobArtifact, JobRunner, JobSpec};
use tokio_util::sync::CancellationToken;

use crate::services::capacity::CapacityPool;
use crate::storage::checkpoint::{CheckpointReceipt, CheckpointStore, ReceiptOutcome};

/// How a unit request ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The tool ran and produced the artifact
    Executed(JobArtifact),
    /// A valid checkpoint made execution unnecessary
    Restored(JobArtifact),
    /// Cancelled while waiting for capacity; the tool never started
    Cancelled,
}

impl UnitOutcome {
    pub fn artifact(&self) -> Option<&JobArtifact> {
        match self {
            UnitOutcome::Executed(a) | UnitOutcome::Restored(a) => Some(a),
            UnitOutcome::Cancelled => None,
        }
    }
}

pub struct UnitExecutor {
    runner: Arc<dyn JobRunner>,
    store: Arc<dyn CheckpointStore>,
    capacity: CapacityPool,
}

impl UnitExecutor {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        store: Arc<dyn CheckpointStore>,
        capacity: CapacityPool,
    ) -> Self {
        Self {
            runner,
            store,
            capacity,
        }
    }

    pub fn capacity(&self) -> &CapacityPool {
        &self.capacity
    }

    /// Execute `spec` unless a valid checkpoint exists or `cancel` fires
    /// before capacity is available. Once started, the invocation runs to
    /// completion or to its own timeout.
    pub async fn execute(
        &self,
        spec: &JobSpec,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<UnitOutcome> {
        if let Some(receipt) = self.store.valid_receipt(spec) {
            if receipt.outcome == ReceiptOutcome::Succeeded {
                tracing::info!(
                    unit = %spec.unit,
                    artifact = %receipt.artifact.display(),
                    "Checkpoint valid; skipping unit"
                );
                return Ok(UnitOutcome::Restored(receipt.to_artifact()));
            }
        }

        let lease = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::info!(unit = %spec.unit, "Cancelled before start");
                        return Ok(UnitOutcome::Cancelled);
                    }
                    lease = self.capacity.acquire(spec.ceiling.memory_mb) => lease?,
                }
            }
            None => self.capacity.acquire(spec.ceiling.memory_mb).await?,
        };

        let artifact = self.runner.run(spec).await?;
        drop(lease);

        if let Err(e) = self
            .store
            .record(&CheckpointReceipt::succeeded(spec, &artifact))
        {
            tracing::warn!(unit = %spec.unit, error = %e, "Failed to record checkpoint");
        }
        Ok(UnitOutcome::Executed(artifact))
    }

    /// Whether an insufficient-data receipt for `spec` is recorded and valid.
    pub fn insufficient_recorded(&self, spec: &JobSpec) -> bool {
        matches!(
            self.store.valid_receipt(spec),
            Some(receipt) if receipt.outcome == ReceiptOutcome::InsufficientData
        )
    }

    /// Record that `spec` ended with insufficient data.
    pub fn record_insufficient(&self, spec: &JobSpec, marker: &Path) {
        if let Err(e) = self
            .store
            .record(&CheckpointReceipt::insufficient(spec, marker))
        {
            tracing::warn!(unit = %spec.unit, error = %e, "Failed to record checkpoint");
        }
    }
}
