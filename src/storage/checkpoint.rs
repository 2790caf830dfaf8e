//! Checkpoint Store
//!
//! One JSON receipt per successfully completed unit. A re-run skips a unit
//! whose receipt fingerprint still matches its job and whose artifact is
//! still usable; everything else re-executes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strain_cascade_runner::{is_usable_artifact, JobArtifact, JobSpec};

use crate::utils::error::AppResult;
use crate::utils::paths::{ensure_dir, sanitize_label};

// ============================================================================
// Receipt
// ============================================================================

/// How a checkpointed unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Succeeded,
    /// Tree building skipped for too few sequences; the artifact is the marker
    InsufficientData,
}

/// Persisted proof that a unit completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointReceipt {
    pub unit: String,
    pub fingerprint: String,
    pub outcome: ReceiptOutcome,
    pub artifact: PathBuf,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointReceipt {
    /// Receipt for a successful invocation of `spec`.
    pub fn succeeded(spec: &JobSpec, artifact: &JobArtifact) -> Self {
        Self {
            unit: spec.unit.clone(),
            fingerprint: fingerprint(spec),
            outcome: ReceiptOutcome::Succeeded,
            artifact: artifact.path.clone(),
            duration_ms: artifact.duration_ms,
            recorded_at: Utc::now(),
        }
    }

    /// Receipt for a tree-building unit that ended with insufficient data.
    pub fn insufficient(spec: &JobSpec, marker: &Path) -> Self {
        Self {
            unit: spec.unit.clone(),
            fingerprint: fingerprint(spec),
            outcome: ReceiptOutcome::InsufficientData,
            artifact: marker.to_path_buf(),
            duration_ms: 0,
            recorded_at: Utc::now(),
        }
    }

    /// Whether this receipt still vouches for `spec`.
    pub fn is_valid_for(&self, spec: &JobSpec) -> bool {
        self.unit == spec.unit
            && self.fingerprint == fingerprint(spec)
            && is_usable_artifact(&self.artifact)
    }

    /// Artifact handle restored from the receipt.
    pub fn to_artifact(&self) -> JobArtifact {
        JobArtifact::new(&self.unit, &self.artifact, 0)
    }
}

/// SHA-256 over the program, the rendered arguments, and each input file's
/// path, size, and modification time. Resource ceilings and timeouts are not
/// part of it, so raising a limit after a failure keeps completed units valid.
pub fn fingerprint(spec: &JobSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec.program.as_bytes());
    hasher.update([0u8]);
    for arg in &spec.args {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    for input in &spec.inputs {
        hasher.update(input.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        match fs::metadata(input) {
            Ok(meta) => {
                hasher.update(meta.len().to_le_bytes());
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                hasher.update(modified.to_le_bytes());
            }
            Err(_) => hasher.update(b"absent"),
        }
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// Store
// ============================================================================

/// Trait for checkpoint persistence.
pub trait CheckpointStore: Send + Sync {
    /// Receipt recorded for `unit`, if any.
    fn lookup(&self, unit: &str) -> AppResult<Option<CheckpointReceipt>>;
    /// Record a receipt, replacing any previous one for the same unit.
    fn record(&self, receipt: &CheckpointReceipt) -> AppResult<()>;

    /// Receipt for `spec` if it is still valid.
    fn valid_receipt(&self, spec: &JobSpec) -> Option<CheckpointReceipt> {
        match self.lookup(&spec.unit) {
            Ok(Some(receipt)) if receipt.is_valid_for(spec) => Some(receipt),
            Ok(Some(_)) => {
                tracing::info!(unit = %spec.unit, "Checkpoint is stale; unit will re-execute");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(unit = %spec.unit, error = %e, "Unreadable checkpoint; unit will re-execute");
                None
            }
        }
    }
}

/// Filesystem store: `<dir>/<unit>.json`.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn receipt_path(&self, unit: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_label(unit)))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn lookup(&self, unit: &str) -> AppResult<Option<CheckpointReceipt>> {
        let path = self.receipt_path(unit);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn record(&self, receipt: &CheckpointReceipt) -> AppResult<()> {
        ensure_dir(&self.dir)?;
        let path = self.receipt_path(&receipt.unit);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(receipt)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strain_cascade_runner::ResourceCeiling;
    use tempfile::TempDir;

    fn spec(dir: &Path, input: &Path) -> JobSpec {
        JobSpec::new("chunk-0001", "poppunk", dir)
            .with_args(vec!["--r-files".into(), "manifest.tsv".into()])
            .with_inputs(vec![input.to_path_buf()])
            .with_artifact("out.csv")
    }

    #[test]
    fn test_fingerprint_ignores_ceiling() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("s1.fa");
        fs::write(&input, ">s1\nACGT\n").unwrap();

        let a = spec(dir.path(), &input);
        let b = a.clone().with_ceiling(ResourceCeiling::new(99, 99_999));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_args_and_input_size() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("s1.fa");
        fs::write(&input, ">s1\nACGT\n").unwrap();

        let a = spec(dir.path(), &input);
        let before = fingerprint(&a);
        let changed = a.clone().with_args(vec!["--other".into()]);
        assert_ne!(before, fingerprint(&changed));

        fs::write(&input, ">s1\nACGTACGT\n").unwrap();
        assert_ne!(before, fingerprint(&a));
    }

    #[test]
    fn test_fingerprint_tracks_same_length_rewrite() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("s1.aln");
        fs::write(&input, ">s1\nACGT\n").unwrap();
        let job = spec(dir.path(), &input);
        let before = fingerprint(&job);

        fs::write(&input, ">s1\nTTTT\n").unwrap();
        fs::File::options()
            .write(true)
            .open(&input)
            .unwrap()
            .set_modified(UNIX_EPOCH + std::time::Duration::from_secs(1_000_000))
            .unwrap();
        assert_ne!(before, fingerprint(&job));
        // Stable while the file is untouched
        assert_eq!(fingerprint(&job), fingerprint(&job));
    }

    #[test]
    fn test_store_round_trip_and_validity() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("s1.fa");
        fs::write(&input, ">s1\nACGT\n").unwrap();
        let artifact_path = dir.path().join("out.csv");
        fs::write(&artifact_path, "Taxon,Cluster\ns1,1\n").unwrap();

        let store = FsCheckpointStore::new(dir.path().join("checkpoints"));
        let job = spec(dir.path(), &input);
        assert!(store.valid_receipt(&job).is_none());

        let artifact = JobArtifact::new("chunk-0001", &artifact_path, 1200);
        store
            .record(&CheckpointReceipt::succeeded(&job, &artifact))
            .unwrap();
        let receipt = store.valid_receipt(&job).unwrap();
        assert_eq!(receipt.outcome, ReceiptOutcome::Succeeded);
        assert_eq!(receipt.to_artifact().path, artifact_path);

        // Artifact removed: receipt no longer honoured
        fs::remove_file(&artifact_path).unwrap();
        assert!(store.valid_receipt(&job).is_none());
    }

    #[test]
    fn test_corrupt_receipt_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        fs::write(dir.path().join("chunk-0001.json"), "{not json").unwrap();

        let job = JobSpec::new("chunk-0001", "x", dir.path());
        assert!(store.lookup("chunk-0001").is_err());
        assert!(store.valid_receipt(&job).is_none());
    }
}
