//! Result Merger
//!
//! Combines per-chunk cluster tables into one global table.
//!
//! Each chunk's clustering run labels its clusters independently, so label
//! `1` from chunk 1 and label `1` from chunk 2 are unrelated. Labels are
//! therefore namespaced by chunk id (`<chunk>_<label>`) whenever more than one
//! table is merged. Clusters that are biologically the same but were found in
//! different chunks stay separate groups; no cross-chunk reconciliation is
//! attempted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clusters::{GlobalClusterTable, PartialClusterTable};
use crate::error::{CoreError, CoreResult};

/// How chunk-local labels become global labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Prefix every label with its chunk id. A lone table keeps raw labels.
    NamespaceByChunk,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::NamespaceByChunk
    }
}

/// Namespaced global label for a chunk-local label.
pub fn namespaced_label(chunk_id: u32, local_label: &str) -> String {
    format!("{}_{}", chunk_id, local_label)
}

/// Merge partial tables into a global table.
///
/// # Errors
///
/// `Validation` if the same sample appears in more than one partial table,
/// which means the partition it came from was not disjoint.
pub fn merge_partials(
    partials: &[PartialClusterTable],
    strategy: MergeStrategy,
) -> CoreResult<GlobalClusterTable> {
    let namespace = match strategy {
        MergeStrategy::NamespaceByChunk => partials.len() > 1,
    };

    let mut owner: BTreeMap<&str, u32> = BTreeMap::new();
    let mut assignments = BTreeMap::new();

    for partial in partials {
        for (sample, label) in &partial.assignments {
            if let Some(previous) = owner.insert(sample.as_str(), partial.chunk_id) {
                return Err(CoreError::validation(format!(
                    "Sample '{}' assigned by both chunk {} and chunk {}",
                    sample, previous, partial.chunk_id
                )));
            }
            let global = if namespace {
                namespaced_label(partial.chunk_id, label)
            } else {
                label.clone()
            };
            assignments.insert(sample.clone(), global);
        }
    }

    tracing::info!(
        tables = partials.len(),
        samples = assignments.len(),
        namespaced = namespace,
        "Merged partial cluster tables"
    );
    Ok(GlobalClusterTable { assignments })
}
