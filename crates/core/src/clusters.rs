//! Cluster Tables
//!
//! Per-chunk and merged sample-to-cluster assignments, and the parser for the
//! clustering engine's output table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::InputRecord;
use crate::error::{CoreError, CoreResult};

/// Accepted (lowercase) headers for the sample column.
pub const SAMPLE_COLUMN_SYNONYMS: &[&str] = &[
    "taxon",
    "sample",
    "sample_id",
    "sample_name",
    "id",
    "name",
    "isolate",
];

/// Accepted (lowercase) headers for the cluster column.
pub const CLUSTER_COLUMN_SYNONYMS: &[&str] = &[
    "cluster",
    "cluster_id",
    "clusters",
    "poppunk_cluster",
    "lineage",
    "group",
];

/// Cluster assignments produced by one chunk's clustering run. Labels are
/// only meaningful within that chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialClusterTable {
    pub chunk_id: u32,
    pub assignments: BTreeMap<String, String>,
}

impl PartialClusterTable {
    pub fn new(chunk_id: u32, assignments: BTreeMap<String, String>) -> Self {
        Self {
            chunk_id,
            assignments,
        }
    }

    /// Parse the clustering engine's output table for `chunk_id`.
    pub fn from_file(chunk_id: u32, path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let assignments = parse_cluster_table(&content)
            .map_err(|e| CoreError::parse(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(chunk_id, assignments))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Number of distinct local labels.
    pub fn cluster_count(&self) -> usize {
        self.assignments.values().collect::<BTreeSet<_>>().len()
    }
}

/// Merged assignment: every sample appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalClusterTable {
    pub assignments: BTreeMap<String, String>,
}

impl GlobalClusterTable {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Label assigned to a sample.
    pub fn label_of(&self, sample_id: &str) -> Option<&str> {
        self.assignments.get(sample_id).map(String::as_str)
    }

    /// Members of each label, both in sorted order.
    pub fn members_by_label(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut by_label: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (sample, label) in &self.assignments {
            by_label
                .entry(label.as_str())
                .or_default()
                .push(sample.as_str());
        }
        by_label
    }

    /// Distinct labels in sorted order.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.assignments.values().map(String::as_str).collect()
    }

    /// Render as `sample<TAB>cluster` with a header, sorted by sample.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("sample\tcluster\n");
        for (sample, label) in &self.assignments {
            let _ = writeln!(out, "{}\t{}", sample, label);
        }
        out
    }

    /// Parse a table previously written by [`GlobalClusterTable::to_tsv`]
    /// (or any table the cluster parser accepts).
    pub fn from_tsv(content: &str) -> CoreResult<Self> {
        Ok(Self {
            assignments: parse_cluster_table(content)?,
        })
    }
}

/// One admissible group: a global label and the resolved input records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroup {
    pub label: String,
    pub members: Vec<InputRecord>,
}

impl ClusterGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Parse a delimited sample/cluster table.
///
/// The delimiter is a tab when the header contains one and a comma otherwise.
/// Column headers are matched case-insensitively against the synonym lists.
/// Rows lacking either value are skipped; a repeated sample keeps its first
/// label.
pub fn parse_cluster_table(content: &str) -> CoreResult<BTreeMap<String, String>> {
    let mut lines = content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| CoreError::parse("cluster table is empty"))?;
    let delimiter = if header.contains('\t') { '\t' } else { ',' };
    let columns: Vec<String> = header
        .split(delimiter)
        .map(|c| clean_field(c).to_ascii_lowercase())
        .collect();

    let sample_col = find_column(&columns, SAMPLE_COLUMN_SYNONYMS).ok_or_else(|| {
        CoreError::parse(format!(
            "no sample column in header '{}' (accepted: {})",
            header,
            SAMPLE_COLUMN_SYNONYMS.join(", ")
        ))
    })?;
    let cluster_col = find_column(&columns, CLUSTER_COLUMN_SYNONYMS).ok_or_else(|| {
        CoreError::parse(format!(
            "no cluster column in header '{}' (accepted: {})",
            header,
            CLUSTER_COLUMN_SYNONYMS.join(", ")
        ))
    })?;

    let mut assignments = BTreeMap::new();
    for (row_no, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(delimiter).map(clean_field).collect();
        let sample = fields.get(sample_col).copied().unwrap_or_default();
        let cluster = fields.get(cluster_col).copied().unwrap_or_default();
        if sample.is_empty() || cluster.is_empty() {
            tracing::warn!(row = row_no + 2, "Skipping cluster table row without sample or cluster");
            continue;
        }
        if let Some(existing) = assignments.get(sample) {
            if existing != cluster {
                tracing::warn!(
                    sample,
                    kept = %existing,
                    ignored = cluster,
                    "Sample listed twice in cluster table; keeping first label"
                );
            }
            continue;
        }
        assignments.insert(sample.to_string(), cluster.to_string());
    }
    Ok(assignments)
}

fn clean_field(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

fn find_column(columns: &[String], synonyms: &[&str]) -> Option<usize> {
    synonyms
        .iter()
        .find_map(|synonym| columns.iter().position(|c| c == synonym))
}
