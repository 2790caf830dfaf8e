//! Group Resolver
//!
//! Turns the global cluster table back into concrete input files and drops
//! groups too small for the downstream stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::clusters::{ClusterGroup, GlobalClusterTable};

/// Every downstream stage needs at least this many members.
pub const MIN_GROUP_SIZE: usize = 3;

/// A sample the clustering engine reported that the catalog cannot resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedSample {
    pub sample_id: String,
    pub label: String,
}

/// A group dropped for having fewer than [`MIN_GROUP_SIZE`] resolved members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedGroup {
    pub label: String,
    pub resolved_members: usize,
}

/// A catalog record reported under a second label (through a different
/// name); it stays with the label that claimed it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictingSample {
    pub sample_id: String,
    pub label: String,
    pub claimed_by: String,
}

/// Output of [`resolve_groups`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedGroups {
    /// Admissible groups, ordered by label
    pub groups: Vec<ClusterGroup>,
    pub pruned: Vec<PrunedGroup>,
    pub unresolved: Vec<UnresolvedSample>,
    pub conflicts: Vec<ConflictingSample>,
}

impl ResolvedGroups {
    pub fn admitted_samples(&self) -> usize {
        self.groups.iter().map(ClusterGroup::len).sum()
    }
}

/// Resolve each global label to its catalog records.
///
/// Unresolvable samples are warned about and dropped from their group. A
/// record belongs to at most one group: labels are visited in order and the
/// first to resolve a record keeps it. Groups left with fewer than
/// [`MIN_GROUP_SIZE`] members are pruned; their samples are not reassigned.
pub fn resolve_groups(table: &GlobalClusterTable, catalog: &Catalog) -> ResolvedGroups {
    let mut resolved = ResolvedGroups::default();
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();

    for (label, samples) in table.members_by_label() {
        let mut members = Vec::with_capacity(samples.len());
        for sample in samples {
            match catalog.resolve(sample) {
                Some(record) => members.push(record.clone()),
                None => {
                    tracing::warn!(
                        sample,
                        group = label,
                        "Clustered sample has no matching input file; dropping it"
                    );
                    resolved.unresolved.push(UnresolvedSample {
                        sample_id: sample.to_string(),
                        label: label.to_string(),
                    });
                }
            }
        }

        // Fallback resolution can map two reported names onto one record.
        members.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
        members.dedup_by(|a, b| a.sample_id == b.sample_id);

        let mut kept = Vec::with_capacity(members.len());
        for record in members {
            if let Some(owner) = claimed.get(&record.sample_id) {
                tracing::warn!(
                    sample = %record.sample_id,
                    group = label,
                    claimed_by = %owner,
                    "Input already belongs to another group; dropping it here"
                );
                resolved.conflicts.push(ConflictingSample {
                    sample_id: record.sample_id.clone(),
                    label: label.to_string(),
                    claimed_by: owner.clone(),
                });
                continue;
            }
            claimed.insert(record.sample_id.clone(), label.to_string());
            kept.push(record);
        }
        let members = kept;

        if members.len() < MIN_GROUP_SIZE {
            tracing::info!(
                group = label,
                members = members.len(),
                "Pruning undersized group"
            );
            resolved.pruned.push(PrunedGroup {
                label: label.to_string(),
                resolved_members: members.len(),
            });
            continue;
        }

        resolved.groups.push(ClusterGroup {
            label: label.to_string(),
            members,
        });
    }

    tracing::info!(
        admitted = resolved.groups.len(),
        pruned = resolved.pruned.len(),
        unresolved = resolved.unresolved.len(),
        conflicts = resolved.conflicts.len(),
        "Resolved cluster groups"
    );
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InputRecord;

    fn catalog(ids: &[&str]) -> Catalog {
        Catalog::new(
            ids.iter()
                .map(|id| InputRecord::new(*id, format!("/data/{}.fa", id)))
                .collect(),
        )
        .unwrap()
    }

    fn table(rows: &[(&str, &str)]) -> GlobalClusterTable {
        GlobalClusterTable {
            assignments: rows
                .iter()
                .map(|(s, l)| (s.to_string(), l.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_group_of_two_is_pruned() {
        let catalog = catalog(&["a", "b", "c", "d", "e"]);
        let table = table(&[("a", "1_1"), ("b", "1_1"), ("c", "1_2"), ("d", "1_2"), ("e", "1_2")]);

        let resolved = resolve_groups(&table, &catalog);
        assert_eq!(resolved.groups.len(), 1);
        assert_eq!(resolved.groups[0].label, "1_2");
        assert_eq!(resolved.pruned, vec![PrunedGroup { label: "1_1".into(), resolved_members: 2 }]);
    }

    #[test]
    fn test_never_emits_undersized_group() {
        let ids: Vec<String> = (0..40).map(|i| format!("s{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let catalog = catalog(&refs);
        // Labels of size 1..=8 in turn
        let mut rows = Vec::new();
        let mut next = 0;
        for size in 1..=8 {
            for _ in 0..size {
                if next < ids.len() {
                    rows.push((ids[next].clone(), format!("L{}", size)));
                    next += 1;
                }
            }
        }
        let table = GlobalClusterTable {
            assignments: rows.into_iter().collect(),
        };

        let resolved = resolve_groups(&table, &catalog);
        assert!(resolved.groups.iter().all(|g| g.len() >= MIN_GROUP_SIZE));
        assert_eq!(resolved.pruned.len(), 2);
    }

    #[test]
    fn test_unresolvable_samples_dropped_with_record() {
        let catalog = catalog(&["a", "b", "c"]);
        let table = table(&[("a", "x"), ("b", "x"), ("c", "x"), ("ghost", "x")]);

        let resolved = resolve_groups(&table, &catalog);
        assert_eq!(resolved.groups[0].len(), 3);
        assert_eq!(resolved.unresolved.len(), 1);
        assert_eq!(resolved.unresolved[0].sample_id, "ghost");
    }

    #[test]
    fn test_unresolvable_members_can_push_group_below_minimum() {
        let catalog = catalog(&["a", "b"]);
        let table = table(&[("a", "x"), ("b", "x"), ("ghost", "x")]);

        let resolved = resolve_groups(&table, &catalog);
        assert!(resolved.groups.is_empty());
        assert_eq!(resolved.pruned[0].resolved_members, 2);
    }

    #[test]
    fn test_record_reported_under_two_labels_stays_with_first() {
        let catalog = catalog(&["a", "b", "c", "d", "e", "f"]);
        let table = table(&[
            ("a", "1"),
            ("b", "1"),
            ("c", "1"),
            ("a.fa", "2"),
            ("d", "2"),
            ("e", "2"),
            ("f", "2"),
        ]);

        let resolved = resolve_groups(&table, &catalog);
        assert_eq!(resolved.groups.len(), 2);
        let second: Vec<&str> = resolved.groups[1]
            .members
            .iter()
            .map(|r| r.sample_id.as_str())
            .collect();
        assert_eq!(second, vec!["d", "e", "f"]);
        assert_eq!(
            resolved.conflicts,
            vec![ConflictingSample {
                sample_id: "a".into(),
                label: "2".into(),
                claimed_by: "1".into(),
            }]
        );
        assert_eq!(resolved.admitted_samples(), 6);
    }

    #[test]
    fn test_file_name_rows_resolve_via_fallback() {
        let catalog = catalog(&["a", "b", "c"]);
        let table = table(&[("a.fa", "7"), ("/x/b.fasta", "7"), ("c", "7")]);

        let resolved = resolve_groups(&table, &catalog);
        assert_eq!(resolved.groups.len(), 1);
        let ids: Vec<&str> = resolved.groups[0]
            .members
            .iter()
            .map(|r| r.sample_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(resolved.admitted_samples(), 3);
    }
}
