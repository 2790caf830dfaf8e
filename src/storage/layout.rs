//! Run Directory Layout
//!
//! Deterministic paths for everything a run writes. Concurrent units never
//! share an output location: chunk areas are keyed by chunk id, group areas
//! by sanitised label, and stage areas by stage.
//!
//! ```text
//! <output_dir>/
//!   chunks/chunk_0001/{manifest.tsv, output/, *.log}
//!   clusters/global_clusters.tsv
//!   clusters/groups.tsv
//!   groups/<label>/{input, 01_alignment, 02_filtering, 03_tree}
//!   checkpoints/*.json
//!   run_report.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use strain_cascade_runner::Stage;

use crate::utils::error::AppResult;
use crate::utils::paths::{ensure_dir, sanitize_label};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the fixed top-level directories.
    pub fn prepare(&self) -> AppResult<()> {
        for dir in [
            self.chunks_dir(),
            self.clusters_dir(),
            self.groups_dir(),
            self.checkpoints_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    pub fn chunk_dir(&self, chunk_id: u32) -> PathBuf {
        self.chunks_dir().join(format!("chunk_{:04}", chunk_id))
    }

    /// `sample<TAB>path` manifest handed to the clustering engine
    pub fn chunk_manifest(&self, chunk_id: u32) -> PathBuf {
        self.chunk_dir(chunk_id).join("manifest.tsv")
    }

    /// Directory the clustering engine writes into
    pub fn chunk_output_dir(&self, chunk_id: u32) -> PathBuf {
        self.chunk_dir(chunk_id).join("output")
    }

    pub fn clusters_dir(&self) -> PathBuf {
        self.root.join("clusters")
    }

    pub fn global_table(&self) -> PathBuf {
        self.clusters_dir().join("global_clusters.tsv")
    }

    pub fn groups_table(&self) -> PathBuf {
        self.clusters_dir().join("groups.tsv")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join("groups")
    }

    pub fn group_dir(&self, slug: &str) -> PathBuf {
        self.groups_dir().join(slug)
    }

    /// Links to the group's member files
    pub fn group_input_dir(&self, slug: &str) -> PathBuf {
        self.group_dir(slug).join("input")
    }

    pub fn stage_dir(&self, slug: &str, stage: Stage) -> PathBuf {
        self.group_dir(slug).join(stage.dir_name())
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("run_report.json")
    }
}

/// Directory names for group labels, in the same order. Sanitised labels
/// that collide get a numeric suffix.
pub fn assign_group_slugs<'a, I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = HashSet::new();
    labels
        .into_iter()
        .map(|label| {
            let base = sanitize_label(label);
            let mut slug = base.clone();
            let mut n = 2;
            while !taken.insert(slug.clone()) {
                slug = format!("{}-{}", base, n);
                n += 1;
            }
            slug
        })
        .collect()
}

/// Unit key for one stage of one group (`group-1_3-alignment`).
pub fn stage_unit_key(slug: &str, stage: Stage) -> String {
    format!("group-{}-{}", slug, stage)
}
