//! Job Factory
//!
//! Renders the configured tool sections into concrete `JobSpec`s: one
//! parameterised path for the clustering engine and all three stage tools.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strain_cascade_core::{Chunk, ClusterGroup, CoreResult, ResourceProfile};
use strain_cascade_runner::{JobSpec, ResourceCeiling, Stage, TemplateContext};

use crate::models::settings::{ToolConfig, WorkflowConfig};
use crate::storage::layout::{stage_unit_key, RunLayout};

#[derive(Debug, Clone)]
pub struct JobFactory {
    config: Arc<WorkflowConfig>,
    layout: RunLayout,
}

impl JobFactory {
    pub fn new(config: Arc<WorkflowConfig>, layout: RunLayout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Clustering invocation for one chunk under `profile`.
    pub fn clustering_job(&self, chunk: &Chunk, profile: &ResourceProfile) -> CoreResult<JobSpec> {
        let ceiling = self.config.clustering_ceiling(profile.ceiling_class);
        let output_dir = self.layout.chunk_output_dir(chunk.id);
        let context = TemplateContext::new()
            .set("manifest", self.layout.chunk_manifest(chunk.id).display())
            .set("output_dir", output_dir.display())
            .set("threads", ceiling.threads)
            .set("chunk_id", chunk.id)
            .set_optional("sketch_size", profile.sketch_size)
            .set_optional("min_k", profile.min_k)
            .set_optional("max_k", profile.max_k)
            .set_optional("k_step", profile.k_step)
            .set_optional("batch_size", profile.batch_size);

        let inputs = chunk.records.iter().map(|r| r.path.clone()).collect();
        build(
            chunk.unit_key(),
            &self.config.clustering.tool,
            ceiling,
            &context,
            self.layout.chunk_dir(chunk.id),
            output_dir,
            inputs,
        )
    }

    /// Alignment over a group's members.
    pub fn alignment_job(&self, group: &ClusterGroup, slug: &str) -> CoreResult<JobSpec> {
        let stage = Stage::Alignment;
        let tool = self.config.stages.tool(stage);
        let output_dir = self.layout.stage_dir(slug, stage);
        let inputs: Vec<PathBuf> = group.members.iter().map(|r| r.path.clone()).collect();
        let context = TemplateContext::new()
            .set_list("inputs", inputs.iter().map(|p| p.display()))
            .set("input_dir", self.layout.group_input_dir(slug).display())
            .set("output_dir", output_dir.display())
            .set("threads", tool.ceiling.threads)
            .set("prefix", output_dir.join(slug).display());

        build(
            stage_unit_key(slug, stage),
            tool,
            tool.ceiling,
            &context,
            output_dir.clone(),
            output_dir,
            inputs,
        )
    }

    /// Filtering of an alignment artifact.
    pub fn filtering_job(&self, slug: &str, alignment: &Path) -> CoreResult<JobSpec> {
        self.single_input_job(Stage::Filtering, "alignment", slug, alignment)
    }

    /// Tree building from a filtered-sites artifact.
    pub fn tree_job(&self, slug: &str, filtered: &Path) -> CoreResult<JobSpec> {
        self.single_input_job(Stage::TreeBuilding, "filtered", slug, filtered)
    }

    /// Path of the insufficient-data marker for a group.
    pub fn insufficient_marker(&self, slug: &str) -> PathBuf {
        self.layout
            .stage_dir(slug, Stage::TreeBuilding)
            .join(&self.config.stages.tree_building.insufficient_marker)
    }

    fn single_input_job(
        &self,
        stage: Stage,
        input_name: &str,
        slug: &str,
        input: &Path,
    ) -> CoreResult<JobSpec> {
        let tool = self.config.stages.tool(stage);
        let output_dir = self.layout.stage_dir(slug, stage);
        let context = TemplateContext::new()
            .set(input_name, input.display())
            .set("output_dir", output_dir.display())
            .set("threads", tool.ceiling.threads)
            .set("prefix", output_dir.join(slug).display());

        build(
            stage_unit_key(slug, stage),
            tool,
            tool.ceiling,
            &context,
            output_dir.clone(),
            output_dir,
            vec![input.to_path_buf()],
        )
    }
}

fn build(
    unit: String,
    tool: &ToolConfig,
    ceiling: ResourceCeiling,
    context: &TemplateContext,
    workdir: PathBuf,
    output_dir: PathBuf,
    inputs: Vec<PathBuf>,
) -> CoreResult<JobSpec> {
    let args = tool.args.render(context)?;
    let artifact = tool.artifact_template().render_single(context)?;
    Ok(JobSpec::new(unit, &tool.program, workdir)
        .with_args(args)
        .with_output_dir(output_dir)
        .with_env(tool.env.clone())
        .with_ceiling(ceiling)
        .with_artifact(artifact)
        .with_inputs(inputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strain_cascade_core::{select_profile, InputRecord};

    fn factory() -> JobFactory {
        let mut config = WorkflowConfig::default();
        config.run.output_dir = PathBuf::from("/runs/r1");
        JobFactory::new(Arc::new(config), RunLayout::new("/runs/r1"))
    }

    fn chunk(n: usize) -> Chunk {
        Chunk {
            id: 2,
            records: (0..n)
                .map(|i| InputRecord::new(format!("s{}", i), format!("/in/s{}.fa", i)))
                .collect(),
        }
    }

    #[test]
    fn test_default_profile_omits_tuning_flags() {
        let chunk = chunk(20);
        let spec = factory()
            .clustering_job(&chunk, &select_profile(chunk.len()))
            .unwrap();
        assert_eq!(spec.unit, "chunk-0002");
        assert!(spec.args.iter().all(|a| !a.starts_with("--sketch-size")));
        assert!(spec
            .args
            .contains(&"/runs/r1/chunks/chunk_0002/manifest.tsv".to_string()));
        assert_eq!(spec.ceiling.memory_mb, 8_192);
        assert_eq!(spec.workdir, PathBuf::from("/runs/r1/chunks/chunk_0002"));
        assert_eq!(spec.artifact, "/runs/r1/chunks/chunk_0002/output/*_clusters.csv");
        assert_eq!(spec.inputs.len(), 20);
    }

    #[test]
    fn test_conservative_profile_sets_flags_and_class_memory() {
        let chunk = chunk(250);
        let spec = factory()
            .clustering_job(&chunk, &select_profile(chunk.len()))
            .unwrap();
        assert!(spec.args.contains(&"--sketch-size=5000".to_string()));
        assert!(spec.args.contains(&"--min-k=15".to_string()));
        assert_eq!(spec.ceiling.memory_mb, 32_768);
    }

    #[test]
    fn test_alignment_expands_members() {
        let group = ClusterGroup {
            label: "2_1".into(),
            members: chunk(3).records,
        };
        let spec = factory().alignment_job(&group, "2_1").unwrap();
        assert_eq!(spec.unit, "group-2_1-alignment");
        assert_eq!(&spec.args[..5], &["-i", "/in/s0.fa", "/in/s1.fa", "/in/s2.fa", "-o"]);
        assert_eq!(
            spec.output_dir,
            Some(PathBuf::from("/runs/r1/groups/2_1/01_alignment"))
        );
    }

    #[test]
    fn test_filtering_and_tree_chain_on_previous_artifact() {
        let f = factory();
        let spec = f
            .filtering_job("2_1", Path::new("/runs/r1/groups/2_1/01_alignment/core.aln"))
            .unwrap();
        assert_eq!(spec.unit, "group-2_1-filtering");
        assert_eq!(
            spec.artifact,
            "/runs/r1/groups/2_1/02_filtering/2_1.filtered_polymorphic_sites.fasta"
        );
        assert_eq!(
            spec.inputs,
            vec![PathBuf::from("/runs/r1/groups/2_1/01_alignment/core.aln")]
        );

        let tree = f.tree_job("2_1", Path::new(&spec.artifact)).unwrap();
        assert_eq!(tree.artifact, "/runs/r1/groups/2_1/03_tree/2_1.treefile");
        assert_eq!(
            f.insufficient_marker("2_1"),
            PathBuf::from("/runs/r1/groups/2_1/03_tree/INSUFFICIENT_DATA")
        );
    }
}
