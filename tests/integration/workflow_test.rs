//! Workflow Integration Tests
//!
//! Full runs against shell-script stand-ins for the clustering engine and the
//! three stage tools. Every script appends one line per invocation to a call
//! log so tests can tell executed units from restored ones.
//!
//! Sample names are `<cluster>_<n>`; the fake clustering engine assigns each
//! sample to the cluster named by its prefix.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use strain_cascade::models::report::{ChunkStatus, RunReport, RunStatus};
use strain_cascade::models::settings::{ToolConfig, WorkflowConfig};
use strain_cascade::{ConfigService, Workflow};
use strain_cascade_runner::{GroupState, ResourceCeiling, Stage, StageStatus};

// ============================================================================
// Helper Functions
// ============================================================================

const CLUSTER_SCRIPT: &str = r#"#!/bin/sh
chunk=$(basename "$(dirname "$1")")
echo "cluster $chunk $OMP_NUM_THREADS" >> @ROOT@/calls.log
echo "$@"
case "$chunk" in
  chunk_0001) [ -f @ROOT@/slow ] && sleep 30 ;;
esac
mkdir -p "$2"
printf 'Taxon,Cluster\n' > "$2/run_clusters.csv"
tab=$(printf '\t')
while IFS="$tab" read -r sample path; do
  printf '%s,%s\n' "$sample" "${sample%%_*}" >> "$2/run_clusters.csv"
done < "$1"
"#;

const ALIGN_SCRIPT: &str = r#"#!/bin/sh
out="$1"
shift
slug=$(basename "$(dirname "$out")")
echo "align $slug" >> @ROOT@/calls.log
if [ -f @ROOT@/fail_$slug ]; then
  echo "alignment exploded" >&2
  exit 3
fi
for f in "$@"; do
  printf '>%s\nACGT\n' "$(basename "$f")"
done > "$out/core_gene_alignment.aln"
"#;

const FILTER_SCRIPT: &str = r#"#!/bin/sh
slug=$(basename "$1")
echo "filter $slug" >> @ROOT@/calls.log
if [ -f @ROOT@/thin_$slug ]; then
  head -n 4 "$2" > "$1.filtered_polymorphic_sites.fasta"
else
  cp "$2" "$1.filtered_polymorphic_sites.fasta"
fi
"#;

const TREE_SCRIPT: &str = r#"#!/bin/sh
slug=$(basename "$2")
echo "tree $slug" >> @ROOT@/calls.log
printf '(a,b,c);\n' > "$2.treefile"
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(samples: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let assemblies = dir.path().join("assemblies");
        fs::create_dir(&assemblies).unwrap();
        for sample in samples {
            fs::write(assemblies.join(format!("{}.fasta", sample)), ">contig\nACGT\n").unwrap();
        }
        let fixture = Self { dir };
        for (name, body) in [
            ("cluster.sh", CLUSTER_SCRIPT),
            ("align.sh", ALIGN_SCRIPT),
            ("filter.sh", FILTER_SCRIPT),
            ("tree.sh", TREE_SCRIPT),
        ] {
            fixture.write_script(name, body);
        }
        fixture
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write_script(&self, name: &str, body: &str) {
        let path = self.root().join(name);
        fs::write(&path, body.replace("@ROOT@", &self.root().display().to_string())).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn script(&self, name: &str) -> String {
        self.root().join(name).display().to_string()
    }

    fn flag(&self, name: &str) {
        fs::write(self.root().join(name), "").unwrap();
    }

    fn unflag(&self, name: &str) {
        fs::remove_file(self.root().join(name)).unwrap();
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn clear_calls(&self) {
        let _ = fs::remove_file(self.root().join("calls.log"));
    }

    fn run_dir(&self) -> PathBuf {
        self.root().join("run")
    }

    /// Configuration with relative catalog and output paths, as a user
    /// would write it next to their data.
    fn config(&self, max_chunk_size: usize) -> WorkflowConfig {
        let ceiling = ResourceCeiling::new(1_024, 20);
        let mut config = WorkflowConfig::default();
        config.input.catalog = PathBuf::from("assemblies");
        config.run.output_dir = PathBuf::from("run");
        config.run.max_chunk_size = max_chunk_size;
        config.resources.max_workers = 4;
        config.resources.total_memory_mb = 8_192;
        config.clustering.tool = ToolConfig::new(
            &self.script("cluster.sh"),
            ["{manifest}", "{output_dir}", "--sketch={sketch_size}"],
            "{output_dir}/*_clusters.csv",
            ceiling,
        );
        config.clustering.class_memory.standard_mb = 1_024;
        config.clustering.class_memory.large_mb = 2_048;
        config.clustering.class_memory.extra_large_mb = 4_096;
        config.stages.alignment = ToolConfig::new(
            &self.script("align.sh"),
            ["{output_dir}", "{inputs}"],
            "{output_dir}/core_gene_alignment.aln",
            ceiling,
        );
        config.stages.filtering = ToolConfig::new(
            &self.script("filter.sh"),
            ["{prefix}", "{alignment}"],
            "{prefix}.filtered_polymorphic_sites.fasta",
            ceiling,
        );
        config.stages.tree_building.tool = ToolConfig::new(
            &self.script("tree.sh"),
            ["{filtered}", "{prefix}"],
            "{prefix}.treefile",
            ceiling,
        );
        config
    }

    /// Write `config` to disk and run it through the loader, as the binary does.
    async fn run(&self, config: &WorkflowConfig) -> RunReport {
        let path = self.root().join("strain-cascade.toml");
        ConfigService::write_template(&path, config, true).unwrap();
        let loaded = ConfigService::load(&path).unwrap().into_config();
        Workflow::new(loaded).run().await.unwrap()
    }
}

fn group<'a>(report: &'a RunReport, label: &str) -> &'a strain_cascade::models::report::PipelineRun {
    report
        .groups
        .iter()
        .find(|g| g.label == label)
        .unwrap_or_else(|| panic!("group {} not in report", label))
}

const SAMPLES: &[&str] = &["a_1", "a_2", "a_3", "b_1", "b_2", "b_3", "c_1"];

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_run_produces_trees() {
    let fixture = Fixture::new(SAMPLES);
    let report = fixture.run(&fixture.config(100)).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.catalog_size, 7);
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.groups.len(), 2);
    assert_eq!(group(&report, "a").state, GroupState::Done);
    assert_eq!(group(&report, "b").state, GroupState::Done);
    assert_eq!(report.pruned.len(), 1);
    assert_eq!(report.pruned[0].label, "c");

    let run = fixture.run_dir();
    assert!(run.join("groups/a/03_tree/a.treefile").is_file());
    assert!(run.join("run_report.json").is_file());
    let global = fs::read_to_string(run.join("clusters/global_clusters.tsv")).unwrap();
    assert!(global.starts_with("sample\tcluster\na_1\ta\n"));
    let groups = fs::read_to_string(run.join("clusters/groups.tsv")).unwrap();
    assert!(groups.contains("c\t1\tpruned"));

    // Threading is pinned for every child
    assert!(fixture.calls().contains(&"cluster chunk_0001 1".to_string()));
    // The default profile leaves the sketch flag out entirely
    let args = fs::read_to_string(run.join("chunks/chunk_0001/chunk-0001.stdout.log")).unwrap();
    assert!(args.contains("manifest.tsv"));
    assert!(!args.contains("--sketch"));
}

#[tokio::test]
async fn test_rerun_restores_everything() {
    let fixture = Fixture::new(SAMPLES);
    let config = fixture.config(100);
    fixture.run(&config).await;
    fixture.clear_calls();

    let report = fixture.run(&config).await;
    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(fixture.calls().is_empty(), "rerun executed {:?}", fixture.calls());
    assert_eq!(report.chunks[0].status, ChunkStatus::Restored);
}

#[tokio::test]
async fn test_group_failure_is_isolated() {
    let fixture = Fixture::new(SAMPLES);
    fixture.flag("fail_a");
    let report = fixture.run(&fixture.config(100)).await;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.exit_code(), 1);
    let a = group(&report, "a");
    assert_eq!(a.state, GroupState::Failed(Stage::Alignment));
    assert_eq!(a.stages[0].failure_tag.as_deref(), Some("tool-failure"));
    assert!(a.stages[0]
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("alignment exploded"));
    assert_eq!(a.stages[1].status, StageStatus::Skipped);
    assert_eq!(group(&report, "b").state, GroupState::Done);

    let calls = fixture.calls();
    assert!(!calls.contains(&"filter a".to_string()));
    assert!(calls.contains(&"tree b".to_string()));

    // Fix the cause and rerun: only the failed group executes
    fixture.unflag("fail_a");
    fixture.clear_calls();
    let report = fixture.run(&fixture.config(100)).await;
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        fixture.calls(),
        vec!["align a".to_string(), "filter a".to_string(), "tree a".to_string()]
    );
}

#[tokio::test]
async fn test_insufficient_sequences_finish_with_warning() {
    let fixture = Fixture::new(SAMPLES);
    fixture.flag("thin_b");
    let report = fixture.run(&fixture.config(100)).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.counts.done_with_warning, 1);
    let b = group(&report, "b");
    assert_eq!(b.state, GroupState::DoneWithWarning);
    assert_eq!(b.stages[2].status, StageStatus::Warned);

    let marker = fixture.run_dir().join("groups/b/03_tree/INSUFFICIENT_DATA");
    assert!(marker.is_file());
    assert!(!fixture.calls().contains(&"tree b".to_string()));

    // The warning is reproduced from its checkpoint
    fixture.clear_calls();
    let report = fixture.run(&fixture.config(100)).await;
    assert_eq!(group(&report, "b").state, GroupState::DoneWithWarning);
    assert!(fixture.calls().is_empty());
}

#[tokio::test]
async fn test_chunk_timeout_aborts_then_resumes() {
    let fixture = Fixture::new(SAMPLES);
    fixture.flag("slow");
    let mut config = fixture.config(4);
    config.clustering.tool.ceiling.timeout_secs = 1;

    let report = fixture.run(&config).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.abort_reason.as_deref().unwrap().contains("chunk-0001"));
    assert_eq!(report.chunks[0].status, ChunkStatus::Failed);
    assert_eq!(report.chunks[0].failure_tag.as_deref(), Some("timeout"));
    assert!(report.groups.is_empty());
    assert!(!fixture.run_dir().join("clusters/global_clusters.tsv").exists());

    // Raise the timeout: the chunk that finished stays valid
    fixture.unflag("slow");
    fixture.clear_calls();
    config.clustering.tool.ceiling.timeout_secs = 60;
    let report = fixture.run(&config).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    let clustered: Vec<String> = fixture
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("cluster"))
        .collect();
    assert_eq!(clustered, vec!["cluster chunk_0001 1".to_string()]);
    assert_eq!(report.chunks[1].status, ChunkStatus::Restored);

    // Chunk 1 holds a_1..a_3 and b_1; labels are namespaced per chunk
    assert_eq!(group(&report, "1_a").state, GroupState::Done);
    assert!(report.pruned.iter().any(|p| p.label == "2_b"));
}

#[tokio::test]
async fn test_plan_runs_nothing() {
    let fixture = Fixture::new(SAMPLES);
    let path = fixture.root().join("strain-cascade.toml");
    ConfigService::write_template(&path, &fixture.config(3), true).unwrap();
    let plan = Workflow::new(ConfigService::load(&path).unwrap().into_config())
        .plan()
        .unwrap();

    assert_eq!(plan.chunks.len(), 3);
    assert_eq!(plan.chunks[2].samples, 1);
    assert!(fixture.calls().is_empty());
    assert!(!fixture.run_dir().exists());
}
