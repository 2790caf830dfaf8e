//! Settings Models
//!
//! Workflow configuration read from a TOML document. Every section has a
//! default; the defaults describe a PopPUNK -> Panaroo -> Gubbins -> IQ-TREE
//! deployment, though every program is treated as opaque.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strain_cascade_core::{CeilingClass, CoreError, CoreResult};
use strain_cascade_runner::{CommandTemplate, ResourceCeiling, Stage};

// ============================================================================
// Placeholders
// ============================================================================

/// Placeholders available to the clustering engine's templates.
pub const CLUSTERING_PLACEHOLDERS: &[&str] = &[
    "manifest",
    "output_dir",
    "threads",
    "chunk_id",
    "sketch_size",
    "min_k",
    "max_k",
    "k_step",
    "batch_size",
];

/// Placeholders available to the alignment tool's templates.
pub const ALIGNMENT_PLACEHOLDERS: &[&str] =
    &["inputs", "input_dir", "output_dir", "threads", "prefix"];

/// Placeholders available to the filtering tool's templates.
pub const FILTERING_PLACEHOLDERS: &[&str] = &["alignment", "output_dir", "threads", "prefix"];

/// Placeholders available to the tree builder's templates.
pub const TREE_BUILDING_PLACEHOLDERS: &[&str] = &["filtered", "output_dir", "threads", "prefix"];

/// Placeholders for a downstream stage.
pub fn stage_placeholders(stage: Stage) -> &'static [&'static str] {
    match stage {
        Stage::Alignment => ALIGNMENT_PLACEHOLDERS,
        Stage::Filtering => FILTERING_PLACEHOLDERS,
        Stage::TreeBuilding => TREE_BUILDING_PLACEHOLDERS,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// `[input]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory of assemblies, or a `sample<TAB>path` manifest
    pub catalog: PathBuf,
    /// Suffixes accepted when scanning a directory
    pub extensions: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("assemblies"),
            extensions: ["fa", "fasta", "fna", "fa.gz", "fasta.gz", "fna.gz"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// `[run]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    /// Maximum samples per clustering invocation; 0 disables chunking
    pub max_chunk_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("strain-cascade-run"),
            max_chunk_size: 150,
        }
    }
}

/// `[resources]`: aggregate capacity of the execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Hard ceiling on concurrently live external processes
    pub max_workers: usize,
    /// Memory shared by all concurrent units
    pub total_memory_mb: u64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            total_memory_mb: 65_536,
        }
    }
}

/// One external tool: program, argument template, artifact locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub program: String,
    pub args: CommandTemplate,
    /// Artifact locator template; globs allowed
    pub artifact: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ceiling: ResourceCeiling,
}

impl ToolConfig {
    pub fn new<I, S>(program: &str, args: I, artifact: &str, ceiling: ResourceCeiling) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: CommandTemplate::new(args),
            artifact: artifact.to_string(),
            env: BTreeMap::new(),
            ceiling,
        }
    }

    /// The artifact locator as a one-token template.
    pub fn artifact_template(&self) -> CommandTemplate {
        CommandTemplate::new([self.artifact.clone()])
    }

    fn validate(&self, section: &str, placeholders: &[&str], total_memory_mb: u64) -> CoreResult<()> {
        let context = |e: CoreError| CoreError::config(format!("[{}] {}", section, strip_prefix(&e)));

        if self.program.trim().is_empty() {
            return Err(CoreError::config(format!("[{}] program must not be empty", section)));
        }
        if self.artifact.trim().is_empty() {
            return Err(CoreError::config(format!("[{}] artifact must not be empty", section)));
        }
        self.args.validate(placeholders).map_err(context)?;
        self.artifact_template()
            .validate(placeholders)
            .map_err(context)?;
        validate_ceiling(section, &self.ceiling, total_memory_mb)
    }
}

fn strip_prefix(err: &CoreError) -> String {
    match err {
        CoreError::Config(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn validate_ceiling(section: &str, ceiling: &ResourceCeiling, total_memory_mb: u64) -> CoreResult<()> {
    if ceiling.memory_mb == 0 {
        return Err(CoreError::config(format!("[{}] memory_mb must be at least 1", section)));
    }
    if ceiling.memory_mb > total_memory_mb {
        return Err(CoreError::config(format!(
            "[{}] memory_mb ({}) exceeds resources.total_memory_mb ({})",
            section, ceiling.memory_mb, total_memory_mb
        )));
    }
    if ceiling.timeout_secs == 0 {
        return Err(CoreError::config(format!("[{}] timeout_secs must be at least 1", section)));
    }
    if ceiling.threads == 0 {
        return Err(CoreError::config(format!("[{}] threads must be at least 1", section)));
    }
    if ceiling.max_arenas == 0 {
        return Err(CoreError::config(format!("[{}] max_arenas must be at least 1", section)));
    }
    Ok(())
}

/// `[clustering.class_memory]`: megabytes per resource ceiling class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassMemory {
    pub standard_mb: u64,
    pub large_mb: u64,
    pub extra_large_mb: u64,
}

impl Default for ClassMemory {
    fn default() -> Self {
        Self {
            standard_mb: 8_192,
            large_mb: 16_384,
            extra_large_mb: 32_768,
        }
    }
}

impl ClassMemory {
    pub fn memory_mb(&self, class: CeilingClass) -> u64 {
        match class {
            CeilingClass::Standard => self.standard_mb,
            CeilingClass::Large => self.large_mb,
            CeilingClass::ExtraLarge => self.extra_large_mb,
        }
    }
}

/// `[clustering]`. The ceiling's `memory_mb` is replaced per chunk by the
/// class memory of the selected resource profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(flatten)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub class_memory: ClassMemory,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            tool: ToolConfig::new(
                "poppunk",
                [
                    "--easy-run",
                    "--r-files",
                    "{manifest}",
                    "--output",
                    "{output_dir}",
                    "--threads",
                    "{threads}",
                    "--sketch-size={sketch_size}",
                    "--min-k={min_k}",
                    "--max-k={max_k}",
                    "--k-step={k_step}",
                ],
                "{output_dir}/*_clusters.csv",
                ResourceCeiling::new(8_192, 6 * 60 * 60).with_threads(4),
            ),
            class_memory: ClassMemory::default(),
        }
    }
}

/// `[stages.tree_building]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeBuildingConfig {
    #[serde(flatten)]
    pub tool: ToolConfig,
    /// File written to the stage directory when there are too few sequences
    #[serde(default = "default_insufficient_marker")]
    pub insufficient_marker: String,
}

fn default_insufficient_marker() -> String {
    "INSUFFICIENT_DATA".to_string()
}

impl Default for TreeBuildingConfig {
    fn default() -> Self {
        Self {
            tool: ToolConfig::new(
                "iqtree2",
                [
                    "-s", "{filtered}", "-m", "GTR+G", "-T", "{threads}", "--prefix", "{prefix}",
                    "-redo",
                ],
                "{prefix}.treefile",
                ResourceCeiling::new(4_096, 6 * 60 * 60).with_threads(4),
            ),
            insufficient_marker: default_insufficient_marker(),
        }
    }
}

/// `[stages]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub alignment: ToolConfig,
    pub filtering: ToolConfig,
    pub tree_building: TreeBuildingConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            alignment: ToolConfig::new(
                "panaroo",
                [
                    "-i",
                    "{inputs}",
                    "-o",
                    "{output_dir}",
                    "-t",
                    "{threads}",
                    "--clean-mode",
                    "strict",
                    "-a",
                    "core",
                ],
                "{output_dir}/core_gene_alignment.aln",
                ResourceCeiling::new(16_384, 12 * 60 * 60).with_threads(4),
            ),
            filtering: ToolConfig::new(
                "run_gubbins.py",
                ["--prefix", "{prefix}", "--threads", "{threads}", "{alignment}"],
                "{prefix}.filtered_polymorphic_sites.fasta",
                ResourceCeiling::new(8_192, 6 * 60 * 60).with_threads(4),
            ),
            tree_building: TreeBuildingConfig::default(),
        }
    }
}

impl StagesConfig {
    /// Tool section for a stage.
    pub fn tool(&self, stage: Stage) -> &ToolConfig {
        match stage {
            Stage::Alignment => &self.alignment,
            Stage::Filtering => &self.filtering,
            Stage::TreeBuilding => &self.tree_building.tool,
        }
    }
}

// ============================================================================
// Workflow Config
// ============================================================================

/// Complete workflow configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub input: InputConfig,
    pub run: RunConfig,
    pub resources: ResourcesConfig,
    pub clustering: ClusteringConfig,
    pub stages: StagesConfig,
}

impl WorkflowConfig {
    /// Clustering ceiling for a profile's ceiling class.
    pub fn clustering_ceiling(&self, class: CeilingClass) -> ResourceCeiling {
        self.clustering
            .tool
            .ceiling
            .with_memory_mb(self.clustering.class_memory.memory_mb(class))
    }

    /// Validate the configuration. Every violation is a configuration error.
    pub fn validate(&self) -> CoreResult<()> {
        if self.input.catalog.as_os_str().is_empty() {
            return Err(CoreError::config("[input] catalog must be set"));
        }
        if !self.input.catalog.exists() {
            return Err(CoreError::config(format!(
                "[input] catalog '{}' does not exist",
                self.input.catalog.display()
            )));
        }
        if self.input.catalog.is_dir() && self.input.extensions.is_empty() {
            return Err(CoreError::config(
                "[input] extensions must not be empty when catalog is a directory",
            ));
        }
        if self.run.output_dir.as_os_str().is_empty() {
            return Err(CoreError::config("[run] output_dir must be set"));
        }
        if self.resources.max_workers == 0 {
            return Err(CoreError::config("[resources] max_workers must be at least 1"));
        }
        if self.resources.total_memory_mb == 0 {
            return Err(CoreError::config(
                "[resources] total_memory_mb must be at least 1",
            ));
        }

        let total = self.resources.total_memory_mb;
        for class in [
            CeilingClass::Standard,
            CeilingClass::Large,
            CeilingClass::ExtraLarge,
        ] {
            validate_ceiling(
                &format!("clustering.class_memory.{}", class),
                &self.clustering_ceiling(class),
                total,
            )?;
        }
        self.clustering
            .tool
            .validate("clustering", CLUSTERING_PLACEHOLDERS, total)?;

        for stage in Stage::ALL {
            self.stages.tool(stage).validate(
                &format!("stages.{}", stage),
                stage_placeholders(stage),
                total,
            )?;
        }

        let marker = &self.stages.tree_building.insufficient_marker;
        if marker.trim().is_empty() || marker.contains('/') {
            return Err(CoreError::config(
                "[stages.tree_building] insufficient_marker must be a plain file name",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(dir: &TempDir) -> WorkflowConfig {
        let mut config = WorkflowConfig::default();
        config.input.catalog = dir.path().to_path_buf();
        config.run.output_dir = dir.path().join("out");
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let dir = TempDir::new().unwrap();
        assert!(valid_config(&dir).validate().is_ok());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: WorkflowConfig = toml::from_str(
            r#"
            [input]
            catalog = "genomes"

            [run]
            max_chunk_size = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.input.catalog, PathBuf::from("genomes"));
        assert_eq!(config.run.max_chunk_size, 0);
        assert_eq!(config.clustering.tool.program, "poppunk");
        assert_eq!(config.stages.tree_building.insufficient_marker, "INSUFFICIENT_DATA");
    }

    #[test]
    fn test_full_tool_section_parses() {
        let config: WorkflowConfig = toml::from_str(
            r#"
            [clustering]
            program = "cluster.sh"
            args = ["{manifest}", "{output_dir}", "--sketch={sketch_size}"]
            artifact = "{output_dir}/clusters.csv"

            [clustering.ceiling]
            threads = 2
            timeout_secs = 30

            [clustering.class_memory]
            extra_large_mb = 12000

            [stages.tree_building]
            program = "tree.sh"
            args = ["{filtered}", "{prefix}"]
            artifact = "{prefix}.nwk"
            insufficient_marker = "TOO_FEW"

            [stages.tree_building.env]
            TMPDIR = "/scratch"
            "#,
        )
        .unwrap();
        assert_eq!(config.clustering.tool.program, "cluster.sh");
        assert_eq!(config.clustering.tool.ceiling.threads, 2);
        assert_eq!(config.clustering.tool.ceiling.max_arenas, 2);
        assert_eq!(config.clustering.class_memory.extra_large_mb, 12000);
        assert_eq!(config.clustering.class_memory.standard_mb, 8192);
        assert_eq!(
            config.clustering_ceiling(CeilingClass::ExtraLarge).memory_mb,
            12000
        );
        assert_eq!(config.stages.tree_building.insufficient_marker, "TOO_FEW");
        assert_eq!(config.stages.tree_building.tool.env["TMPDIR"], "/scratch");
        assert_eq!(config.stages.alignment.program, "panaroo");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.stages.filtering.args = CommandTemplate::new(["{inputs}"]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
        assert!(err.to_string().contains("stages.filtering"));
    }

    #[test]
    fn test_ceiling_above_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.resources.total_memory_mb = 20_000;
        // extra_large class (32768) no longer fits
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("extra_large"));
    }

    #[test]
    fn test_zero_workers_and_timeouts_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.resources.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config(&dir);
        config.stages.alignment.ceiling.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_catalog_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.input.catalog = dir.path().join("nope");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_marker_must_be_file_name() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.stages.tree_building.insufficient_marker = "../x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = WorkflowConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: WorkflowConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
