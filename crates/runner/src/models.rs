//! Job Models
//!
//! Data types describing one bounded external-tool invocation and its result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// Resource Ceiling
// ============================================================================

/// Enforced upper bound for one invocation.
///
/// Carried by value in every [`JobSpec`], so concurrent units with different
/// ceilings never share process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCeiling {
    /// Address-space and data-segment cap in megabytes
    pub memory_mb: u64,
    /// Thread count handed to the tool through its `{threads}` placeholder
    pub threads: u32,
    /// Wall-clock budget in seconds
    pub timeout_secs: u64,
    /// Allocator arena limit (`MALLOC_ARENA_MAX`)
    pub max_arenas: u32,
    pub disable_core_dumps: bool,
}

impl Default for ResourceCeiling {
    fn default() -> Self {
        Self {
            memory_mb: 8_192,
            threads: 1,
            timeout_secs: 4 * 60 * 60,
            max_arenas: 2,
            disable_core_dumps: true,
        }
    }
}

impl ResourceCeiling {
    /// Create a ceiling with the given memory cap and timeout, other
    /// fields at their defaults.
    pub fn new(memory_mb: u64, timeout_secs: u64) -> Self {
        Self {
            memory_mb,
            timeout_secs,
            ..Self::default()
        }
    }

    /// Set the thread count.
    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    /// Set the memory cap.
    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Set the allocator arena limit.
    pub fn with_max_arenas(mut self, max_arenas: u32) -> Self {
        self.max_arenas = max_arenas;
        self
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }
}

// ============================================================================
// Job Spec
// ============================================================================

/// One fully rendered external-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Deterministic unit key (`chunk-0003`, `group-7_2-alignment`)
    pub unit: String,
    /// Executable name or path
    pub program: String,
    /// Rendered argument list
    pub args: Vec<String>,
    /// Working directory; stdout/stderr logs are written here
    pub workdir: PathBuf,
    /// Directory recreated empty before launch, if any
    pub output_dir: Option<PathBuf>,
    /// Extra environment for the tool. Pinned keys cannot be overridden.
    pub env: BTreeMap<String, String>,
    pub ceiling: ResourceCeiling,
    /// Rendered artifact locator: a path or glob, relative to `workdir`
    /// unless absolute
    pub artifact: String,
    /// Input files the invocation reads, used for fingerprinting
    pub inputs: Vec<PathBuf>,
}

impl JobSpec {
    /// Create a job with no arguments and a default ceiling.
    pub fn new(unit: impl Into<String>, program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            unit: unit.into(),
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            output_dir: None,
            env: BTreeMap::new(),
            ceiling: ResourceCeiling::default(),
            artifact: String::new(),
            inputs: Vec::new(),
        }
    }

    /// Set the rendered argument list.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the directory that is recreated empty before launch.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the extra environment.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the resource ceiling.
    pub fn with_ceiling(mut self, ceiling: ResourceCeiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Set the artifact locator.
    pub fn with_artifact(mut self, locator: impl Into<String>) -> Self {
        self.artifact = locator.into();
        self
    }

    /// Set the fingerprinted input files.
    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Artifact locator resolved against the working directory.
    pub fn artifact_pattern(&self) -> PathBuf {
        let locator = Path::new(&self.artifact);
        if locator.is_absolute() {
            locator.to_path_buf()
        } else {
            self.workdir.join(locator)
        }
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.workdir.join(format!("{}.stdout.log", self.unit))
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.workdir.join(format!("{}.stderr.log", self.unit))
    }

    /// Shell-like rendering of the command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Job Artifact
// ============================================================================

/// Located output of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobArtifact {
    pub unit: String,
    pub path: PathBuf,
    /// Wall-clock duration in milliseconds (0 when restored from a checkpoint)
    pub duration_ms: u64,
}

impl JobArtifact {
    pub fn new(unit: impl Into<String>, path: impl Into<PathBuf>, duration_ms: u64) -> Self {
        Self {
            unit: unit.into(),
            path: path.into(),
            duration_ms,
        }
    }
}

/// Whether `path` is a usable artifact: a non-empty file or a non-empty
/// directory.
pub fn is_usable_artifact(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() > 0,
        Ok(meta) if meta.is_dir() => std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        _ => false,
    }
}
