//! Bounded Job Runner
//!
//! Executes one external-tool invocation under its resource ceiling and
//! classifies the result as success, `timeout`, `tool-failure`, or
//! `missing-artifact`. Failures are terminal; nothing is retried here.

use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use strain_cascade_core::{CoreError, CoreResult};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::limits::{child_environment, ChildLimits};
use crate::models::{is_usable_artifact, JobArtifact, JobSpec};

/// Capability to run one bounded invocation.
///
/// Implemented once for real processes; tests and the checkpoint layer wrap
/// or replace it.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `spec` to completion and return its located artifact.
    async fn run(&self, spec: &JobSpec) -> CoreResult<JobArtifact>;
}

/// Configuration for the process-backed runner.
#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    /// Bytes of stderr embedded in a tool-failure error
    pub stderr_tail_bytes: usize,
    /// Lines of stderr embedded in a tool-failure error
    pub stderr_tail_lines: usize,
}

impl Default for ProcessRunnerConfig {
    fn default() -> Self {
        Self {
            stderr_tail_bytes: 16 * 1024,
            stderr_tail_lines: 20,
        }
    }
}

/// Runs jobs as child processes with rlimits, pinned threading, and a
/// process-group kill on timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessJobRunner {
    config: ProcessRunnerConfig,
}

impl ProcessJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ProcessRunnerConfig) -> Self {
        self.config = config;
        self
    }

    fn prepare_dirs(&self, spec: &JobSpec) -> CoreResult<()> {
        if let Some(output_dir) = &spec.output_dir {
            if output_dir.exists() {
                std::fs::remove_dir_all(output_dir)?;
            }
            std::fs::create_dir_all(output_dir)?;
        }
        std::fs::create_dir_all(&spec.workdir)?;
        Ok(())
    }

    fn build_command(&self, spec: &JobSpec) -> CoreResult<Command> {
        let stdout = File::create(spec.stdout_log())?;
        let stderr = File::create(spec.stderr_log())?;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .envs(child_environment(&spec.ceiling, &spec.env))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);

        let limits = ChildLimits::from(&spec.ceiling);
        // SAFETY: the closure only calls setrlimit, which is async-signal-safe,
        // and captures a Copy value.
        unsafe {
            cmd.pre_exec(move || limits.install());
        }
        Ok(cmd)
    }

    fn failure_detail(&self, spec: &JobSpec, status: ExitStatus) -> String {
        let cause = match status.signal() {
            Some(signal) => {
                let name = Signal::try_from(signal)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("signal {}", signal));
                format!("terminated by {}", name)
            }
            None => "exited unsuccessfully".to_string(),
        };
        let tail = stderr_tail(
            &spec.stderr_log(),
            self.config.stderr_tail_bytes,
            self.config.stderr_tail_lines,
        );
        if tail.is_empty() {
            cause
        } else {
            format!("{}; stderr tail:\n{}", cause, tail)
        }
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn run(&self, spec: &JobSpec) -> CoreResult<JobArtifact> {
        self.prepare_dirs(spec)?;
        let mut cmd = self.build_command(spec)?;

        tracing::info!(
            unit = %spec.unit,
            program = %spec.program,
            memory_mb = spec.ceiling.memory_mb,
            timeout_secs = spec.ceiling.timeout_secs,
            "Starting unit"
        );
        tracing::debug!(unit = %spec.unit, command = %spec.command_line(), "Rendered command");

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            CoreError::tool_failure(
                &spec.unit,
                None,
                format!("failed to launch '{}': {}", spec.program, e),
            )
        })?;
        let pid = child.id();

        let budget = Duration::from_secs(spec.ceiling.timeout_secs);
        let status = match timeout(budget, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Some(pid) = pid {
                    // Take down anything the tool forked as well.
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                let _ = child.kill().await;
                tracing::error!(
                    unit = %spec.unit,
                    timeout_secs = spec.ceiling.timeout_secs,
                    "Unit timed out and was killed"
                );
                return Err(CoreError::timeout(&spec.unit, spec.ceiling.timeout_secs));
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.success() {
            let detail = self.failure_detail(spec, status);
            tracing::error!(
                unit = %spec.unit,
                exit_code = ?status.code(),
                elapsed_ms = duration_ms,
                "Unit failed"
            );
            return Err(CoreError::tool_failure(&spec.unit, status.code(), detail));
        }

        let path = locate_artifact(spec)?;
        tracing::info!(
            unit = %spec.unit,
            artifact = %path.display(),
            elapsed_ms = duration_ms,
            "Unit finished"
        );
        Ok(JobArtifact::new(&spec.unit, path, duration_ms))
    }
}

/// Find the artifact named by `spec`'s locator. Globs resolve to the first
/// usable match in sorted order.
pub fn locate_artifact(spec: &JobSpec) -> CoreResult<PathBuf> {
    let pattern = spec.artifact_pattern();
    let pattern_str = pattern.to_string_lossy();

    if !pattern_str.contains(['*', '?', '[']) {
        return if is_usable_artifact(&pattern) {
            Ok(pattern)
        } else {
            Err(CoreError::missing_artifact(&spec.unit, pattern))
        };
    }

    let mut matches: Vec<PathBuf> = glob::glob(&pattern_str)
        .map_err(|e| {
            CoreError::config(format!("Invalid artifact pattern '{}': {}", pattern_str, e))
        })?
        .filter_map(Result::ok)
        .filter(|path| is_usable_artifact(path))
        .collect();
    matches.sort();

    match matches.into_iter().next() {
        Some(path) => Ok(path),
        None => Err(CoreError::missing_artifact(&spec.unit, pattern)),
    }
}

/// Last lines of a log file, bounded by bytes and line count.
fn stderr_tail(path: &Path, max_bytes: usize, max_lines: usize) -> String {
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(max_bytes);
    let text = String::from_utf8_lossy(&bytes[start..]);
    let lines: Vec<&str> = text.lines().collect();
    let keep = lines.len().saturating_sub(max_lines);
    lines[keep..].join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceCeiling;
    use tempfile::TempDir;

    fn sh(unit: &str, dir: &Path, script: &str) -> JobSpec {
        JobSpec::new(unit, "sh", dir)
            .with_args(vec!["-c".to_string(), script.to_string()])
            .with_ceiling(ResourceCeiling::new(1024, 10))
    }

    #[tokio::test]
    async fn test_success_returns_artifact() {
        let dir = TempDir::new().unwrap();
        let spec = sh("unit-ok", dir.path(), "echo hello > out.txt").with_artifact("out.txt");

        let artifact = ProcessJobRunner::new().run(&spec).await.unwrap();
        assert_eq!(artifact.path, dir.path().join("out.txt"));
        assert_eq!(artifact.unit, "unit-ok");
        assert!(dir.path().join("unit-ok.stdout.log").exists());
    }

    #[tokio::test]
    async fn test_glob_artifact_resolution() {
        let dir = TempDir::new().unwrap();
        let spec = sh(
            "unit-glob",
            dir.path(),
            "mkdir -p res && echo x > res/b_clusters.csv && echo y > res/a_clusters.csv",
        )
        .with_artifact("res/*_clusters.csv");

        let artifact = ProcessJobRunner::new().run(&spec).await.unwrap();
        assert_eq!(artifact.path, dir.path().join("res/a_clusters.csv"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure_with_stderr() {
        let dir = TempDir::new().unwrap();
        let spec = sh("unit-fail", dir.path(), "echo 'bad input' >&2; exit 3").with_artifact("x");

        let err = ProcessJobRunner::new().run(&spec).await.unwrap_err();
        match err {
            CoreError::ToolFailure {
                exit_code, detail, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(detail.contains("bad input"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact_is_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let spec = sh("unit-empty", dir.path(), ": > empty.txt").with_artifact("empty.txt");

        let err = ProcessJobRunner::new().run(&spec).await.unwrap_err();
        assert_eq!(err.failure_tag(), "missing-artifact");
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = TempDir::new().unwrap();
        let mut spec = sh("unit-slow", dir.path(), "sleep 30 & sleep 30; echo done > out.txt")
            .with_artifact("out.txt");
        spec.ceiling.timeout_secs = 1;

        let started = Instant::now();
        let err = ProcessJobRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { timeout_secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_signal_death_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let spec = sh("unit-signal", dir.path(), "kill -9 $$").with_artifact("x");

        let err = ProcessJobRunner::new().run(&spec).await.unwrap_err();
        match err {
            CoreError::ToolFailure {
                exit_code, detail, ..
            } => {
                assert_eq!(exit_code, None);
                assert!(detail.contains("SIGKILL"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_env_is_pinned() {
        let dir = TempDir::new().unwrap();
        let mut env = std::collections::BTreeMap::new();
        env.insert("OMP_NUM_THREADS".to_string(), "8".to_string());
        env.insert("STAGE_LABEL".to_string(), "align".to_string());
        let spec = sh(
            "unit-env",
            dir.path(),
            "echo \"$OMP_NUM_THREADS $MALLOC_ARENA_MAX $STAGE_LABEL\" > env.txt",
        )
        .with_env(env)
        .with_artifact("env.txt");

        let artifact = ProcessJobRunner::new().run(&spec).await.unwrap();
        let content = std::fs::read_to_string(artifact.path).unwrap();
        assert_eq!(content.trim(), "1 2 align");
    }

    #[tokio::test]
    async fn test_output_dir_recreated_empty() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("stale.csv"), "old").unwrap();

        let spec = sh("unit-fresh", dir.path(), "ls out > listing.txt; echo >> listing.txt")
            .with_output_dir(&out)
            .with_artifact("listing.txt");
        let artifact = ProcessJobRunner::new().run(&spec).await.unwrap();
        let listing = std::fs::read_to_string(artifact.path).unwrap();
        assert!(!listing.contains("stale.csv"));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let spec = JobSpec::new("unit-missing", "definitely-not-a-real-tool-xyz", dir.path());
        let err = ProcessJobRunner::new().run(&spec).await.unwrap_err();
        assert_eq!(err.failure_tag(), "tool-failure");
    }

    #[test]
    fn test_stderr_tail_limits_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("e.log");
        let content: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&log, content).unwrap();

        let tail = stderr_tail(&log, 16 * 1024, 3);
        assert_eq!(tail, "line 47\nline 48\nline 49");
        assert_eq!(stderr_tail(&dir.path().join("none"), 10, 10), "");
    }
}
