//! Core Error Types
//!
//! Defines the error taxonomy shared by every crate in the Strain Cascade
//! workspace. Only thiserror + std (+ serde_json for the conversion) are used
//! here so the core crate stays lightweight.
//!
//! The failure variants map onto the run-level policy:
//! - `Config` aborts the run before any unit executes
//! - `Timeout`, `ToolFailure`, `MissingArtifact` are unit-level failures; a
//!   chunk-level one aborts the run, a group-level one is isolated to its group
//!
//! Insufficient data after filtering is not an error and has no variant here.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for the Strain Cascade workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid parameters, caught before any unit runs
    #[error("Configuration error: {0}")]
    Config(String),

    /// A unit exceeded its wall-clock budget and was killed
    #[error("Timeout: {unit} exceeded {timeout_secs}s")]
    Timeout { unit: String, timeout_secs: u64 },

    /// The external tool exited nonzero, died by signal, or could not be launched
    #[error("Tool failure: {unit} ({}): {detail}", exit_label(.exit_code))]
    ToolFailure {
        unit: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The external tool exited zero but its expected output is absent or empty
    #[error("Missing artifact: {unit} produced no usable output at {}", .path.display())]
    MissingArtifact { unit: String, path: PathBuf },

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse errors (tool output tables, manifests)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data integrity violations
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(unit: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            unit: unit.into(),
            timeout_secs,
        }
    }

    /// Create a tool failure error
    pub fn tool_failure(
        unit: impl Into<String>,
        exit_code: Option<i32>,
        detail: impl Into<String>,
    ) -> Self {
        Self::ToolFailure {
            unit: unit.into(),
            exit_code,
            detail: detail.into(),
        }
    }

    /// Create a missing artifact error
    pub fn missing_artifact(unit: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact {
            unit: unit.into(),
            path: path.into(),
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable tag used in reports and structured logs.
    pub fn failure_tag(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Timeout { .. } => "timeout",
            Self::ToolFailure { .. } => "tool-failure",
            Self::MissingArtifact { .. } => "missing-artifact",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this error was produced by running a unit (as opposed to
    /// configuration or bookkeeping).
    pub fn is_unit_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ToolFailure { .. } | Self::MissingArtifact { .. }
        )
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
