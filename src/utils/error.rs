//! Error Handling
//!
//! Application-level error type. Wraps the core taxonomy and adds the
//! variants that depend on crates the core does not pull in.

use strain_cascade_core::CoreError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Workflow errors from the core taxonomy
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Configuration error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Core(CoreError::config(msg))
    }

    /// Stable tag used in reports and structured logs.
    pub fn failure_tag(&self) -> &'static str {
        match self {
            Self::Core(err) => err.failure_tag(),
            Self::Toml(_) | Self::TomlSerialize(_) => "configuration",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the error was caught before any unit ran.
    pub fn is_configuration(&self) -> bool {
        self.failure_tag() == "configuration"
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
