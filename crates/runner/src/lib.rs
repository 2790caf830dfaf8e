//! Strain Cascade Runner
//!
//! Resource-bounded execution of opaque external tools and the three-stage
//! per-group pipeline built on top of it:
//!
//! - `models` - Job specification, resource ceiling, located artifacts
//! - `template` - `{placeholder}` command templates
//! - `limits` - Thread pinning and kernel resource limits for child processes
//! - `runner` - `JobRunner` capability trait and the process-backed implementation
//! - `pipeline` - Stage state machine and sequential stage pipeline
//!
//! Checkpointing and scheduling live in the main crate.

pub mod limits;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod template;

// Re-export model types
pub use models::{is_usable_artifact, JobArtifact, JobSpec, ResourceCeiling};

// Re-export template types
pub use template::{CommandTemplate, TemplateContext, TemplateValue};

// Re-export runner
pub use runner::{locate_artifact, JobRunner, ProcessJobRunner, ProcessRunnerConfig};

// Re-export pipeline types
pub use pipeline::{
    GroupState, Stage, StageExecutor, StageOutcome, StagePipeline, StagePipelineResult,
    StageRecord, StageStatus, TransitionObserver,
};
