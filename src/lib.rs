//! Strain Cascade
//!
//! Workflow orchestrator for large genome collections: chunked clustering,
//! cross-chunk merge, group resolution, and a resource-bounded three-stage
//! pipeline (alignment, filtering, tree building) per cluster. It includes:
//! - Configuration, run layout, and checkpoint storage
//! - The clustering, scheduling, and workflow services
//! - Run report models and utilities

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::report::{RunReport, RunStatus};
pub use models::settings::WorkflowConfig;
pub use services::workflow::{RunPlan, Workflow};
pub use storage::config::ConfigService;
pub use utils::error::{AppError, AppResult};
