//! Services
//!
//! The workflow's execution layer: capacity accounting, checkpointed unit
//! execution, chunk clustering, per-group pipeline scheduling, and the
//! top-level driver that ties the phases together.

pub mod capacity;
pub mod chunk_clusterer;
pub mod executor;
pub mod jobs;
pub mod scheduler;
pub mod workflow;

pub use capacity::{CapacityLease, CapacityPool};
pub use chunk_clusterer::{ChunkClusterer, ChunkClusteringResult};
pub use executor::{UnitExecutor, UnitOutcome};
pub use jobs::JobFactory;
pub use scheduler::{PipelineScheduler, MIN_TREE_SEQUENCES};
pub use workflow::{PlannedChunk, RunPlan, Workflow};
