//! Strain Cascade Core
//!
//! Error taxonomy, input catalog, and the pure planning logic of the Strain
//! Cascade workflow. This crate has no dependency on process execution or the
//! async runtime.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `catalog` - Input records and catalog ingestion (`InputRecord`, `Catalog`)
//! - `partition` - Bounded-size chunking of the catalog (`Chunk`, `partition`)
//! - `profile` - Sample-count tiered clustering parameters (`ResourceProfile`)
//! - `clusters` - Partial/global cluster tables and the table parser
//! - `merge` - Cross-chunk merge of partial tables
//! - `resolve` - Global labels back to input files, undersized group pruning
//!
//! ## Design Principles
//!
//! 1. **Pure functions** - everything here is deterministic and testable without tools
//! 2. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod catalog;
pub mod clusters;
pub mod error;
pub mod merge;
pub mod partition;
pub mod profile;
pub mod resolve;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Catalog ────────────────────────────────────────────────────────────
pub use catalog::{sample_id_from_path, Catalog, InputRecord};

// ── Planning ───────────────────────────────────────────────────────────
pub use partition::{chunk_unit_key, partition, partition_configured, Chunk};
pub use profile::{select_profile, select_tier, CeilingClass, ProfileTier, ResourceProfile};

// ── Cluster Tables ─────────────────────────────────────────────────────
pub use clusters::{
    parse_cluster_table, ClusterGroup, GlobalClusterTable, PartialClusterTable,
    CLUSTER_COLUMN_SYNONYMS, SAMPLE_COLUMN_SYNONYMS,
};
pub use merge::{merge_partials, namespaced_label, MergeStrategy};
pub use resolve::{
    resolve_groups, ConflictingSample, PrunedGroup, ResolvedGroups, UnresolvedSample,
    MIN_GROUP_SIZE,
};
