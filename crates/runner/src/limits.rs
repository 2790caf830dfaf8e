//! Resource Limits
//!
//! Environment pinning and kernel resource limits applied to each child
//! process. Limits are installed in the child between fork and exec, never in
//! the orchestrator itself.

use std::collections::BTreeMap;

use nix::sys::resource::{setrlimit, Resource};

use crate::models::ResourceCeiling;

/// Threading knobs of numeric libraries, all pinned to one thread.
pub const PINNED_THREAD_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "NUMEXPR_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "BLIS_NUM_THREADS",
    "NUMBA_NUM_THREADS",
    "RAYON_NUM_THREADS",
];

/// glibc allocator arena cap.
pub const ARENA_VAR: &str = "MALLOC_ARENA_MAX";

/// Whether `key` is controlled by the runner.
pub fn is_pinned(key: &str) -> bool {
    key == ARENA_VAR || PINNED_THREAD_VARS.contains(&key)
}

/// Full environment overlay for a child: tool-specific entries first, then
/// the pinned keys, which always win.
pub fn child_environment(
    ceiling: &ResourceCeiling,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = extra
        .iter()
        .filter(|(key, _)| {
            let pinned = is_pinned(key);
            if pinned {
                tracing::warn!(key = %key, "Ignoring tool environment entry for a pinned variable");
            }
            !pinned
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for key in PINNED_THREAD_VARS {
        env.insert((*key).to_string(), "1".to_string());
    }
    env.insert(ARENA_VAR.to_string(), ceiling.max_arenas.max(1).to_string());
    env
}

/// Limits to install in the child, precomputed so the post-fork closure only
/// makes syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLimits {
    pub memory_bytes: u64,
    pub disable_core_dumps: bool,
}

impl From<&ResourceCeiling> for ChildLimits {
    fn from(ceiling: &ResourceCeiling) -> Self {
        Self {
            memory_bytes: ceiling.memory_bytes(),
            disable_core_dumps: ceiling.disable_core_dumps,
        }
    }
}

impl ChildLimits {
    /// Install the limits in the calling process. Runs after fork, so it
    /// must not allocate or log.
    pub fn install(&self) -> std::io::Result<()> {
        setrlimit(Resource::RLIMIT_AS, self.memory_bytes, self.memory_bytes)?;
        setrlimit(Resource::RLIMIT_DATA, self.memory_bytes, self.memory_bytes)?;
        if self.disable_core_dumps {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        }
        Ok(())
    }
}
