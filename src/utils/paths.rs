//! Path Utilities
//!
//! Helpers for resolving configured paths and naming on-disk areas.

use std::path::{Path, PathBuf};

use crate::utils::error::AppResult;

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Make a cluster label safe for use as a directory name. Characters outside
/// `[A-Za-z0-9._-]` become `_`; `.` and `..` are prefixed.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" => "_".to_string(),
        "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}
