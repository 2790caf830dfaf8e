//! Input Catalog
//!
//! The read-only set of input files for one run. Every downstream component
//! refers to inputs by sample identifier and resolves them back through the
//! catalog.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Suffixes stripped when deriving a sample identifier from a file name.
/// Longest match wins, so `.fa.gz` is removed as a whole.
pub const KNOWN_SUFFIXES: &[&str] = &[
    ".fasta.gz", ".fna.gz", ".fas.gz", ".fa.gz", ".gff3.gz", ".gff.gz", ".gbk.gz", ".fasta",
    ".fna", ".fas", ".fa", ".ffn", ".gff3", ".gff", ".gbk", ".gbff", ".gb",
];

/// One input file and the sample identifier derived from its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    /// Sample identifier, unique within the run
    pub sample_id: String,
    /// Location of the input file
    pub path: PathBuf,
}

impl InputRecord {
    /// Create a record with an explicit sample identifier.
    pub fn new(sample_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            sample_id: sample_id.into(),
            path: path.into(),
        }
    }

    /// Create a record whose identifier is derived from the file name.
    pub fn from_path(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let sample_id = sample_id_from_path(&path).ok_or_else(|| {
            CoreError::config(format!(
                "Cannot derive a sample identifier from '{}'",
                path.display()
            ))
        })?;
        Ok(Self { sample_id, path })
    }
}

/// Derive a sample identifier from a file path or bare file name.
///
/// Directories are dropped and the longest known suffix is stripped. Returns
/// `None` when nothing is left.
pub fn sample_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(strip_known_suffix(name)).filter(|id| !id.is_empty())
}

fn strip_known_suffix(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let best = KNOWN_SUFFIXES
        .iter()
        .filter(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .max_by_key(|suffix| suffix.len());
    match best {
        Some(suffix) => name[..name.len() - suffix.len()].to_string(),
        None => name.to_string(),
    }
}

/// Ordered, immutable collection of input records with lookup by sample id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<InputRecord>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate sample identifiers.
    pub fn new(records: Vec<InputRecord>) -> CoreResult<Self> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if let Some(previous) = index.insert(record.sample_id.clone(), position) {
                return Err(CoreError::config(format!(
                    "Duplicate sample identifier '{}' ({} and {})",
                    record.sample_id,
                    records[previous].path.display(),
                    record.path.display()
                )));
            }
        }
        Ok(Self { records, index })
    }

    /// Scan a directory (non-recursively) for files ending in one of the
    /// accepted extensions. Records are ordered by file name.
    pub fn from_dir(dir: &Path, extensions: &[String]) -> CoreResult<Self> {
        let accepted: Vec<String> = extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_ascii_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
            if accepted.iter().any(|ext| name.ends_with(ext.as_str())) {
                paths.push(path);
            }
        }
        paths.sort();

        let records = paths
            .into_iter()
            .map(InputRecord::from_path)
            .collect::<CoreResult<Vec<_>>>()?;
        Self::new(records)
    }

    /// Read a `sample<TAB>path` manifest. Blank lines and `#` comments are
    /// ignored, a `sample`/`path` header is skipped, and relative paths are
    /// resolved against the manifest's directory.
    pub fn from_manifest(manifest: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(manifest)?;
        let base = manifest.parent().unwrap_or_else(|| Path::new("."));

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t').map(str::trim);
            let (sample, path) = match (fields.next(), fields.next()) {
                (Some(sample), Some(path)) if !sample.is_empty() && !path.is_empty() => {
                    (sample, path)
                }
                _ => {
                    return Err(CoreError::parse(format!(
                        "{}:{}: expected 'sample<TAB>path'",
                        manifest.display(),
                        line_no + 1
                    )))
                }
            };
            if records.is_empty()
                && sample.eq_ignore_ascii_case("sample")
                && path.eq_ignore_ascii_case("path")
            {
                continue;
            }
            let path = PathBuf::from(path);
            let path = if path.is_absolute() {
                path
            } else {
                base.join(path)
            };
            records.push(InputRecord::new(sample, path));
        }
        Self::new(records)
    }

    /// Load from a directory or a manifest file, whichever `location` is.
    pub fn load(location: &Path, extensions: &[String]) -> CoreResult<Self> {
        let catalog = if location.is_dir() {
            Self::from_dir(location, extensions)?
        } else if location.is_file() {
            Self::from_manifest(location)?
        } else {
            return Err(CoreError::config(format!(
                "Input catalog '{}' does not exist",
                location.display()
            )));
        };
        if catalog.is_empty() {
            return Err(CoreError::config(format!(
                "Input catalog '{}' contains no input files",
                location.display()
            )));
        }
        Ok(catalog)
    }

    /// Records in catalog order.
    pub fn records(&self) -> &[InputRecord] {
        &self.records
    }

    /// Look up a record by exact sample identifier.
    pub fn get(&self, sample_id: &str) -> Option<&InputRecord> {
        self.index.get(sample_id).map(|&i| &self.records[i])
    }

    /// Look up a record by exact identifier, falling back to the identifier
    /// derived from the value as if it were a file name (clustering engines
    /// sometimes report the file name rather than the sample name).
    pub fn resolve(&self, reported: &str) -> Option<&InputRecord> {
        self.get(reported).or_else(|| {
            sample_id_from_path(Path::new(reported)).and_then(|derived| self.get(&derived))
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
