//! Partitioner
//!
//! Splits the ordered catalog into bounded-size chunks, one clustering
//! invocation each.

use serde::{Deserialize, Serialize};

use crate::catalog::InputRecord;
use crate::error::{CoreError, CoreResult};

/// A bounded-size slice of the input set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Dense, 1-based chunk id
    pub id: u32,
    /// Inputs in catalog order
    pub records: Vec<InputRecord>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deterministic unit key, also used to name the chunk's output area.
    pub fn unit_key(&self) -> String {
        chunk_unit_key(self.id)
    }
}

/// Unit key for a chunk id (`chunk-0003`).
pub fn chunk_unit_key(id: u32) -> String {
    format!("chunk-{:04}", id)
}

/// Partition `records` into chunks of at most `max_chunk_size`, preserving
/// order. Only the last chunk may be smaller.
///
/// # Errors
///
/// `Config` if `max_chunk_size` is zero or `records` is empty.
pub fn partition(records: &[InputRecord], max_chunk_size: usize) -> CoreResult<Vec<Chunk>> {
    if records.is_empty() {
        return Err(CoreError::config("Nothing to partition: the input catalog is empty"));
    }
    if max_chunk_size == 0 {
        return Err(CoreError::config("Maximum chunk size must be positive"));
    }

    Ok(records
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(index, slice)| Chunk {
            id: index as u32 + 1,
            records: slice.to_vec(),
        })
        .collect())
}

/// Partition according to a configured chunk size where 0 means "no
/// chunking": the whole input becomes a single chunk.
pub fn partition_configured(
    records: &[InputRecord],
    configured_chunk_size: usize,
) -> CoreResult<Vec<Chunk>> {
    let size = if configured_chunk_size == 0 {
        records.len()
    } else {
        configured_chunk_size
    };
    partition(records, size)
}
