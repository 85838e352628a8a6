//! Deterministic partitioning of a dataset snapshot into disjoint shards.
//!
//! Every slice holds `len / split_factor` items and the final slice absorbs
//! the remainder, so the slices for `chunk_index in 0..split_factor` cover
//! the dataset exactly once.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Partitioning errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("split factor must be positive")]
    ZeroSplitFactor,
    #[error("chunk index {chunk_index} out of range for split factor {split_factor}")]
    ChunkOutOfRange { chunk_index: u32, split_factor: u32 },
    #[error("slice of dataset '{expected}' applied to dataset '{actual}'")]
    DatasetMismatch { expected: String, actual: String },
}

/// A dataset snapshot that can be partitioned.
///
/// The store behind it is external; partitioning only needs a stable id
/// and a fixed length for the lifetime of a run.
pub trait Dataset: Send + Sync + 'static {
    /// Identifier of the snapshot.
    fn id(&self) -> &str;

    /// Number of items in the snapshot.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Half-open range of a dataset assigned to one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceDescriptor {
    pub dataset_id: String,
    pub chunk_index: u32,
    pub split_factor: u32,
    pub start: usize,
    pub end: usize,
}

impl SliceDescriptor {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Index range of chunk `chunk_index` when `len` items are split `split_factor` ways.
pub fn partition_range(
    len: usize,
    chunk_index: u32,
    split_factor: u32,
) -> Result<Range<usize>, PartitionError> {
    if split_factor == 0 {
        return Err(PartitionError::ZeroSplitFactor);
    }
    if chunk_index >= split_factor {
        return Err(PartitionError::ChunkOutOfRange {
            chunk_index,
            split_factor,
        });
    }

    let size = len / split_factor as usize;
    let start = size * chunk_index as usize;
    let end = if chunk_index + 1 == split_factor {
        len
    } else {
        start + size
    };
    Ok(start..end)
}

/// Resolve the slice of `dataset` for one shard.
pub fn partition(
    dataset: &dyn Dataset,
    chunk_index: u32,
    split_factor: u32,
) -> Result<SliceDescriptor, PartitionError> {
    let range = partition_range(dataset.len(), chunk_index, split_factor)?;
    Ok(SliceDescriptor {
        dataset_id: dataset.id().to_string(),
        chunk_index,
        split_factor,
        start: range.start,
        end: range.end,
    })
}

/// Dataset snapshot held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<T> {
    id: String,
    items: Arc<[T]>,
}

impl<T> InMemoryDataset<T> {
    pub fn new(id: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            id: id.into(),
            items: items.into(),
        }
    }

    /// All items in the snapshot.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Items covered by `slice`.
    pub fn slice(&self, slice: &SliceDescriptor) -> Result<&[T], PartitionError> {
        if slice.dataset_id != self.id {
            return Err(PartitionError::DatasetMismatch {
                expected: slice.dataset_id.clone(),
                actual: self.id.clone(),
            });
        }
        // A descriptor resolved against this snapshot is always in bounds.
        let end = slice.end.min(self.items.len());
        let start = slice.start.min(end);
        Ok(&self.items[start..end])
    }
}

impl<T: Send + Sync + 'static> Dataset for InMemoryDataset<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
