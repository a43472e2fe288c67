use std::{ops::Range, sync::Arc};

use ndarray::{Array2, Array3};

use super::{dataset::AudioDataset, shard::ShardSpec};

/// A batch of segments.
#[derive(Debug, Clone)]
pub struct Batch {
    /// The `(batch, time, n_features)` conditioning features.
    pub features: Array3<f32>,
    /// The `(batch, time)` quantized samples to reconstruct.
    pub targets: Array2<usize>,
}

/// Shard aware loader yielding full batches in order; a trailing partial batch is dropped.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: Arc<AudioDataset>,
    shard: ShardSpec,
    shard_range: Range<usize>,
    batch_size: usize,
    cursor: usize, // absolute index in dataset
}

impl DataLoader {
    /// Creates a new `DataLoader`, `batch_size` must be positive.
    pub fn new(dataset: Arc<AudioDataset>, shard: ShardSpec, batch_size: usize) -> Self {
        let shard_range = shard.range(dataset.len());
        let cursor = shard_range.start;

        Self {
            dataset,
            shard,
            shard_range,
            batch_size: batch_size.max(1),
            cursor,
        }
    }

    #[inline]
    pub fn shard(&self) -> ShardSpec {
        self.shard
    }

    #[inline]
    pub fn shard_range(&self) -> Range<usize> {
        self.shard_range.clone()
    }

    /// The amount of batches yielded per epoch.
    #[inline]
    pub fn batches_per_epoch(&self) -> usize {
        self.shard_range.len() / self.batch_size
    }

    /// Rewinds to the start of the shard.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = self.shard_range.start;
    }

    /// Skips the next `n` batches.
    pub fn skip(&mut self, n: usize) {
        self.cursor = (self.cursor + n * self.batch_size).min(self.shard_range.end);
    }

    /// Returns the next batch for this shard, or `None` once less than a batch is left.
    pub fn next_batch(&mut self) -> Option<Batch> {
        let end = self.cursor + self.batch_size;
        if end > self.shard_range.end {
            return None;
        }

        let (features, targets) = self.dataset.slice(self.cursor..end);
        self.cursor = end;

        Some(Batch {
            features: features.to_owned(),
            targets: targets.to_owned(),
        })
    }
}
