use std::{num::NonZeroUsize, ops::Range};

/// Splits `total` samples among `num_ranks` and returns the shard for `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and all of the same size.
/// - The last `total % num_ranks` samples belong to no shard.
pub fn shard_range(total: usize, rank: usize, num_ranks: usize) -> Range<usize> {
    let per_rank = total / num_ranks;
    let start = rank * per_rank;
    start..start + per_rank
}

/// The part of the dataset a process trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub rank: usize,
    pub num_ranks: NonZeroUsize,
}

impl ShardSpec {
    /// Creates a new `ShardSpec`, `rank` must be lower than `num_ranks`.
    pub fn new(rank: usize, num_ranks: NonZeroUsize) -> Option<Self> {
        (rank < num_ranks.get()).then_some(Self { rank, num_ranks })
    }

    /// The whole dataset for a single process.
    pub fn solo() -> Self {
        Self {
            rank: 0,
            num_ranks: NonZeroUsize::MIN,
        }
    }

    #[inline]
    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.num_ranks.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_drops_the_remainder() {
        // total 10, ranks 3 => 3 samples each, sample 9 unused
        assert_eq!(shard_range(10, 0, 3), 0..3);
        assert_eq!(shard_range(10, 1, 3), 3..6);
        assert_eq!(shard_range(10, 2, 3), 6..9);
    }

    #[test]
    fn shard_spec_range_matches_function() {
        let spec = ShardSpec::new(1, NonZeroUsize::new(3).unwrap()).unwrap();
        assert_eq!(spec.range(10), 3..6);
        assert_eq!(ShardSpec::solo().range(10), 0..10);
    }

    #[test]
    fn out_of_range_rank_has_no_shard() {
        assert_eq!(ShardSpec::new(3, NonZeroUsize::new(3).unwrap()), None);
    }
}
