//! # Partitions
//!
//! A partition (typically one chromosome) and the fixed-length intervals its
//! shards cover.

use std::path::PathBuf;

use serde::Serialize;

use crate::data::{PartitionIdx, ShardIdx};

/// A unit of work domain, sized once by discovery and immutable afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct Partition {
    /// Position in the configured partition list
    pub idx: PartitionIdx,
    /// Identifier, e.g. `chr1`
    pub name: String,
    /// Reference-data locator scanned for the maximal coordinate
    pub reference: PathBuf,
    /// Largest coordinate present in the reference
    pub max_coordinate: u64,
    /// Number of shards, always >= 1
    pub shard_count: u32,
}

impl Partition {
    pub fn new(
        idx: PartitionIdx,
        name: impl Into<String>,
        reference: impl Into<PathBuf>,
        max_coordinate: u64,
        chunk_length: u64,
    ) -> Self {
        Self {
            idx,
            name: name.into(),
            reference: reference.into(),
            max_coordinate,
            shard_count: shard_count(max_coordinate, chunk_length),
        }
    }

    /// Shard indices in ascending order
    pub fn shards(&self) -> impl Iterator<Item = ShardIdx> {
        (1..=self.shard_count).map(ShardIdx::new)
    }
}

/// `ceil(max_coordinate / chunk_length)`, never less than one.
///
/// Saturates at `u32::MAX`; use `checked_shard_count` where overflow must be rejected.
pub fn shard_count(max_coordinate: u64, chunk_length: u64) -> u32 {
    checked_shard_count(max_coordinate, chunk_length).unwrap_or(u32::MAX)
}

/// Like `shard_count`, but `None` when the count does not fit in a `u32`.
pub fn checked_shard_count(max_coordinate: u64, chunk_length: u64) -> Option<u32> {
    assert!(chunk_length > 0, "chunk length must be positive");
    u32::try_from(max_coordinate.div_ceil(chunk_length).max(1)).ok()
}

/// Half-open coordinate interval `[start, end)` covered by one shard
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    /// Interval for a 1-based shard index: `start = (index-1) * chunk`, `end = start + chunk`.
    pub fn for_shard(shard: ShardIdx, chunk_length: u64) -> Self {
        let start = u64::from(shard.get() - 1) * chunk_length;
        Self {
            start,
            end: start + chunk_length,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_count_rounds_up() {
        assert_eq!(shard_count(12_300_000, 5_000_000), 3);
        assert_eq!(shard_count(10_000_000, 5_000_000), 2);
        assert_eq!(shard_count(10_000_001, 5_000_000), 3);
        assert_eq!(shard_count(1, 5_000_000), 1);
    }

    #[test]
    fn test_shard_count_is_at_least_one() {
        assert_eq!(shard_count(0, 5_000_000), 1);
    }

    #[test]
    fn test_checked_shard_count_detects_overflow() {
        assert_eq!(checked_shard_count(12_300_000, 5_000_000), Some(3));
        assert_eq!(checked_shard_count(u64::from(u32::MAX), 1), Some(u32::MAX));
        assert_eq!(checked_shard_count(u64::from(u32::MAX) + 1, 1), None);
        assert_eq!(shard_count(u64::MAX, 1), u32::MAX);
    }

    #[test]
    fn test_intervals_tile_the_partition() {
        let chunk = 5_000_000;
        let first = Interval::for_shard(ShardIdx::new(1), chunk);
        let second = Interval::for_shard(ShardIdx::new(2), chunk);
        let third = Interval::for_shard(ShardIdx::new(3), chunk);

        assert_eq!(first, Interval { start: 0, end: 5_000_000 });
        assert_eq!(second.start, first.end);
        assert_eq!(third, Interval { start: 10_000_000, end: 15_000_000 });
        assert_eq!(third.len(), chunk);
    }

    #[test]
    fn test_partition_shards_iterates_in_order() {
        let p = Partition::new(PartitionIdx::new(0), "chr1", "ref.legend.gz", 12_300_000, 5_000_000);
        let idx: Vec<u32> = p.shards().map(ShardIdx::get).collect();
        assert_eq!(idx, vec![1, 2, 3]);
    }
}
