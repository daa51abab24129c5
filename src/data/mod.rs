//! # Data Module
//!
//! In-memory representations of the work being scheduled. This is the core "Model" layer.
//!
//! ## Design Philosophy
//! - **Zero-cost newtypes:** `PartitionIdx` and `ShardIdx` prevent mixing up a
//!   partition position with a 1-based shard index.
//! - **Composite keys:** every shard is addressed by one flat `ShardKey`, never
//!   by a nested partition → shard structure.
//! - **Single owner:** all mutable shard state lives in the `Registry`.

pub mod partition;
pub mod registry;
pub mod shard;

use serde::Serialize;

// Re-export commonly used types
pub use partition::Partition;
pub use registry::Registry;
pub use shard::{FailureReason, JobHandle, Outcome, RawStatus, ShardRecord, ShardState};

/// Partition identifier (0-based index into the configured partition list)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionIdx(pub u16);

impl PartitionIdx {
    pub fn new(idx: u16) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for PartitionIdx {
    fn from(idx: u16) -> Self {
        Self(idx)
    }
}

impl From<PartitionIdx> for usize {
    fn from(idx: PartitionIdx) -> usize {
        idx.0 as usize
    }
}

/// Shard index within a partition, 1-based (`1..=shard_count`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShardIdx(pub u32);

impl ShardIdx {
    pub fn new(idx: u32) -> Self {
        debug_assert!(idx >= 1, "shard indices are 1-based");
        Self(idx)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ShardIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite shard key. Ordering is (partition, shard), which is the
/// deterministic visitation order of every sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShardKey {
    pub partition: PartitionIdx,
    pub shard: ShardIdx,
}

impl ShardKey {
    pub fn new(partition: PartitionIdx, shard: ShardIdx) -> Self {
        Self { partition, shard }
    }
}
